//! Error types for harvests.

use thiserror::Error;

use crate::pool::PoolError;
use crate::transport::{FailureType, RetryExhausted, classify_error};

/// Errors that abort a whole harvest.
///
/// Failures of individual non-seed pages never surface here; they are
/// recorded in the [`HarvestReport`](super::HarvestReport).
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The request was rejected before any network traffic.
    #[error("invalid harvest request: {message}")]
    Validation {
        /// What was invalid.
        message: String,
    },

    /// The seed page failed; no page plan could be made.
    #[error("seed page failed: {source}")]
    Seed {
        /// The seed page's final error.
        #[source]
        source: RetryExhausted,
    },

    /// A page task could not be scheduled.
    #[error("failed to schedule page task: {0}")]
    Pool(#[from] PoolError),
}

impl HarvestError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns the failure classification, if the error came from a request.
    #[must_use]
    pub fn failure_type(&self) -> Option<FailureType> {
        match self {
            Self::Validation { .. } => Some(FailureType::Validation),
            Self::Seed { source } => Some(classify_error(&source.error)),
            Self::Pool(_) => None,
        }
    }

    /// Returns true if the session must be re-established before retrying.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        self.failure_type() == Some(FailureType::Auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FetchError;

    #[test]
    fn test_seed_auth_failure_is_flagged() {
        let error = HarvestError::Seed {
            source: RetryExhausted {
                error: FetchError::auth(2, "expired"),
                attempts: 1,
            },
        };
        assert!(error.is_auth());
        assert!(error.to_string().contains("seed page failed"));
    }

    #[test]
    fn test_pool_error_has_no_failure_type() {
        let error = HarvestError::from(PoolError::Released);
        assert_eq!(error.failure_type(), None);
    }
}
