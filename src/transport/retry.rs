//! Retry policy with a fixed inter-attempt delay.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying request errors and deciding whether to issue another attempt.
//!
//! # Overview
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transport`] - connection or timeout failures (retryable)
//! - [`FailureType::RateLimit`] - HTTP 429 or the platform's rate-limit message (retryable)
//! - [`FailureType::Server`] - 5xx responses (retryable)
//! - [`FailureType::Auth`] - expired or invalid session (terminal)
//! - [`FailureType::Validation`] - malformed input or a verification challenge (terminal)
//! - [`FailureType::Parsing`] - malformed JSON (terminal for that page)
//! - [`FailureType::Api`] - any other business failure (terminal)
//!
//! The delay between attempts is fixed. Optional jitter can be added on top
//! of it, but there is no exponential growth.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use harvester_core::transport::{FetchError, RetryDecision, RetryPolicy};
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(2));
//! let error = FetchError::http_status("https://seller.example.com/api", 503);
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use super::FetchError;

/// Default maximum attempts (including the initial one).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Classification of request failures, used for retry decisions and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// Connection, DNS, proxy tunnel or timeout failure.
    Transport,
    /// HTTP 429 or the platform's "requests too frequent" message.
    RateLimit,
    /// Expired or invalid session; must be surfaced for re-authentication.
    Auth,
    /// Malformed input parameters or a verification-code challenge.
    Validation,
    /// Malformed JSON response body.
    Parsing,
    /// HTTP 5xx.
    Server,
    /// Any other non-success answer from the platform.
    Api,
}

impl FailureType {
    /// Returns whether another attempt may succeed for this kind of failure.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transport | Self::RateLimit | Self::Server)
    }

    /// Returns the stable label used in log fields and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::RateLimit => "rate_limit",
            Self::Auth => "auth",
            Self::Validation => "validation",
            Self::Parsing => "parsing",
            Self::Server => "server",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the attempt loop treats errors the policy considers terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryMode {
    /// Stop at the first error the predicate rejects.
    #[default]
    ShortCircuit,
    /// Keep attempting up to the cap regardless of classification.
    Unconditional,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry the request.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Predicate deciding which errors are worth another attempt.
pub type RetryPredicate = fn(&FetchError) -> bool;

/// Configuration for retry behavior with a fixed delay.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `delay`: 2 seconds
/// - `jitter`: none
/// - `mode`: [`RetryMode::ShortCircuit`]
/// - `retryable`: [`is_retryable_error`]
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Fixed delay between attempts.
    delay: Duration,

    /// Upper bound of random jitter added to each delay.
    jitter: Duration,

    mode: RetryMode,

    retryable: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("jitter", &self.jitter)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy with the given attempt cap and fixed delay.
    ///
    /// `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            jitter: Duration::ZERO,
            mode: RetryMode::default(),
            retryable: is_retryable_error,
        }
    }

    /// Creates a policy with a custom max_attempts, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(max_attempts, DEFAULT_RETRY_DELAY)
    }

    /// Adds up to `jitter` of random delay to every retry.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets how terminal errors are treated inside the attempt loop.
    #[must_use]
    pub fn with_mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replaces the retryable-error predicate.
    #[must_use]
    pub fn with_predicate(mut self, retryable: RetryPredicate) -> Self {
        self.retryable = retryable;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the fixed delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Returns the configured retry mode.
    #[must_use]
    pub fn mode(&self) -> RetryMode {
        self.mode
    }

    /// Applies the policy's predicate to an error.
    #[must_use]
    pub fn is_retryable(&self, error: &FetchError) -> bool {
        (self.retryable)(error)
    }

    /// Determines whether to retry a failed request.
    ///
    /// # Arguments
    ///
    /// * `error` - The error returned by the attempt that just failed
    /// * `attempt` - The attempt number that just failed (1-indexed)
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> RetryDecision {
        if self.mode == RetryMode::ShortCircuit && !self.is_retryable(error) {
            return RetryDecision::DoNotRetry {
                reason: format!("{} failure - retry would not help", classify_error(error)),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.delay + self.calculate_jitter();

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=self.jitter.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Default retry predicate: transport failures, rate limiting and 5xx.
#[must_use]
pub fn is_retryable_error(error: &FetchError) -> bool {
    classify_error(error).is_retryable()
}

/// Classifies a request error into a failure type.
///
/// # HTTP Status Code Classification
///
/// | Status | Type |
/// |--------|------|
/// | 401, 403 | Auth |
/// | 408 | Transport |
/// | 429 | RateLimit |
/// | other 4xx | Api |
/// | 5xx | Server |
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    match error {
        FetchError::HttpStatus { status, .. } => classify_http_status(*status),
        FetchError::Network { .. } | FetchError::Timeout { .. } | FetchError::Proxy(_) => {
            FailureType::Transport
        }
        FetchError::RateLimited { .. } => FailureType::RateLimit,
        FetchError::Auth { .. } => FailureType::Auth,
        FetchError::Validation { .. } | FetchError::InvalidUrl { .. } => FailureType::Validation,
        FetchError::Parsing { .. } => FailureType::Parsing,
        FetchError::Api { .. } => FailureType::Api,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::Auth,
        408 => FailureType::Transport,
        429 => FailureType::RateLimit,
        status if (500..600).contains(&status) => FailureType::Server,
        status if (400..500).contains(&status) => FailureType::Api,
        _ => FailureType::Api,
    }
}
