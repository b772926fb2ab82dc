//! Rotating-proxy lease cache.
//!
//! One egress address is cached at a time. Every caller gets the cached lease
//! while it is unexpired; the first caller to observe expiry refreshes it
//! from the issuing endpoint while holding the cache lock, so concurrent
//! callers wait for that refresh instead of stampeding the provider.
//!
//! Leases are immutable and shared as `Arc<ProxyLease>`. A refresh swaps
//! the `Arc`; it never edits the lease other tasks may still be holding.

mod clock;
mod error;
mod source;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ProxyError;
pub use source::{
    DEADLINE_FORMAT, DEFAULT_DEADLINE_UTC_OFFSET_HOURS, HttpLeaseSource, LeaseSource,
    parse_deadline,
};

/// A time-bounded claim on an egress address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    /// `host:port` of the proxy.
    pub address: String,
    /// When the provider stops honoring the address.
    pub expires_at: DateTime<Utc>,
}

impl ProxyLease {
    /// Returns true while `now` is strictly before the expiry.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Single-slot TTL cache in front of a [`LeaseSource`].
pub struct ProxyCache {
    source: Arc<dyn LeaseSource>,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Arc<ProxyLease>>>,
}

impl std::fmt::Debug for ProxyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyCache").finish_non_exhaustive()
    }
}

impl ProxyCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new(source: Arc<dyn LeaseSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            current: Mutex::new(None),
        }
    }

    /// Returns the cached lease, refreshing it first if missing or expired.
    ///
    /// # Errors
    ///
    /// Returns the source's error if a refresh was needed and failed. The
    /// previously cached lease, if any, is left in place.
    #[instrument(skip(self))]
    pub async fn lease(&self) -> Result<Arc<ProxyLease>, ProxyError> {
        let mut current = self.current.lock().await;
        let now = self.clock.now();

        if let Some(lease) = current.as_ref()
            && lease.is_valid_at(now)
        {
            debug!(address = %lease.address, expires_at = %lease.expires_at, "reusing proxy lease");
            return Ok(Arc::clone(lease));
        }

        let fresh = Arc::new(self.source.issue().await?);
        if !fresh.is_valid_at(now) {
            warn!(address = %fresh.address, expires_at = %fresh.expires_at, "issued proxy lease is already expired");
        }
        info!(address = %fresh.address, expires_at = %fresh.expires_at, "leased proxy address");
        *current = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Returns the cached lease without refreshing, valid or not.
    pub async fn current(&self) -> Option<Arc<ProxyLease>> {
        self.current.lock().await.clone()
    }
}
