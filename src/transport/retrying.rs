//! The attempt loop: one logical request, up to `max_attempts` physical ones.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::client::{ApiRequest, HttpTransport, RawResponse};
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use super::{FetchError, RetryExhausted};
use crate::proxy::{ProxyCache, ProxyError};

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends the current task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// [`Sleeper`] that returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the delays requested so far, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

/// Executes requests with a fixed-delay retry policy, optionally through the
/// rotating proxy.
///
/// Cheap to clone; clones share the inner transport, proxy cache and sleeper.
#[derive(Clone)]
pub struct RetryingTransport {
    inner: Arc<dyn HttpTransport>,
    proxy: Option<Arc<ProxyCache>>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingTransport")
            .field("proxy", &self.proxy.is_some())
            .finish_non_exhaustive()
    }
}

impl RetryingTransport {
    /// Wraps `inner` with real sleeps and no proxy cache.
    #[must_use]
    pub fn new(inner: Arc<dyn HttpTransport>) -> Self {
        Self {
            inner,
            proxy: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Attaches the proxy cache consulted when proxy routing is requested.
    #[must_use]
    pub fn with_proxy(mut self, cache: Arc<ProxyCache>) -> Self {
        self.proxy = Some(cache);
        self
    }

    /// Replaces the sleeper used between attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Returns true if a proxy cache is attached.
    #[must_use]
    pub fn has_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    /// Executes `request`, returning the first successful raw response.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] carrying the last attempt's error once the
    /// policy declines another attempt.
    pub async fn execute(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
        proxy_enabled: bool,
    ) -> Result<RawResponse, RetryExhausted> {
        self.execute_with(request, policy, proxy_enabled, Ok).await
    }

    /// Executes `request` and decodes it with `decode` inside the attempt loop.
    ///
    /// Decoding is part of the attempt: a business-level rate-limit answer
    /// is retried exactly like an HTTP 429.
    ///
    /// # Errors
    ///
    /// Returns [`RetryExhausted`] once the policy declines another attempt.
    #[instrument(skip(self, request, policy, decode), fields(path = %request.path, proxy = proxy_enabled))]
    pub async fn execute_with<T, F>(
        &self,
        request: &ApiRequest,
        policy: &RetryPolicy,
        proxy_enabled: bool,
        decode: F,
    ) -> Result<T, RetryExhausted>
    where
        F: Fn(RawResponse) -> Result<T, FetchError> + Send + Sync,
        T: Send,
    {
        let mut attempt = 1;
        loop {
            let result = match self.attempt(request, proxy_enabled).await {
                Ok(raw) => decode(raw),
                Err(error) => Err(error),
            };

            let error = match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match policy.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next,
                } => {
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "attempt failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt = next;
                }
                RetryDecision::DoNotRetry { reason } => {
                    let failure = classify_error(&error);
                    warn!(
                        attempts = attempt,
                        failure = %failure,
                        retryable = policy.is_retryable(&error),
                        reason = %reason,
                        error = %error,
                        "request failed"
                    );
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        proxy_enabled: bool,
    ) -> Result<RawResponse, FetchError> {
        if !proxy_enabled {
            return self.inner.send(request, None).await;
        }
        let cache = self.proxy.as_ref().ok_or(ProxyError::NotConfigured)?;
        let lease = cache.lease().await?;
        debug!(proxy = %lease.address, "routing attempt through proxy");
        self.inner.send(request, Some(&lease.address)).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::proxy::{Clock, LeaseSource, ManualClock, ProxyLease};
    use crate::transport::RetryMode;

    /// Replays scripted outcomes and records the proxy each call was routed through.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<RawResponse, FetchError>>>,
        proxies: Mutex<Vec<Option<String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<RawResponse, FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(
            &self,
            _request: &ApiRequest,
            proxy: Option<&str>,
        ) -> Result<RawResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.proxies.lock().unwrap().push(proxy.map(str::to_string));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RawResponse::ok("https://x/", "{}")))
        }
    }

    struct FixedLease;

    #[async_trait]
    impl LeaseSource for FixedLease {
        async fn issue(&self) -> Result<ProxyLease, ProxyError> {
            Ok(ProxyLease {
                address: "10.0.0.1:3128".to_string(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            })
        }
    }

    fn server_error() -> FetchError {
        FetchError::http_status("https://x/", 503)
    }

    fn retrying(inner: Arc<ScriptedTransport>) -> (RetryingTransport, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let transport = RetryingTransport::new(inner).with_sleeper(sleeper.clone());
        (transport, sleeper)
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds_sleeps_twice() {
        let inner = ScriptedTransport::new(vec![
            Err(server_error()),
            Err(server_error()),
            Ok(RawResponse::ok("https://x/", "done")),
        ]);
        let (transport, sleeper) = retrying(inner.clone());
        let policy = RetryPolicy::new(3, Duration::from_millis(2000));

        let response = transport
            .execute(&ApiRequest::get("/p"), &policy, false)
            .await
            .unwrap();

        assert_eq!(response.body, "done");
        assert_eq!(inner.calls(), 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(2000), Duration::from_millis(2000)]
        );
    }

    #[tokio::test]
    async fn test_stops_on_first_success() {
        let inner = ScriptedTransport::new(vec![Ok(RawResponse::ok("https://x/", "first"))]);
        let (transport, sleeper) = retrying(inner.clone());

        let response = transport
            .execute(&ApiRequest::get("/p"), &RetryPolicy::default(), false)
            .await
            .unwrap();

        assert_eq!(response.body, "first");
        assert_eq!(inner.calls(), 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let inner = ScriptedTransport::new(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
        ]);
        let (transport, sleeper) = retrying(inner.clone());

        let error = transport
            .execute(&ApiRequest::get("/p"), &RetryPolicy::new(3, Duration::ZERO), false)
            .await
            .unwrap_err();

        assert_eq!(error.attempts, 3);
        assert!(matches!(error.error, FetchError::HttpStatus { status: 503, .. }));
        assert_eq!(sleeper.recorded().len(), 2);
    }

    #[tokio::test]
    async fn test_short_circuit_on_terminal_error() {
        let inner = ScriptedTransport::new(vec![Err(FetchError::http_status("https://x/", 404))]);
        let (transport, _) = retrying(inner.clone());

        let error = transport
            .execute(&ApiRequest::get("/p"), &RetryPolicy::default(), false)
            .await
            .unwrap_err();

        assert_eq!(error.attempts, 1);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_unconditional_mode_uses_every_attempt() {
        let not_found = || Err(FetchError::http_status("https://x/", 404));
        let inner = ScriptedTransport::new(vec![not_found(), not_found(), not_found()]);
        let (transport, _) = retrying(inner.clone());
        let policy =
            RetryPolicy::new(3, Duration::ZERO).with_mode(RetryMode::Unconditional);

        let error = transport
            .execute(&ApiRequest::get("/p"), &policy, false)
            .await
            .unwrap_err();

        assert_eq!(error.attempts, 3);
        assert_eq!(inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_decode_failure_is_retried_when_retryable() {
        let inner = ScriptedTransport::new(vec![
            Ok(RawResponse::ok("https://x/", "slow down")),
            Ok(RawResponse::ok("https://x/", "ok")),
        ]);
        let (transport, sleeper) = retrying(inner.clone());

        let body = transport
            .execute_with(
                &ApiRequest::get("/p"),
                &RetryPolicy::new(3, Duration::from_millis(10)),
                false,
                |raw| {
                    if raw.body == "slow down" {
                        Err(FetchError::rate_limited("requests too frequent"))
                    } else {
                        Ok(raw.body)
                    }
                },
            )
            .await
            .unwrap();

        assert_eq!(body, "ok");
        assert_eq!(sleeper.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_proxy_without_cache_fails_each_attempt() {
        let inner = ScriptedTransport::new(vec![]);
        let (transport, _) = retrying(inner.clone());

        let error = transport
            .execute(&ApiRequest::get("/p"), &RetryPolicy::new(2, Duration::ZERO), true)
            .await
            .unwrap_err();

        assert!(matches!(
            error.error,
            FetchError::Proxy(ProxyError::NotConfigured)
        ));
        assert_eq!(error.attempts, 2);
        assert_eq!(inner.calls(), 0);
    }

    #[tokio::test]
    async fn test_proxied_attempt_uses_lease_address() {
        let inner = ScriptedTransport::new(vec![]);
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Utc::now()));
        let cache = Arc::new(ProxyCache::new(Arc::new(FixedLease), clock));
        let (transport, _) = retrying(inner.clone());
        let transport = transport.with_proxy(cache);

        transport
            .execute(&ApiRequest::get("/p"), &RetryPolicy::default(), true)
            .await
            .unwrap();

        let proxies = inner.proxies.lock().unwrap().clone();
        assert_eq!(proxies, vec![Some("10.0.0.1:3128".to_string())]);
    }
}
