//! Process-wide harvest context.
//!
//! Built once at startup from a validated [`HarvestConfig`] and passed to
//! whatever runs harvests. Owns the worker pool (with the `shop` and
//! `product` topics registered), the optional proxy cache and the retrying
//! transport.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, HarvestConfig};
use crate::harvest::{HarvestError, HarvestOutcome, HarvestRequest, Harvester, Listing};
use crate::pool::{PoolError, TOPIC_PRODUCT, TOPIC_SHOP, TopicWorkerPool};
use crate::proxy::{HttpLeaseSource, ProxyCache, ProxyError, SystemClock};
use crate::transport::{FetchError, HttpTransport, ReqwestTransport, RetryingTransport};

/// Errors raised while building a [`HarvestContext`].
#[derive(Debug, Error)]
pub enum ContextError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The HTTP transport could not be built.
    #[error("failed to build HTTP transport: {0}")]
    Transport(#[from] FetchError),

    /// The proxy source could not be built.
    #[error("failed to build proxy source: {0}")]
    Proxy(#[from] ProxyError),

    /// A topic could not be registered.
    #[error("failed to register worker topic: {0}")]
    Pool(#[from] PoolError),
}

/// Everything a harvest needs, built from one config.
#[derive(Debug)]
pub struct HarvestContext {
    config: HarvestConfig,
    pool: Arc<TopicWorkerPool>,
    proxy: Option<Arc<ProxyCache>>,
    harvester: Harvester,
}

impl HarvestContext {
    /// Validates `config` and builds the context.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the config is invalid or a component cannot be built.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, ContextError> {
        config.validate()?;
        let transport = ReqwestTransport::new(&config.base_url, config.client_settings())?;

        let proxy = if config.use_proxy {
            let host = config.proxy_host.as_deref().unwrap_or_default();
            let key = config.proxy_key.clone().unwrap_or_default();
            let source = HttpLeaseSource::new(
                transport.client().clone(),
                host,
                key,
                config.proxy_deadline_utc_offset_hours,
            )?;
            Some(Arc::new(ProxyCache::new(Arc::new(source), Arc::new(SystemClock))))
        } else {
            None
        };

        Self::with_transport(config, Arc::new(transport), proxy)
    }

    /// Builds the context around an existing transport and proxy cache.
    ///
    /// With `use_proxy` set, every harvest leases from `proxy`; without a
    /// cache each proxied attempt fails with [`ProxyError::NotConfigured`].
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the config is invalid or a topic cannot be registered.
    pub fn with_transport(
        config: &HarvestConfig,
        transport: Arc<dyn HttpTransport>,
        proxy: Option<Arc<ProxyCache>>,
    ) -> Result<Self, ContextError> {
        config.validate()?;

        let pool = Arc::new(TopicWorkerPool::new(config.max_blocking_tasks));
        for topic in [TOPIC_SHOP, TOPIC_PRODUCT] {
            pool.register_topic(topic, config.concurrency_for(topic))?;
        }

        let mut retrying = RetryingTransport::new(transport);
        if let Some(cache) = &proxy {
            retrying = retrying.with_proxy(Arc::clone(cache));
        }
        let harvester = Harvester::new(retrying, Arc::clone(&pool), config.retry_policy())
            .with_proxy_routing(config.use_proxy);

        info!(
            base_url = %config.base_url,
            shop = config.concurrency_for(TOPIC_SHOP),
            product = config.concurrency_for(TOPIC_PRODUCT),
            proxy = config.use_proxy,
            "harvest context ready"
        );

        Ok(Self {
            config: config.clone(),
            pool,
            proxy,
            harvester,
        })
    }

    /// The config the context was built from.
    #[must_use]
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// The shared worker pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<TopicWorkerPool> {
        &self.pool
    }

    /// The proxy cache, if proxy routing is configured.
    #[must_use]
    pub fn proxy(&self) -> Option<&Arc<ProxyCache>> {
        self.proxy.as_ref()
    }

    /// The harvester bound to this context.
    #[must_use]
    pub fn harvester(&self) -> &Harvester {
        &self.harvester
    }

    /// Runs one harvest through this context's harvester.
    ///
    /// # Errors
    ///
    /// See [`Harvester::harvest`].
    pub async fn harvest<L: Listing>(
        &self,
        listing: L,
        request: &HarvestRequest,
    ) -> Result<HarvestOutcome<L::Key, L::Output>, HarvestError> {
        self.harvester.harvest(Arc::new(listing), request).await
    }

    /// Drains and releases every topic.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Released`] if already released.
    pub async fn release(&self) -> Result<(), PoolError> {
        self.pool.release().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registers_both_topics_with_configured_widths() {
        let config = HarvestConfig {
            product_concurrency: Some(4),
            ..HarvestConfig::default()
        };
        let context = HarvestContext::from_config(&config).unwrap();
        assert_eq!(context.pool().concurrency(TOPIC_SHOP), Some(20));
        assert_eq!(context.pool().concurrency(TOPIC_PRODUCT), Some(4));
        assert!(context.proxy().is_none());
    }

    #[tokio::test]
    async fn test_proxy_cache_built_when_enabled() {
        let config = HarvestConfig {
            use_proxy: true,
            proxy_host: Some("https://proxy.example.com".to_string()),
            proxy_key: Some("key".to_string()),
            ..HarvestConfig::default()
        };
        let context = HarvestContext::from_config(&config).unwrap();
        assert!(context.proxy().is_some());
        assert!(context.harvester().routes_through_proxy());
    }

    #[tokio::test]
    async fn test_direct_by_default() {
        let context = HarvestContext::from_config(&HarvestConfig::default()).unwrap();
        assert!(!context.harvester().routes_through_proxy());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = HarvestConfig {
            topic_concurrency: 0,
            ..HarvestConfig::default()
        };
        assert!(matches!(
            HarvestContext::from_config(&config),
            Err(ContextError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_release_twice_fails() {
        let context = HarvestContext::from_config(&HarvestConfig::default()).unwrap();
        context.release().await.unwrap();
        assert_eq!(context.release().await, Err(PoolError::Released));
    }
}
