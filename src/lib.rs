//! Harvester Core Library
//!
//! Concurrent harvesting of paginated seller-platform listings: fetch the
//! first page, plan the rest, run them on bounded per-topic worker pools
//! with retry and optional rotating-proxy egress, and merge the records
//! into one deduplicated set.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`proxy`] - Time-bounded proxy leases behind a single-slot cache
//! - [`transport`] - HTTP transport, error taxonomy, retry policy and attempt loop
//! - [`envelope`] - Response envelope and business-code checks
//! - [`pool`] - Named, independently bounded worker pools
//! - [`aggregate`] - Concurrent keyed result merging
//! - [`harvest`] - Pagination orchestration
//! - [`listings`] - Product, shipping-days and discount listings
//! - [`config`] - Defaults, config file and environment overrides
//! - [`context`] - Process-wide context built from a config

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod config;
pub mod context;
pub mod envelope;
pub mod harvest;
pub mod listings;
pub mod pool;
pub mod proxy;
pub mod transport;

// Re-export commonly used types
pub use aggregate::ResultAggregator;
pub use config::{ConfigError, HarvestConfig};
pub use context::{ContextError, HarvestContext};
pub use harvest::{
    HarvestError, HarvestOutcome, HarvestReport, HarvestRequest, Harvester, Listing, PageMapper,
    PageRef, RequestOptions,
};
pub use listings::{
    DiscountListing, ListingQuery, ProductIdListing, ProductListing, ShippingDaysListing,
};
pub use pool::{PoolError, TopicWorkerPool};
pub use proxy::{ProxyCache, ProxyError, ProxyLease};
pub use transport::{
    FailureType, FetchError, RetryExhausted, RetryPolicy, RetryingTransport, classify_error,
};
