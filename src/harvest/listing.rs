//! The per-endpoint seam: how to decode a page and key its records.

use std::hash::Hash;

use crate::transport::{FetchError, RawResponse};

/// Pagination metadata reported by one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Total number of records the listing holds.
    pub total: u64,
    /// Cursor of the following page, if the endpoint uses cursors.
    pub next_cursor: Option<String>,
    /// Whether another page exists.
    pub has_next_page: bool,
}

/// One decoded page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult<R> {
    /// Records on this page.
    pub records: Vec<R>,
    /// Pagination metadata.
    pub info: PageInfo,
}

/// A paginated endpoint the harvester can walk.
///
/// Implementations are shared across page tasks and must be cheap to call
/// concurrently.
pub trait Listing: Send + Sync + 'static {
    /// A record as decoded from the page.
    type Record: Send + 'static;
    /// Natural key of a harvested record.
    type Key: Eq + Hash + Ord + Clone + Send + Sync + 'static;
    /// What is stored per key.
    type Output: Send + Sync + 'static;

    /// Decodes a raw page, checking the business envelope first.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`]; retryable ones are retried by the transport.
    fn decode(&self, raw: &RawResponse) -> Result<PageResult<Self::Record>, FetchError>;

    /// Turns a record into zero or more keyed entries.
    ///
    /// An empty vector means the record was filtered out.
    fn extract(&self, record: Self::Record) -> Vec<(Self::Key, Self::Output)>;
}
