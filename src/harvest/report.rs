//! What a harvest did, beyond the records it returned.

use serde::Serialize;

use super::PageRef;
use crate::transport::FailureType;

/// A page that contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPage {
    /// The page.
    pub page: PageRef,
    /// Classification of the final error; `None` when the task panicked or was cancelled.
    pub failure: Option<FailureType>,
    /// Display form of the final error.
    pub message: String,
}

/// Completeness accounting for one harvest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    /// Total the seed page reported.
    pub total_reported: u64,
    /// Pages the plan called for, seed included.
    pub pages_planned: u32,
    /// Page tasks handed to the worker pool (counted mode).
    pub submitted: u32,
    /// Pages fetched and decoded, seed included.
    pub fetched: u32,
    /// Pages whose fetch failed after all attempts.
    pub failed: Vec<FailedPage>,
    /// Pages never started because the deadline passed.
    pub skipped: Vec<PageRef>,
    /// Pages left out by the page cap. In cursor mode this is a lower bound:
    /// only the next page is known.
    pub truncated: u32,
    /// Distinct keys in the result.
    pub records_kept: usize,
    /// Records the listing filtered out.
    pub records_filtered: usize,
}

impl HarvestReport {
    /// Returns true if every page the listing reported was fetched.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && self.truncated == 0
    }
}
