//! Immutable description of one harvest.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::pool::TOPIC_PRODUCT;
use crate::transport::{ApiRequest, RetryPolicy};

/// Default safety bound on the number of pages a cursor harvest may fetch.
///
/// Counted harvests are unbounded unless a cap is set explicitly.
pub const DEFAULT_MAX_PAGES: u32 = 1000;

/// Identifies one page of a harvest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageRef {
    /// 1-based page number (counted pagination).
    Number(u32),
    /// Continuation token (cursor pagination); `None` for the first page.
    Cursor(Option<String>),
}

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "page {n}"),
            Self::Cursor(Some(cursor)) => write!(f, "cursor {cursor}"),
            Self::Cursor(None) => f.write_str("first cursor page"),
        }
    }
}

type MapFn = dyn Fn(&PageRef, &mut ApiRequest) + Send + Sync;

/// Writes a page reference into a request.
///
/// Mappers only ever see a fresh clone of the template, so they may mutate
/// freely.
#[derive(Clone)]
pub struct PageMapper(Arc<MapFn>);

impl fmt::Debug for PageMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PageMapper")
    }
}

impl PageMapper {
    /// Wraps an arbitrary mapping function.
    pub fn custom<F>(map: F) -> Self
    where
        F: Fn(&PageRef, &mut ApiRequest) + Send + Sync + 'static,
    {
        Self(Arc::new(map))
    }

    /// Puts the page number or cursor into query parameter `field`.
    ///
    /// The first cursor page removes the parameter.
    #[must_use]
    pub fn query(field: &'static str) -> Self {
        Self::custom(move |page, request| match page {
            PageRef::Number(n) => {
                request.query.insert(field.to_string(), n.to_string());
            }
            PageRef::Cursor(Some(cursor)) => {
                request.query.insert(field.to_string(), cursor.clone());
            }
            PageRef::Cursor(None) => {
                request.query.remove(field);
            }
        })
    }

    /// Puts `(page - 1) * step` into JSON body field `field`.
    ///
    /// Cursor pages are ignored.
    #[must_use]
    pub fn body_offset(field: &'static str, step: u64) -> Self {
        Self::custom(move |page, request| {
            let PageRef::Number(n) = page else {
                return;
            };
            let offset = u64::from(n.saturating_sub(1)) * step;
            let body = request
                .body
                .get_or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let Some(object) = body.as_object_mut() {
                object.insert(field.to_string(), serde_json::Value::from(offset));
            }
        })
    }

    /// Applies the mapping to `request`.
    pub fn apply(&self, page: &PageRef, request: &mut ApiRequest) {
        (self.0)(page, request);
    }
}

/// How the page set is discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationMode {
    /// Page 1 reports a total; pages `2..=ceil(total / page_size)` fan out to the pool.
    Counted {
        /// Records per page.
        page_size: u32,
    },
    /// Each page reports the next cursor; pages are fetched one after another.
    Cursor {
        /// Cursor of the first page, if resuming.
        seed: Option<String>,
        /// Records per page, used to bound the loop when the seed reports a total.
        page_size: Option<u32>,
    },
}

/// Which of two colliding records survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// Whichever page completed last.
    #[default]
    LastWrite,
    /// The record from the higher page number, independent of completion order.
    HigherPage,
}

/// Per-call request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Route every attempt through the rotating proxy.
    pub proxy: bool,
    /// Overrides the harvester's default retry policy.
    pub policy: Option<RetryPolicy>,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Extra headers for every page request.
    pub headers: Vec<(String, String)>,
}

/// Everything needed to run one harvest. Never mutated once built.
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    template: ApiRequest,
    mode: PaginationMode,
    mapper: PageMapper,
    topic: String,
    options: RequestOptions,
    tie_break: TieBreak,
    max_pages: Option<u32>,
    deadline: Option<Instant>,
}

impl HarvestRequest {
    /// Creates a counted-pagination harvest.
    #[must_use]
    pub fn counted(template: ApiRequest, page_size: u32, mapper: PageMapper) -> Self {
        Self::new(template, PaginationMode::Counted { page_size }, mapper, None)
    }

    /// Creates a cursor-pagination harvest.
    #[must_use]
    pub fn cursor(template: ApiRequest, mapper: PageMapper) -> Self {
        Self::new(
            template,
            PaginationMode::Cursor {
                seed: None,
                page_size: None,
            },
            mapper,
            Some(DEFAULT_MAX_PAGES),
        )
    }

    fn new(
        template: ApiRequest,
        mode: PaginationMode,
        mapper: PageMapper,
        max_pages: Option<u32>,
    ) -> Self {
        Self {
            template,
            mode,
            mapper,
            topic: TOPIC_PRODUCT.to_string(),
            options: RequestOptions::default(),
            tie_break: TieBreak::default(),
            max_pages,
            deadline: None,
        }
    }

    /// Sets the worker pool topic page tasks are submitted to.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Sets per-call request options.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the collision rule for records reported by more than one page.
    #[must_use]
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Caps the number of pages fetched, seed included.
    ///
    /// Counted pages above the cap are reported as truncated.
    #[must_use]
    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = Some(max_pages);
        self
    }

    /// Stops starting new page work once `deadline` passes.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Resumes a cursor harvest from `cursor`. No effect in counted mode.
    #[must_use]
    pub fn with_cursor_seed(mut self, cursor: impl Into<String>) -> Self {
        if let PaginationMode::Cursor { seed, .. } = &mut self.mode {
            *seed = Some(cursor.into());
        }
        self
    }

    /// Sets the page size used to bound a cursor harvest. No effect in counted mode.
    #[must_use]
    pub fn with_cursor_page_size(mut self, size: u32) -> Self {
        if let PaginationMode::Cursor { page_size, .. } = &mut self.mode {
            *page_size = Some(size);
        }
        self
    }

    /// Returns the request template.
    #[must_use]
    pub fn template(&self) -> &ApiRequest {
        &self.template
    }

    /// Returns the pagination mode.
    #[must_use]
    pub fn mode(&self) -> &PaginationMode {
        &self.mode
    }

    /// Returns the worker pool topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Returns the per-call options.
    #[must_use]
    pub fn options(&self) -> &RequestOptions {
        &self.options
    }

    /// Returns the collision rule.
    #[must_use]
    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    /// Returns the page cap, if any.
    #[must_use]
    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the reference of the first page.
    #[must_use]
    pub fn seed_page(&self) -> PageRef {
        match &self.mode {
            PaginationMode::Counted { .. } => PageRef::Number(1),
            PaginationMode::Cursor { seed, .. } => PageRef::Cursor(seed.clone()),
        }
    }

    /// Builds the request for `page`: a deep copy of the template with the
    /// page written in and the per-call options applied.
    #[must_use]
    pub fn request_for(&self, page: &PageRef) -> ApiRequest {
        let mut request = self.template.clone();
        self.mapper.apply(page, &mut request);
        request
            .headers
            .extend(self.options.headers.iter().cloned());
        if let Some(timeout) = self.options.timeout {
            request.timeout = Some(timeout);
        }
        request
    }

    /// Checks the request before any network traffic.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.max_pages == Some(0) {
            return Err("max_pages must be at least 1".to_string());
        }
        if self.topic.is_empty() {
            return Err("topic must not be empty".to_string());
        }
        match self.mode {
            PaginationMode::Counted { page_size: 0 }
            | PaginationMode::Cursor {
                page_size: Some(0), ..
            } => Err("page_size must be at least 1".to_string()),
            _ => Ok(()),
        }
    }
}
