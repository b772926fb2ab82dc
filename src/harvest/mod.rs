//! Pagination orchestration.
//!
//! A harvest fetches the seed page through the retrying transport, plans the
//! remaining pages from what the seed reported, runs them, and drains the
//! aggregated records.
//!
//! # Overview
//!
//! - **Counted** mode: the seed reports `total`; pages
//!   `2..=ceil(total / page_size)` are submitted to the worker pool as
//!   independent tasks, then joined.
//! - **Cursor** mode: each page reports the next cursor, so pages run one
//!   after another on the calling task until the listing reports no next
//!   page or the page bound is hit.
//!
//! Only the seed page is load-bearing. Any later page that fails after all
//! attempts (or panics) is logged and recorded in the [`HarvestReport`]; the
//! harvest still returns whatever the other pages produced.

mod error;
mod listing;
mod report;
mod request;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, instrument, warn};

pub use error::HarvestError;
pub use listing::{Listing, PageInfo, PageResult};
pub use report::{FailedPage, HarvestReport};
pub use request::{
    DEFAULT_MAX_PAGES, HarvestRequest, PageMapper, PageRef, PaginationMode, RequestOptions,
    TieBreak,
};

use crate::aggregate::ResultAggregator;
use crate::pool::{PoolError, TaskHandle, TaskOutcome, TopicWorkerPool};
use crate::transport::{ApiRequest, RetryExhausted, RetryPolicy, RetryingTransport, classify_error};

/// Records and accounting of a finished harvest.
#[derive(Debug)]
pub struct HarvestOutcome<K, V> {
    /// Deduplicated records, ordered by key.
    pub records: Vec<(K, V)>,
    /// Completeness accounting.
    pub report: HarvestReport,
}

/// Record counters shared by page tasks.
#[derive(Debug, Default)]
struct Tally {
    filtered: AtomicUsize,
}

/// Per-harvest state shared by the seed, the page tasks and the final drain.
struct Sink<L: Listing> {
    listing: Arc<L>,
    aggregator: ResultAggregator<L::Key, L::Output>,
    tally: Tally,
    tie_break: TieBreak,
}

impl<L: Listing> Sink<L> {
    fn absorb(&self, records: Vec<L::Record>, rank: u64) -> usize {
        let mut stored = 0;
        for record in records {
            let entries = self.listing.extract(record);
            if entries.is_empty() {
                self.tally.filtered.fetch_add(1, Ordering::SeqCst);
                continue;
            }
            for (key, value) in entries {
                match self.tie_break {
                    TieBreak::LastWrite => self.aggregator.put(key, value),
                    TieBreak::HigherPage => {
                        self.aggregator.put_ranked(key, rank, value);
                    }
                }
                stored += 1;
            }
        }
        stored
    }
}

/// Runs harvests. Cheap to clone; clones share the transport and pool.
#[derive(Debug, Clone)]
pub struct Harvester {
    transport: RetryingTransport,
    pool: Arc<TopicWorkerPool>,
    policy: RetryPolicy,
    proxy: bool,
}

impl Harvester {
    /// Creates a harvester using `policy` unless a request overrides it.
    #[must_use]
    pub fn new(transport: RetryingTransport, pool: Arc<TopicWorkerPool>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            pool,
            policy,
            proxy: false,
        }
    }

    /// Routes every harvest through the transport's proxy cache, whatever
    /// the request's own [`RequestOptions::proxy`] says.
    #[must_use]
    pub fn with_proxy_routing(mut self, enabled: bool) -> Self {
        self.proxy = enabled;
        self
    }

    /// Returns true if every harvest is routed through the proxy.
    #[must_use]
    pub fn routes_through_proxy(&self) -> bool {
        self.proxy
    }

    /// Returns the worker pool page tasks are submitted to.
    #[must_use]
    pub fn pool(&self) -> &Arc<TopicWorkerPool> {
        &self.pool
    }

    /// Returns the default retry policy.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one harvest to completion.
    ///
    /// # Errors
    ///
    /// - [`HarvestError::Validation`] if the request is malformed
    /// - [`HarvestError::Seed`] if the seed page fails after all attempts
    /// - [`HarvestError::Pool`] if a page task could not be scheduled (tasks
    ///   already scheduled are awaited first)
    #[instrument(skip(self, listing, request), fields(path = %request.template().path, topic = %request.topic()))]
    pub async fn harvest<L: Listing>(
        &self,
        listing: Arc<L>,
        request: &HarvestRequest,
    ) -> Result<HarvestOutcome<L::Key, L::Output>, HarvestError> {
        request.validate().map_err(HarvestError::validation)?;

        let policy = request
            .options()
            .policy
            .clone()
            .unwrap_or_else(|| self.policy.clone());
        let proxy = self.proxy || request.options().proxy;

        let sink = Arc::new(Sink {
            listing,
            aggregator: ResultAggregator::new(),
            tally: Tally::default(),
            tie_break: request.tie_break(),
        });

        let seed_page = request.seed_page();
        let seed_request = request.request_for(&seed_page);
        let seed = fetch(&self.transport, &sink.listing, &seed_request, &policy, proxy)
            .await
            .map_err(|source| HarvestError::Seed { source })?;

        let mut report = HarvestReport {
            total_reported: seed.info.total,
            fetched: 1,
            ..HarvestReport::default()
        };
        let seed_info = seed.info.clone();
        sink.absorb(seed.records, 1);
        debug!(total = seed_info.total, %seed_page, "seed page fetched");

        let pool_error = match request.mode() {
            PaginationMode::Counted { page_size } => {
                self.fan_out(&sink, request, &policy, proxy, *page_size, &seed_info, &mut report)
                    .await
            }
            PaginationMode::Cursor { page_size, .. } => {
                self.walk_cursor(&sink, request, &policy, proxy, *page_size, seed_info, &mut report)
                    .await;
                None
            }
        };

        if let Some(error) = pool_error {
            return Err(HarvestError::Pool(error));
        }

        let records = sink.aggregator.drain_sorted();
        report.records_kept = records.len();
        report.records_filtered = sink.tally.filtered.load(Ordering::SeqCst);

        info!(
            records = report.records_kept,
            fetched = report.fetched,
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "harvest finished"
        );
        Ok(HarvestOutcome { records, report })
    }

    /// Submits pages `2..=total_pages` to the pool and joins them.
    ///
    /// Returns the pool error that stopped scheduling, if any.
    #[allow(clippy::too_many_arguments)]
    async fn fan_out<L: Listing>(
        &self,
        sink: &Arc<Sink<L>>,
        request: &HarvestRequest,
        policy: &RetryPolicy,
        proxy: bool,
        page_size: u32,
        seed_info: &PageInfo,
        report: &mut HarvestReport,
    ) -> Option<PoolError> {
        let reported_pages = counted_pages(seed_info.total, page_size);
        let total_pages = request
            .max_pages()
            .map_or(reported_pages, |cap| reported_pages.min(cap));
        report.pages_planned = total_pages;
        report.truncated = reported_pages - total_pages;
        if report.truncated > 0 {
            warn!(
                reported_pages,
                cap = total_pages,
                truncated = report.truncated,
                "page cap reached, later pages not fetched"
            );
        }
        debug!(total_pages, "planned counted pages");

        let mut handles: Vec<(u32, TaskHandle<Result<usize, RetryExhausted>>)> = Vec::new();
        let mut pool_error = None;

        for page in 2..=total_pages {
            if request.deadline_passed() {
                report.skipped.push(PageRef::Number(page));
                continue;
            }

            let page_request = request.request_for(&PageRef::Number(page));
            let transport = self.transport.clone();
            let policy = policy.clone();
            let sink = Arc::clone(sink);

            let task = async move {
                fetch(&transport, &sink.listing, &page_request, &policy, proxy)
                    .await
                    .map(|fetched| sink.absorb(fetched.records, u64::from(page)))
            };

            match self.pool.submit(request.topic(), task) {
                Ok(handle) => {
                    report.submitted += 1;
                    handles.push((page, handle));
                }
                Err(e) => {
                    warn!(page, error = %e, "failed to submit page task");
                    pool_error = Some(e);
                    break;
                }
            }
        }

        if !report.skipped.is_empty() {
            warn!(skipped = report.skipped.len(), "deadline passed, pages not started");
        }

        for (page, handle) in handles {
            let failed = match handle.wait().await {
                TaskOutcome::Completed(Ok(stored)) => {
                    debug!(page, stored, "page stored");
                    report.fetched += 1;
                    continue;
                }
                TaskOutcome::Completed(Err(e)) => {
                    warn!(page, error = %e, "page failed, skipping its records");
                    FailedPage {
                        page: PageRef::Number(page),
                        failure: Some(classify_error(&e.error)),
                        message: e.to_string(),
                    }
                }
                TaskOutcome::Panicked(message) => FailedPage {
                    page: PageRef::Number(page),
                    failure: None,
                    message: format!("page task panicked: {message}"),
                },
                TaskOutcome::Cancelled => FailedPage {
                    page: PageRef::Number(page),
                    failure: None,
                    message: "page task cancelled".to_string(),
                },
            };
            report.failed.push(failed);
        }

        pool_error
    }

    /// Follows cursors from the seed page, one page at a time.
    #[allow(clippy::too_many_arguments)]
    async fn walk_cursor<L: Listing>(
        &self,
        sink: &Arc<Sink<L>>,
        request: &HarvestRequest,
        policy: &RetryPolicy,
        proxy: bool,
        page_size: Option<u32>,
        seed_info: PageInfo,
        report: &mut HarvestReport,
    ) {
        // Pages after the seed.
        let cap = request.max_pages().map_or(u32::MAX, |max| max.saturating_sub(1));
        let mut remaining = cap;
        if let Some(size) = page_size
            && seed_info.total > 0
        {
            remaining = remaining.min(counted_pages(seed_info.total, size));
        }
        let capped = remaining == cap;
        report.pages_planned = remaining.saturating_add(1);

        let mut cursor = seed_info.next_cursor;
        let mut has_next = seed_info.has_next_page;
        let mut rank: u64 = 1;

        while has_next && remaining > 0 {
            let Some(current) = cursor.clone().filter(|c| !c.is_empty()) else {
                break;
            };
            let page = PageRef::Cursor(Some(current));
            if request.deadline_passed() {
                warn!(%page, "deadline passed, stopping cursor walk");
                report.skipped.push(page);
                break;
            }
            remaining -= 1;
            rank += 1;

            let page_request = request.request_for(&page);
            match fetch(&self.transport, &sink.listing, &page_request, policy, proxy).await {
                Ok(result) => {
                    let stored = sink.absorb(result.records, rank);
                    debug!(%page, stored, "cursor page stored");
                    report.fetched += 1;
                    cursor = result.info.next_cursor;
                    has_next = result.info.has_next_page;
                }
                Err(e) => {
                    // Keep the last known cursor and try again next iteration.
                    warn!(%page, error = %e, "cursor page failed, continuing");
                    report.failed.push(FailedPage {
                        failure: Some(classify_error(&e.error)),
                        message: e.to_string(),
                        page,
                    });
                }
            }
        }

        if capped
            && remaining == 0
            && has_next
            && cursor.as_deref().is_some_and(|c| !c.is_empty())
        {
            warn!(cap = request.max_pages(), "page cap reached, cursor walk stopped");
            report.truncated = 1;
        }
    }
}

async fn fetch<L: Listing>(
    transport: &RetryingTransport,
    listing: &Arc<L>,
    request: &ApiRequest,
    policy: &RetryPolicy,
    proxy: bool,
) -> Result<PageResult<L::Record>, RetryExhausted> {
    transport
        .execute_with(request, policy, proxy, |raw| listing.decode(&raw))
        .await
}

/// `ceil(total / page_size)`, at least 1 for the seed page.
fn counted_pages(total: u64, page_size: u32) -> u32 {
    let pages = total.div_ceil(u64::from(page_size.max(1))).max(1);
    u32::try_from(pages).unwrap_or(u32::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::envelope::decode_envelope;
    use crate::pool::TOPIC_PRODUCT;
    use crate::proxy::{LeaseSource, ManualClock, ProxyCache, ProxyError, ProxyLease};
    use crate::transport::{FetchError, HttpTransport, RawResponse, RecordingSleeper};

    /// Serves pages keyed by the `page_number` / `cursor` query value.
    #[derive(Default)]
    struct PagedTransport {
        pages: HashMap<String, Result<String, u16>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl PagedTransport {
        fn with(pages: Vec<(&str, Result<serde_json::Value, u16>)>) -> Arc<Self> {
            Arc::new(Self {
                pages: pages
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.map(|body| body.to_string())))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self, field: &str) -> Vec<String> {
            let mut seen: Vec<String> = self
                .requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.query.get(field).cloned().unwrap_or_default())
                .collect();
            seen.sort();
            seen
        }
    }

    #[async_trait]
    impl HttpTransport for PagedTransport {
        async fn send(
            &self,
            request: &ApiRequest,
            _proxy: Option<&str>,
        ) -> Result<RawResponse, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            let key = request
                .query
                .get("page_number")
                .or_else(|| request.query.get("cursor"))
                .cloned()
                .unwrap_or_default();
            match self.pages.get(&key) {
                Some(Ok(body)) => Ok(RawResponse::ok("https://x/", body.clone())),
                Some(Err(status)) => Err(FetchError::http_status("https://x/", *status)),
                None => Err(FetchError::http_status("https://x/", 404)),
            }
        }
    }

    /// Answers every page with one item whose ID is the page number, and
    /// records the proxy each attempt was given.
    struct EveryPage {
        total: u64,
        proxies: Mutex<Vec<Option<String>>>,
    }

    impl EveryPage {
        fn new(total: u64) -> Arc<Self> {
            Arc::new(Self {
                total,
                proxies: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for EveryPage {
        async fn send(
            &self,
            request: &ApiRequest,
            proxy: Option<&str>,
        ) -> Result<RawResponse, FetchError> {
            self.proxies.lock().unwrap().push(proxy.map(str::to_string));
            let id: u64 = request.query["page_number"].parse().unwrap();
            Ok(RawResponse::ok("https://x/", page(&[id], self.total).to_string()))
        }
    }

    #[derive(Debug, Deserialize)]
    struct Item {
        id: u64,
        #[serde(default)]
        skip: bool,
        #[serde(default)]
        tag: String,
    }

    #[derive(Debug, Deserialize)]
    struct ItemPage {
        items: Vec<Item>,
        total: u64,
        #[serde(default)]
        cursor: String,
    }

    struct Items;

    impl Listing for Items {
        type Record = Item;
        type Key = u64;
        type Output = String;

        fn decode(&self, raw: &RawResponse) -> Result<PageResult<Item>, FetchError> {
            let page: ItemPage = decode_envelope(raw)?;
            Ok(PageResult {
                records: page.items,
                info: PageInfo {
                    total: page.total,
                    has_next_page: !page.cursor.is_empty(),
                    next_cursor: Some(page.cursor).filter(|c| !c.is_empty()),
                },
            })
        }

        fn extract(&self, item: Item) -> Vec<(u64, String)> {
            if item.skip {
                return Vec::new();
            }
            vec![(item.id, item.tag)]
        }
    }

    fn page(ids: &[u64], total: u64) -> serde_json::Value {
        let items: Vec<_> = ids.iter().map(|id| json!({"id": id, "tag": format!("t{id}")})).collect();
        json!({"code": 0, "data": {"items": items, "total": total}})
    }

    fn harvester(transport: Arc<PagedTransport>, width: usize) -> Harvester {
        let pool = Arc::new(TopicWorkerPool::default());
        pool.register_topic(TOPIC_PRODUCT, width).unwrap();
        let retrying =
            RetryingTransport::new(transport).with_sleeper(Arc::new(RecordingSleeper::new()));
        Harvester::new(retrying, pool, RetryPolicy::new(2, Duration::ZERO))
    }

    fn counted(page_size: u32) -> HarvestRequest {
        HarvestRequest::counted(ApiRequest::get("/items"), page_size, PageMapper::query("page_number"))
    }

    #[tokio::test]
    async fn test_counted_fans_out_remaining_pages() {
        let transport = PagedTransport::with(vec![
            ("1", Ok(page(&[1, 2], 100))),
            ("2", Ok(page(&[3, 4], 100))),
            ("3", Ok(page(&[5], 100))),
        ]);
        let harvester = harvester(transport.clone(), 4);

        let outcome = harvester.harvest(Arc::new(Items), &counted(48)).await.unwrap();

        assert_eq!(transport.seen("page_number"), vec!["1", "2", "3"]);
        assert_eq!(outcome.report.submitted, 2);
        assert_eq!(outcome.report.pages_planned, 3);
        assert_eq!(outcome.report.fetched, 3);
        let keys: Vec<u64> = outcome.records.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
        assert!(outcome.report.is_complete());
    }

    #[tokio::test]
    async fn test_counted_plans_every_reported_page() {
        let transport = EveryPage::new(1100);
        let pool = Arc::new(TopicWorkerPool::default());
        pool.register_topic(TOPIC_PRODUCT, 16).unwrap();
        let harvester = Harvester::new(
            RetryingTransport::new(transport),
            pool,
            RetryPolicy::new(1, Duration::ZERO),
        );

        let outcome = harvester.harvest(Arc::new(Items), &counted(1)).await.unwrap();

        assert_eq!(outcome.report.pages_planned, 1100);
        assert_eq!(outcome.report.submitted, 1099);
        assert_eq!(outcome.records.len(), 1100);
        assert_eq!(outcome.report.truncated, 0);
        assert!(outcome.report.is_complete());
    }

    #[tokio::test]
    async fn test_counted_cap_reports_truncated_pages() {
        let transport = EveryPage::new(30);
        let pool = Arc::new(TopicWorkerPool::default());
        pool.register_topic(TOPIC_PRODUCT, 4).unwrap();
        let harvester = Harvester::new(
            RetryingTransport::new(transport),
            pool,
            RetryPolicy::new(1, Duration::ZERO),
        );
        let request = counted(1).with_max_pages(5);

        let outcome = harvester.harvest(Arc::new(Items), &request).await.unwrap();

        let keys: Vec<u64> = outcome.records.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3, 4, 5]);
        assert_eq!(outcome.report.submitted, 4);
        assert_eq!(outcome.report.truncated, 25);
        assert!(!outcome.report.is_complete());
    }

    #[tokio::test]
    async fn test_proxy_routing_applies_to_every_page() {
        let transport = EveryPage::new(3);
        let pool = Arc::new(TopicWorkerPool::default());
        pool.register_topic(TOPIC_PRODUCT, 2).unwrap();
        let cache = Arc::new(ProxyCache::new(
            Arc::new(FixedLease),
            Arc::new(ManualClock::new(Utc::now())),
        ));
        let retrying = RetryingTransport::new(transport.clone()).with_proxy(cache);
        let harvester = Harvester::new(retrying, pool, RetryPolicy::new(1, Duration::ZERO))
            .with_proxy_routing(true);

        let outcome = harvester.harvest(Arc::new(Items), &counted(1)).await.unwrap();

        assert_eq!(outcome.records.len(), 3);
        let proxies = transport.proxies.lock().unwrap();
        assert_eq!(proxies.len(), 3);
        assert!(proxies.iter().all(|p| p.as_deref() == Some("10.1.1.1:3128")));
    }

    #[tokio::test]
    async fn test_direct_unless_routing_requested() {
        let transport = EveryPage::new(2);
        let harvester = Harvester::new(
            RetryingTransport::new(transport.clone()),
            Arc::new(TopicWorkerPool::default()),
            RetryPolicy::new(1, Duration::ZERO),
        );
        harvester.pool().register_topic(TOPIC_PRODUCT, 1).unwrap();

        harvester.harvest(Arc::new(Items), &counted(1)).await.unwrap();

        assert_eq!(*transport.proxies.lock().unwrap(), vec![None, None]);
    }

    struct FixedLease;

    #[async_trait]
    impl LeaseSource for FixedLease {
        async fn issue(&self) -> Result<ProxyLease, ProxyError> {
            Ok(ProxyLease {
                address: "10.1.1.1:3128".to_string(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            })
        }
    }

    #[tokio::test]
    async fn test_zero_total_returns_seed_content_only() {
        let transport = PagedTransport::with(vec![("1", Ok(page(&[9], 0)))]);
        let harvester = harvester(transport.clone(), 2);

        let outcome = harvester.harvest(Arc::new(Items), &counted(48)).await.unwrap();

        assert_eq!(outcome.report.submitted, 0);
        assert_eq!(outcome.records, vec![(9, "t9".to_string())]);
        assert_eq!(transport.seen("page_number"), vec!["1"]);
    }

    #[tokio::test]
    async fn test_seed_failure_is_fatal() {
        let transport = PagedTransport::with(vec![("1", Err(503))]);
        let harvester = harvester(transport, 2);

        let error = harvester.harvest(Arc::new(Items), &counted(48)).await.unwrap_err();

        let HarvestError::Seed { source } = error else {
            panic!("expected seed error");
        };
        assert_eq!(source.attempts, 2);
    }

    #[tokio::test]
    async fn test_page_failure_yields_partial_result() {
        let transport = PagedTransport::with(vec![
            ("1", Ok(page(&[1], 30))),
            ("2", Err(500)),
            ("3", Ok(page(&[3], 30))),
        ]);
        let harvester = harvester(transport, 2);

        let outcome = harvester.harvest(Arc::new(Items), &counted(10)).await.unwrap();

        let keys: Vec<u64> = outcome.records.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 3]);
        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.failed[0].page, PageRef::Number(2));
        assert_eq!(
            outcome.report.failed[0].failure,
            Some(crate::transport::FailureType::Server)
        );
    }

    #[tokio::test]
    async fn test_higher_page_wins_on_collision() {
        let mut p2 = page(&[7], 30);
        p2["data"]["items"][0]["tag"] = json!("from page 2");
        let mut p3 = page(&[7], 30);
        p3["data"]["items"][0]["tag"] = json!("from page 3");
        let transport =
            PagedTransport::with(vec![("1", Ok(page(&[], 30))), ("2", Ok(p2)), ("3", Ok(p3))]);
        let harvester = harvester(transport, 4);
        let request = counted(10).with_tie_break(TieBreak::HigherPage);

        let outcome = harvester.harvest(Arc::new(Items), &request).await.unwrap();

        assert_eq!(outcome.records, vec![(7, "from page 3".to_string())]);
    }

    #[tokio::test]
    async fn test_filtered_records_are_counted() {
        let body = json!({"code": 0, "data": {"items": [
            {"id": 1}, {"id": 2, "skip": true}, {"id": 3, "skip": true}
        ], "total": 3}});
        let transport = PagedTransport::with(vec![("1", Ok(body))]);
        let harvester = harvester(transport, 1);

        let outcome = harvester.harvest(Arc::new(Items), &counted(48)).await.unwrap();

        assert_eq!(outcome.report.records_kept, 1);
        assert_eq!(outcome.report.records_filtered, 2);
    }

    #[tokio::test]
    async fn test_past_deadline_skips_fan_out() {
        let transport = PagedTransport::with(vec![("1", Ok(page(&[1], 30)))]);
        let harvester = harvester(transport.clone(), 2);
        let request = counted(10).with_deadline(tokio::time::Instant::now());

        let outcome = harvester.harvest(Arc::new(Items), &request).await.unwrap();

        assert_eq!(
            outcome.report.skipped,
            vec![PageRef::Number(2), PageRef::Number(3)]
        );
        assert_eq!(outcome.report.submitted, 0);
        assert_eq!(transport.seen("page_number"), vec!["1"]);
    }

    #[tokio::test]
    async fn test_unregistered_topic_aborts_with_pool_error() {
        let transport = PagedTransport::with(vec![("1", Ok(page(&[1], 30)))]);
        let harvester = harvester(transport, 2);
        let request = counted(10).with_topic("nope");

        let error = harvester.harvest(Arc::new(Items), &request).await.unwrap_err();

        assert!(matches!(
            error,
            HarvestError::Pool(crate::pool::PoolError::UnknownTopic { .. })
        ));
    }

    fn cursor_page(ids: &[u64], cursor: &str) -> serde_json::Value {
        let items: Vec<_> = ids.iter().map(|id| json!({"id": id})).collect();
        json!({"code": 0, "data": {"items": items, "total": 0, "cursor": cursor}})
    }

    #[tokio::test]
    async fn test_cursor_walks_until_no_next_page() {
        let transport = PagedTransport::with(vec![
            ("", Ok(cursor_page(&[1], "c2"))),
            ("c2", Ok(cursor_page(&[2], "c3"))),
            ("c3", Ok(cursor_page(&[3], ""))),
        ]);
        let harvester = harvester(transport, 1);
        let request = HarvestRequest::cursor(ApiRequest::get("/items"), PageMapper::query("cursor"));

        let outcome = harvester.harvest(Arc::new(Items), &request).await.unwrap();

        let keys: Vec<u64> = outcome.records.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(outcome.report.fetched, 3);
        assert_eq!(outcome.report.submitted, 0);
    }

    #[tokio::test]
    async fn test_cursor_failure_retries_last_cursor_within_bound() {
        let transport = PagedTransport::with(vec![
            ("", Ok(cursor_page(&[1], "c2"))),
            ("c2", Err(500)),
        ]);
        let harvester = harvester(transport.clone(), 1);
        let request = HarvestRequest::cursor(ApiRequest::get("/items"), PageMapper::query("cursor"))
            .with_max_pages(4);

        let outcome = harvester.harvest(Arc::new(Items), &request).await.unwrap();

        assert_eq!(outcome.records.len(), 1);
        // Three cursor iterations after the seed, each with two attempts.
        assert_eq!(outcome.report.failed.len(), 3);
        assert_eq!(transport.seen("cursor").iter().filter(|c| *c == "c2").count(), 6);
    }

    #[tokio::test]
    async fn test_validation_happens_before_requests() {
        let transport = PagedTransport::with(vec![]);
        let harvester = harvester(transport.clone(), 1);

        let error = harvester.harvest(Arc::new(Items), &counted(0)).await.unwrap_err();

        assert!(matches!(error, HarvestError::Validation { .. }));
        assert!(transport.requests.lock().unwrap().is_empty());
    }
}
