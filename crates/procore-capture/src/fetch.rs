//! Active paginated fetcher.
//!
//! Crawls the REST endpoints behind each tool with its own requests. Every
//! crawl is bounded (page ceiling, consecutive-error limit) and follows a
//! partial-success policy: whatever was accumulated before a stop is
//! returned, and no crawl ever fails outright.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::intercept::pagination_from_headers;
use crate::normalize::{self, dedup_by_id};
use crate::transport::{HttpRequest, Transport};
use crate::types::{
    CanonicalRecord, CaptureError, CaptureResult, Commitment, Drawing, LookupMap, ResourceKind,
    ResourcePage, Rfi, Specification,
};

/// Hard page ceiling for a single crawl.
pub const MAX_PAGES: u32 = 100;

/// Page ceiling for each commitment endpoint.
pub const COMMITMENT_MAX_PAGES: u32 = 50;

/// Consecutive failures after which a crawl gives up.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Commitments are split across three endpoints.
const COMMITMENT_ENDPOINTS: [&str; 3] = [
    "commitments",
    "purchase_order_contracts",
    "work_order_contracts",
];

/// Callback receiving `(items_so_far, total_from_header)` after each page.
pub type ProgressFn<'a> = dyn Fn(usize, Option<u64>) + Send + Sync + 'a;

/// Why a crawl stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The server returned an empty or short page.
    Exhausted,
    /// The page ceiling was reached.
    PageLimit,
    /// Too many consecutive failures.
    TooManyErrors,
    /// The endpoint URL could not be built.
    InvalidEndpoint,
}

/// Result of one crawl. Always carries whatever was accumulated.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlOutcome<T> {
    pub items: Vec<T>,
    pub pages_fetched: u32,
    pub requests: u32,
    pub stop_reason: StopReason,
}

impl<T> CrawlOutcome<T> {
    fn empty(stop_reason: StopReason) -> Self {
        Self {
            items: Vec::new(),
            pages_fetched: 0,
            requests: 0,
            stop_reason,
        }
    }

    /// Whether the crawl stopped before the server signalled the end.
    pub fn is_partial(&self) -> bool {
        self.stop_reason != StopReason::Exhausted
    }

    fn absorb(&mut self, other: CrawlOutcome<T>) {
        self.items.extend(other.items);
        self.pages_fetched += other.pages_fetched;
        self.requests += other.requests;
        if self.stop_reason == StopReason::Exhausted {
            self.stop_reason = other.stop_reason;
        }
    }
}

/// A resource type plus the path parameters it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceRequest {
    Drawings { project_id: u64, area_id: u64 },
    Rfis { project_id: u64 },
    Commitments { project_id: u64 },
    Specifications { company_id: u64, project_id: u64 },
}

impl ResourceRequest {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Drawings { .. } => ResourceKind::Drawings,
            Self::Rfis { .. } => ResourceKind::Rfis,
            Self::Commitments { .. } => ResourceKind::Commitments,
            Self::Specifications { .. } => ResourceKind::Specifications,
        }
    }
}

/// Everything one `fetch` call produced.
#[derive(Debug, Clone, Serialize)]
pub struct FetchReport {
    pub kind: ResourceKind,
    pub records: Vec<CanonicalRecord>,
    /// Disciplines for drawings, divisions for specifications; empty when
    /// unavailable or not applicable.
    pub lookup: LookupMap,
    pub pages_fetched: u32,
    pub requests: u32,
    pub stop_reason: StopReason,
    pub partial: bool,
}

impl FetchReport {
    fn from_outcome<T>(
        kind: ResourceKind,
        outcome: CrawlOutcome<T>,
        lookup: LookupMap,
        wrap: fn(T) -> CanonicalRecord,
    ) -> Self {
        let partial = outcome.is_partial();
        Self {
            kind,
            records: outcome.items.into_iter().map(wrap).collect(),
            lookup,
            pages_fetched: outcome.pages_fetched,
            requests: outcome.requests,
            stop_reason: outcome.stop_reason,
            partial,
        }
    }
}

/// Crawls known REST endpoints through an injected transport.
pub struct PaginatedFetcher {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl PaginatedFetcher {
    pub fn new(transport: Arc<dyn Transport>, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET one page and pull the item array out of it.
    pub async fn fetch_page(&self, url: &str) -> CaptureResult<ResourcePage<Value>> {
        let response = self.transport.send(HttpRequest::json(url)).await?;
        if !response.is_success() {
            return Err(CaptureError::Http {
                status: response.status,
                url: url.to_string(),
            });
        }
        if !response.is_json() {
            return Err(CaptureError::Decode(format!("non-JSON response from {url}")));
        }
        let body: Value = serde_json::from_str(&response.body)
            .map_err(|e| CaptureError::Decode(format!("{url}: {e}")))?;

        let pagination = pagination_from_headers(&response.headers);
        Ok(ResourcePage {
            items: normalize::extract_items(&body).to_vec(),
            total: pagination.total,
            per_page: pagination.per_page,
        })
    }

    /// Page through `endpoint` until a short page, the ceiling, or three
    /// consecutive failures.
    ///
    /// Transport and HTTP failures retry the same page. Decode failures
    /// drop the page and move on. Both count toward the error limit.
    pub async fn crawl<T, N>(
        &self,
        endpoint: &str,
        per_page: u32,
        max_pages: u32,
        normalize_page: N,
        progress: Option<&ProgressFn<'_>>,
    ) -> CrawlOutcome<T>
    where
        N: Fn(&[Value]) -> Vec<T> + Send + Sync,
        T: Send,
    {
        let base = match Url::parse(endpoint) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!("Cannot crawl {endpoint}: {e}");
                return CrawlOutcome::empty(StopReason::InvalidEndpoint);
            }
        };

        tracing::info!("Crawling {endpoint} (per_page={per_page}, max_pages={max_pages})");

        let mut outcome = CrawlOutcome::empty(StopReason::Exhausted);
        let mut page = 1u32;
        let mut has_more = true;
        let mut consecutive_errors = 0u32;

        while has_more && consecutive_errors < MAX_CONSECUTIVE_ERRORS {
            if page > max_pages {
                outcome.stop_reason = StopReason::PageLimit;
                break;
            }

            let mut url = base.clone();
            url.query_pairs_mut()
                .append_pair("page", &page.to_string())
                .append_pair("per_page", &per_page.to_string());

            outcome.requests += 1;
            match self.fetch_page(url.as_str()).await {
                Ok(resource_page) => {
                    consecutive_errors = 0;
                    outcome.pages_fetched += 1;

                    let served = resource_page.items.len();
                    outcome.items.extend(normalize_page(&resource_page.items));
                    if let Some(report) = progress {
                        report(outcome.items.len(), resource_page.total);
                    }

                    if served == 0 || served < per_page as usize {
                        has_more = false;
                    } else if page >= max_pages {
                        tracing::warn!("Page ceiling {max_pages} reached for {endpoint}");
                        outcome.stop_reason = StopReason::PageLimit;
                        has_more = false;
                    } else {
                        page += 1;
                    }
                }
                Err(CaptureError::Decode(e)) => {
                    consecutive_errors += 1;
                    tracing::debug!("Dropping page {page}: {e}");
                    page += 1;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::warn!(
                        "Page {page} failed ({consecutive_errors}/{MAX_CONSECUTIVE_ERRORS}): {e}"
                    );
                }
            }
        }

        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            outcome.stop_reason = StopReason::TooManyErrors;
        }

        tracing::info!(
            "Crawl of {endpoint} finished: {} items, {} pages, {} requests, {:?}",
            outcome.items.len(),
            outcome.pages_fetched,
            outcome.requests,
            outcome.stop_reason
        );
        outcome
    }

    /// All drawings in a drawing area.
    pub async fn fetch_drawings(
        &self,
        project_id: u64,
        area_id: u64,
        progress: Option<&ProgressFn<'_>>,
    ) -> CrawlOutcome<Drawing> {
        let endpoint = self.endpoint(&format!(
            "/rest/v1.1/projects/{project_id}/drawing_areas/{area_id}/drawing_log"
        ));
        self.crawl(
            &endpoint,
            ResourceKind::Drawings.page_size(),
            MAX_PAGES,
            normalize::normalize_drawings,
            progress,
        )
        .await
    }

    /// All RFIs in a project.
    pub async fn fetch_rfis(&self, project_id: u64, progress: Option<&ProgressFn<'_>>) -> CrawlOutcome<Rfi> {
        let endpoint = self.endpoint(&format!("/rest/v1.0/projects/{project_id}/rfis"));
        self.crawl(
            &endpoint,
            ResourceKind::Rfis.page_size(),
            MAX_PAGES,
            normalize::normalize_rfis,
            progress,
        )
        .await
    }

    /// Commitments from the generic, purchase-order, and work-order
    /// endpoints, crawled in sequence and deduplicated by id.
    pub async fn fetch_commitments(
        &self,
        project_id: u64,
        progress: Option<&ProgressFn<'_>>,
    ) -> CrawlOutcome<Commitment> {
        let mut combined = CrawlOutcome::empty(StopReason::Exhausted);

        for path in COMMITMENT_ENDPOINTS {
            let endpoint = self.endpoint(&format!("/rest/v1.0/projects/{project_id}/{path}"));
            let offset = combined.items.len();
            let shifted = move |n: usize, total: Option<u64>| {
                if let Some(report) = progress {
                    report(offset + n, total);
                }
            };
            let outcome = self
                .crawl(
                    &endpoint,
                    ResourceKind::Commitments.page_size(),
                    COMMITMENT_MAX_PAGES,
                    normalize::normalize_commitments,
                    Some(&shifted),
                )
                .await;
            combined.absorb(outcome);
        }

        let before = combined.items.len();
        combined.items = dedup_by_id(combined.items);
        if combined.items.len() < before {
            tracing::debug!(
                "Removed {} duplicate commitments",
                before - combined.items.len()
            );
        }
        combined
    }

    /// All specification sections in a project.
    pub async fn fetch_specifications(
        &self,
        company_id: u64,
        project_id: u64,
        progress: Option<&ProgressFn<'_>>,
    ) -> CrawlOutcome<Specification> {
        let endpoint = self.endpoint(&format!(
            "/rest/v2.1/companies/{company_id}/projects/{project_id}/specification_sections"
        ));
        self.crawl(
            &endpoint,
            ResourceKind::Specifications.page_size(),
            MAX_PAGES,
            normalize::normalize_specifications,
            progress,
        )
        .await
    }

    /// Discipline lookup for a drawing area. Empty on any failure.
    pub async fn fetch_disciplines(&self, project_id: u64, area_id: u64) -> LookupMap {
        let url = self.endpoint(&format!(
            "/rest/v1.1/projects/{project_id}/drawing_areas/{area_id}/drawing_disciplines"
        ));
        match self.fetch_page(&url).await {
            Ok(page) => normalize::discipline_lookup(&page.items),
            Err(e) => {
                tracing::warn!("Discipline lookup unavailable: {e}");
                LookupMap::default()
            }
        }
    }

    /// Division lookup for a project's specifications. Empty on any failure.
    pub async fn fetch_divisions(&self, company_id: u64, project_id: u64) -> LookupMap {
        let url = self.endpoint(&format!(
            "/rest/v2.1/companies/{company_id}/projects/{project_id}/specification_section_divisions?per_page=100"
        ));
        match self.fetch_page(&url).await {
            Ok(page) => normalize::division_lookup(&page.items),
            Err(e) => {
                tracing::warn!("Division lookup unavailable: {e}");
                LookupMap::default()
            }
        }
    }

    /// Fetch every record of the requested type, with its lookup.
    pub async fn fetch(&self, request: ResourceRequest, progress: Option<&ProgressFn<'_>>) -> FetchReport {
        match request {
            ResourceRequest::Drawings {
                project_id,
                area_id,
            } => {
                let disciplines = self.fetch_disciplines(project_id, area_id).await;
                let mut outcome = self.fetch_drawings(project_id, area_id, progress).await;
                normalize::apply_disciplines(&mut outcome.items, &disciplines);
                FetchReport::from_outcome(
                    ResourceKind::Drawings,
                    outcome,
                    disciplines,
                    CanonicalRecord::Drawing,
                )
            }
            ResourceRequest::Rfis { project_id } => FetchReport::from_outcome(
                ResourceKind::Rfis,
                self.fetch_rfis(project_id, progress).await,
                LookupMap::default(),
                CanonicalRecord::Rfi,
            ),
            ResourceRequest::Commitments { project_id } => FetchReport::from_outcome(
                ResourceKind::Commitments,
                self.fetch_commitments(project_id, progress).await,
                LookupMap::default(),
                CanonicalRecord::Commitment,
            ),
            ResourceRequest::Specifications {
                company_id,
                project_id,
            } => {
                let divisions = self.fetch_divisions(company_id, project_id).await;
                FetchReport::from_outcome(
                    ResourceKind::Specifications,
                    self.fetch_specifications(company_id, project_id, progress)
                        .await,
                    divisions,
                    CanonicalRecord::Specification,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves a scripted sequence of responses and records requested URLs.
    struct ScriptedTransport {
        script: Mutex<VecDeque<CaptureResult<HttpResponse>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<CaptureResult<HttpResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> CaptureResult<HttpResponse> {
            self.seen.lock().unwrap().push(request.url.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json_page(request.url.clone(), json!([]))))
        }
    }

    fn json_page(url: String, body: Value) -> HttpResponse {
        HttpResponse {
            url,
            status: 200,
            headers: vec![("content-type".into(), "application/json".into())],
            body: body.to_string(),
        }
    }

    fn rfis(range: std::ops::Range<u64>) -> CaptureResult<HttpResponse> {
        let items: Vec<Value> = range
            .map(|i| json!({"id": i, "number": i.to_string(), "subject": "s"}))
            .collect();
        Ok(json_page("x".into(), Value::Array(items)))
    }

    fn fetcher(transport: Arc<ScriptedTransport>) -> PaginatedFetcher {
        PaginatedFetcher::new(transport, "https://app.procore.com")
    }

    #[tokio::test]
    async fn test_short_page_stops_crawl() {
        let transport = ScriptedTransport::new(vec![rfis(0..100), rfis(100..140)]);
        let outcome = fetcher(transport.clone()).fetch_rfis(9, None).await;
        assert_eq!(outcome.items.len(), 140);
        assert_eq!(outcome.requests, 2);
        assert_eq!(outcome.stop_reason, StopReason::Exhausted);
        let seen = transport.seen();
        assert!(seen[0].ends_with("/rest/v1.0/projects/9/rfis?page=1&per_page=100"));
        assert!(seen[1].contains("page=2"));
    }

    #[tokio::test]
    async fn test_full_final_page_needs_one_empty_page() {
        let transport = ScriptedTransport::new(vec![rfis(0..100), rfis(100..200)]);
        let outcome = fetcher(transport).fetch_rfis(1, None).await;
        assert_eq!(outcome.items.len(), 200);
        assert_eq!(outcome.requests, 3);
        assert!(!outcome.is_partial());
    }

    #[tokio::test]
    async fn test_three_consecutive_errors_keep_partial_items() {
        let fail = || Err(CaptureError::Transport("connection reset".into()));
        let transport = ScriptedTransport::new(vec![rfis(0..100), fail(), fail(), fail()]);
        let outcome = fetcher(transport.clone()).fetch_rfis(1, None).await;
        assert_eq!(outcome.items.len(), 100);
        assert_eq!(outcome.stop_reason, StopReason::TooManyErrors);
        assert_eq!(outcome.requests, 4);
        // Transport failures retry the same page.
        assert!(transport.seen()[3].contains("page=2"));
    }

    #[tokio::test]
    async fn test_error_counter_resets_on_success() {
        let fail = || Err(CaptureError::Http { status: 502, url: "x".into() });
        let transport = ScriptedTransport::new(vec![
            fail(),
            fail(),
            rfis(0..100),
            fail(),
            fail(),
            rfis(100..110),
        ]);
        let outcome = fetcher(transport).fetch_rfis(1, None).await;
        assert_eq!(outcome.items.len(), 110);
        assert_eq!(outcome.stop_reason, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn test_decode_error_drops_page() {
        let html = Ok(HttpResponse {
            url: "x".into(),
            status: 200,
            headers: vec![("content-type".into(), "text/html".into())],
            body: "<html>login</html>".into(),
        });
        let transport = ScriptedTransport::new(vec![rfis(0..100), html, rfis(200..250)]);
        let outcome = fetcher(transport.clone()).fetch_rfis(1, None).await;
        assert_eq!(outcome.items.len(), 150);
        assert!(transport.seen()[2].contains("page=3"));
    }

    #[tokio::test]
    async fn test_page_ceiling() {
        let script = (0..COMMITMENT_MAX_PAGES as u64 + 5)
            .map(|p| {
                let items: Vec<Value> = (0..100)
                    .map(|i| json!({"id": p * 1000 + i, "number": "C", "vendor_name": "V"}))
                    .collect();
                Ok(json_page("x".into(), Value::Array(items)))
            })
            .collect();
        let transport = ScriptedTransport::new(script);
        let endpoint = "https://app.procore.com/rest/v1.0/projects/1/commitments";
        let outcome = fetcher(transport)
            .crawl(
                endpoint,
                100,
                COMMITMENT_MAX_PAGES,
                normalize::normalize_commitments,
                None,
            )
            .await;
        assert_eq!(outcome.requests, COMMITMENT_MAX_PAGES);
        assert_eq!(outcome.items.len(), 5000);
        assert_eq!(outcome.stop_reason, StopReason::PageLimit);
    }

    #[tokio::test]
    async fn test_progress_callback_reports_running_total() {
        let transport = ScriptedTransport::new(vec![rfis(0..100), rfis(100..130)]);
        let calls = Mutex::new(Vec::new());
        let report = |n: usize, total: Option<u64>| calls.lock().unwrap().push((n, total));
        fetcher(transport).fetch_rfis(1, Some(&report)).await;
        assert_eq!(*calls.lock().unwrap(), vec![(100, None), (130, None)]);
    }

    #[tokio::test]
    async fn test_commitment_progress_spans_endpoints() {
        let commitments = |ids: &[u64]| {
            let items: Vec<Value> = ids
                .iter()
                .map(|id| json!({"id": id, "number": "PO", "vendor_name": "Acme"}))
                .collect();
            Ok(json_page("x".into(), Value::Array(items)))
        };
        let transport =
            ScriptedTransport::new(vec![commitments(&[1, 2]), commitments(&[3]), commitments(&[])]);
        let calls = Mutex::new(Vec::new());
        let report = |n: usize, _total: Option<u64>| calls.lock().unwrap().push(n);

        let outcome = fetcher(transport).fetch_commitments(4, Some(&report)).await;
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(*calls.lock().unwrap(), vec![2, 3, 3]);
    }

    #[tokio::test]
    async fn test_endless_rfis_stop_at_page_ceiling() {
        let script = (0..MAX_PAGES as u64 + 5)
            .map(|p| rfis(p * 100..p * 100 + 100))
            .collect();
        let transport = ScriptedTransport::new(script);
        let outcome = fetcher(transport.clone()).fetch_rfis(1, None).await;
        assert_eq!(outcome.requests, MAX_PAGES);
        assert_eq!(outcome.items.len(), 10_000);
        assert_eq!(outcome.stop_reason, StopReason::PageLimit);
        assert!(transport.seen()[99].contains("page=100&"));
    }

    #[tokio::test]
    async fn test_lookup_failure_yields_empty_map() {
        let transport = ScriptedTransport::new(vec![Err(CaptureError::Transport("down".into()))]);
        let map = fetcher(transport).fetch_disciplines(1, 2).await;
        assert!(!map.is_available());
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let transport = ScriptedTransport::new(vec![]);
        let outcome = PaginatedFetcher::new(transport.clone(), "not a url")
            .fetch_rfis(1, None)
            .await;
        assert_eq!(outcome.stop_reason, StopReason::InvalidEndpoint);
        assert!(transport.seen().is_empty());
    }
}
