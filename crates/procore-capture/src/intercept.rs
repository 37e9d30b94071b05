//! Passive capture interceptor.
//!
//! Wraps a [`Transport`] so every call behaves exactly as before while
//! matching responses are decoded off the caller's path and emitted on the
//! [`RelayBridge`] as [`CaptureEvent`]s. The same inspection is reachable
//! through [`Interceptor::observe`] for traffic seen by other means, such
//! as browser network events.

use std::sync::{Arc, LazyLock, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use url::Url;

use crate::relay::{Delivery, RelayBridge, RelayEvent};
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::types::{CaptureEvent, CaptureResult, ContextIds, PaginationHeaders};

/// Path keywords for the four resource families.
const RELEVANT_KEYWORDS: &[&str] = &[
    "drawing_log",
    "drawing_revisions",
    "drawing_areas",
    "drawing_disciplines",
    "drawings",
    "server_side_rows",
    "/rows",
    "rfis",
    "commitments",
    "purchase_order_contracts",
    "work_order_contracts",
    "contracts",
];

static STATIC_ASSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\.(png|jpe?g|gif|svg|webp|ico|bmp|css|js|mjs|map|woff2?|ttf|otf|eot|pdf|docx?|xlsx?|pptx?|zip)$",
    )
    .expect("static asset pattern")
});

static COMPANY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/companies/(\d+)").expect("company pattern"));

static PROJECT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/projects/(\d+)|^/(\d+)/project(?:/|$)").expect("project pattern")
});

static AREA_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(?:drawing_)?areas/(\d+)").expect("area pattern"));

fn host_matches(host: &str, app_domain: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let domain = app_domain.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// Syntactic relevance filter for observed request URLs.
///
/// Relative URLs resolve against `page_url`. No response body is needed
/// to decide.
pub fn is_relevant_url(url: Option<&str>, page_url: &str, app_domain: &str) -> bool {
    let Some(raw) = url.filter(|u| !u.trim().is_empty()) else {
        return false;
    };
    let resolved = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => match Url::parse(page_url).and_then(|base| base.join(raw)) {
            Ok(u) => u,
            Err(_) => return false,
        },
    };

    if !resolved.host_str().is_some_and(|h| host_matches(h, app_domain)) {
        return false;
    }

    let path = resolved.path().to_ascii_lowercase();
    if STATIC_ASSET.is_match(&path) {
        return false;
    }
    RELEVANT_KEYWORDS.iter().any(|k| path.contains(k))
}

fn capture_id(re: &Regex, path: &str) -> Option<u64> {
    re.captures(path).and_then(|c| {
        c.iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Derive company, project, and area ids from a page URL.
pub fn context_ids_from_url(page_url: &str) -> ContextIds {
    let path = Url::parse(page_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| page_url.to_string());
    ContextIds {
        company_id: capture_id(&COMPANY_ID, &path),
        project_id: capture_id(&PROJECT_ID, &path),
        area_id: capture_id(&AREA_ID, &path),
    }
}

/// Read `total` and `per-page` headers regardless of case.
pub fn pagination_from_headers(headers: &[(String, String)]) -> PaginationHeaders {
    let find = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.trim().parse::<u64>().ok())
    };
    PaginationHeaders {
        total: find("total"),
        per_page: find("per-page"),
    }
}

/// Inspects responses and emits capture events.
pub struct Interceptor {
    bridge: RelayBridge,
    app_domain: String,
    page_url: RwLock<String>,
}

impl Interceptor {
    pub fn new(bridge: RelayBridge, app_domain: &str, page_url: &str) -> Self {
        Self {
            bridge,
            app_domain: app_domain.to_string(),
            page_url: RwLock::new(page_url.to_string()),
        }
    }

    /// The host page moved; context ids follow the new URL.
    pub fn set_page_url(&self, url: &str) {
        if let Ok(mut guard) = self.page_url.write() {
            *guard = url.to_string();
        }
    }

    pub fn page_url(&self) -> String {
        self.page_url
            .read()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn accepts(&self, url: &str) -> bool {
        is_relevant_url(Some(url), &self.page_url(), &self.app_domain)
    }

    /// Inspect one response. Returns the delivery outcome when an event was
    /// emitted, `None` when the response was filtered out or undecodable.
    pub fn observe(
        &self,
        url: &str,
        content_type: Option<&str>,
        headers: &[(String, String)],
        body: &str,
    ) -> Option<Delivery> {
        if !self.accepts(url) {
            return None;
        }
        if !content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("json")) {
            return None;
        }
        let payload = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("Dropping undecodable capture from {url}: {e}");
                return None;
            }
        };

        let event = CaptureEvent {
            payload,
            source_url: url.to_string(),
            context_ids: context_ids_from_url(&self.page_url()),
            pagination_headers: pagination_from_headers(headers),
            captured_at: Utc::now(),
        };
        Some(self.bridge.emit(RelayEvent::WiretapData { payload: event }))
    }
}

/// A transport that hands every response back untouched and inspects a
/// copy in a detached task.
pub struct InterceptingTransport<T> {
    inner: T,
    interceptor: Arc<Interceptor>,
}

impl<T: Transport> InterceptingTransport<T> {
    pub fn new(inner: T, interceptor: Arc<Interceptor>) -> Self {
        Self { inner, interceptor }
    }
}

#[async_trait]
impl<T: Transport> Transport for InterceptingTransport<T> {
    async fn send(&self, request: HttpRequest) -> CaptureResult<HttpResponse> {
        let response = self.inner.send(request).await?;

        if response.is_json() && self.interceptor.accepts(&response.url) {
            let interceptor = Arc::clone(&self.interceptor);
            let copy = response.clone();
            tokio::spawn(async move {
                interceptor.observe(
                    &copy.url,
                    copy.header("content-type"),
                    &copy.headers,
                    &copy.body,
                );
            });
        }

        Ok(response)
    }
}
