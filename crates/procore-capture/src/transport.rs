//! HTTP transport abstraction.
//!
//! The fetcher and the interceptor only see the [`Transport`] trait, so the
//! network stack can be swapped for a scripted one in tests or wrapped by
//! [`crate::intercept::InterceptingTransport`] to observe traffic.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::CaptureConfig;
use crate::types::{CaptureError, CaptureResult};

/// An outbound GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// A GET request asking for JSON.
    pub fn json(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
        }
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"))
    }
}

/// Something that can perform an HTTP GET.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> CaptureResult<HttpResponse>;
}

/// reqwest-backed transport carrying the ambient session cookie.
///
/// Retries 5xx responses with exponential backoff and honors
/// `retry-after` on 429, up to `max_retries` times.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    cookie: Option<String>,
    timeout: Duration,
    max_retries: u32,
}

impl HttpTransport {
    pub fn new(config: &CaptureConfig) -> CaptureResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| CaptureError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            cookie: config.session_cookie.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
            max_retries: config.max_retries,
        })
    }

    fn build(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(&request.url).timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = &self.cookie {
            builder = builder.header(reqwest::header::COOKIE, cookie.as_str());
        }
        builder
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> CaptureResult<HttpResponse> {
        let mut retries = 0u32;

        loop {
            match self.build(&request).send().await {
                Ok(r) => {
                    let status = r.status().as_u16();

                    if status >= 500 && retries < self.max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tracing::debug!("HTTP {status} from {}, retrying in {delay:?}", request.url);
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == 429 && retries < self.max_retries {
                        retries += 1;
                        let retry_after = r
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|s| s.parse::<u64>().ok())
                            .unwrap_or(2);
                        tokio::time::sleep(Duration::from_secs(retry_after.min(10))).await;
                        continue;
                    }

                    let url = r.url().to_string();
                    let headers = r
                        .headers()
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                        .collect();
                    let body = r.text().await?;

                    return Ok(HttpResponse {
                        url,
                        status,
                        headers,
                        body,
                    });
                }
                Err(e) => {
                    if retries < self.max_retries {
                        retries += 1;
                        let delay = Duration::from_millis(500 * 2u64.pow(retries - 1));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(headers: &[(&str, &str)]) -> HttpResponse {
        HttpResponse {
            url: "https://app.procore.com/rest/v1.0/projects/1/rfis".to_string(),
            status: 200,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: "[]".to_string(),
        }
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = response(&[("Content-Type", "application/json; charset=utf-8"), ("Total", "12")]);
        assert_eq!(resp.header("total"), Some("12"));
        assert_eq!(resp.header("TOTAL"), Some("12"));
        assert!(resp.is_json());
        assert!(resp.is_success());
    }

    #[test]
    fn test_non_json_content_type() {
        let resp = response(&[("content-type", "text/html")]);
        assert!(!resp.is_json());
    }

    #[test]
    fn test_json_request_sets_accept() {
        let req = HttpRequest::json("https://example.com");
        assert_eq!(
            req.headers,
            vec![("Accept".to_string(), "application/json".to_string())]
        );
    }

    #[test]
    fn test_http_transport_creation() {
        let transport = HttpTransport::new(&CaptureConfig::default());
        assert!(transport.is_ok());
    }
}
