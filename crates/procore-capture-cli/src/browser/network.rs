//! Feed DevTools network traffic to the capture interceptor.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use procore_capture::intercept::Interceptor;

/// A response whose body is not yet complete.
struct PendingResponse {
    url: String,
    mime_type: String,
    headers: Vec<(String, String)>,
}

/// Flatten the DevTools header object into name/value pairs.
fn header_pairs(headers: &Value) -> Vec<(String, String)> {
    headers
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn decode_body(body: String, base64_encoded: bool) -> Option<String> {
    if !base64_encoded {
        return Some(body);
    }
    let bytes = base64::engine::general_purpose::STANDARD.decode(body).ok()?;
    String::from_utf8(bytes).ok()
}

/// Enable network events on `page` and hand every relevant JSON response
/// to `interceptor`. Runs until the page closes or the handle is aborted.
pub async fn spawn_network_capture(page: Page, interceptor: Arc<Interceptor>) -> Result<JoinHandle<()>> {
    page.execute(EnableParams::default())
        .await
        .context("failed to enable network events")?;
    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .context("failed to listen for responses")?;
    let mut finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .context("failed to listen for finished loads")?;

    Ok(tokio::spawn(async move {
        let mut pending: HashMap<String, PendingResponse> = HashMap::new();

        loop {
            tokio::select! {
                Some(event) = responses.next() => {
                    let response = &event.response;
                    if !response.mime_type.to_ascii_lowercase().contains("json")
                        || !interceptor.accepts(&response.url)
                    {
                        continue;
                    }
                    let headers = serde_json::to_value(&response.headers)
                        .map(|v| header_pairs(&v))
                        .unwrap_or_default();
                    pending.insert(
                        event.request_id.inner().clone(),
                        PendingResponse {
                            url: response.url.clone(),
                            mime_type: response.mime_type.clone(),
                            headers,
                        },
                    );
                }
                Some(event) = finished.next() => {
                    let Some(done) = pending.remove(event.request_id.inner()) else {
                        continue;
                    };
                    let body = match page
                        .execute(GetResponseBodyParams::new(event.request_id.clone()))
                        .await
                    {
                        Ok(reply) => decode_body(reply.result.body.clone(), reply.result.base64_encoded),
                        Err(e) => {
                            tracing::debug!("No body for {}: {e}", done.url);
                            None
                        }
                    };
                    if let Some(body) = body {
                        interceptor.observe(&done.url, Some(&done.mime_type), &done.headers, &body);
                    }
                }
                else => break,
            }
        }
        tracing::debug!("Network capture ended");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_pairs() {
        let pairs = header_pairs(&json!({"Total": "12", "per-page": 100}));
        assert!(pairs.contains(&("Total".to_string(), "12".to_string())));
        assert!(pairs.contains(&("per-page".to_string(), "100".to_string())));
        assert!(header_pairs(&json!(null)).is_empty());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body("[1]".into(), false).as_deref(), Some("[1]"));
        assert_eq!(decode_body("WzFd".into(), true).as_deref(), Some("[1]"));
        assert_eq!(decode_body("%%%".into(), true), None);
    }
}
