//! [`ScanSurface`] over a live Chromium page.
//!
//! Every operation is a small script evaluated in the page. Scripts never
//! return `null` (DevTools drops null values), so absence is encoded in
//! the result shape instead.

use async_trait::async_trait;
use chromiumoxide::page::Page;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use procore_capture::scan::{ChangeSignal, ScanSurface, ScrollMetrics, ScrollTarget};
use procore_capture::{CaptureError, CaptureResult};

const GROUP_EXPANDERS: &str = r#"(() => {
  const sel = '.ag-group-contracted:not(.ag-hidden), .ag-row-group[aria-expanded="false"] .ag-group-contracted, [data-qa="group-expander"][aria-expanded="false"]';
  window.__pcapExpanders = Array.from(new Set(document.querySelectorAll(sel)));
  return window.__pcapExpanders.length;
})()"#;

const FIND_EXPAND_ALL: &str = r#"const findToggle = () => Array.from(document.querySelectorAll('button, [role="button"]'))
  .find(el => /\b(expand|collapse) all\b/i.test((el.textContent || el.getAttribute('aria-label') || '').trim()));"#;

/// Starts a row observer and returns its token. Each watch owns its
/// observer and counter under that token.
const WATCH_ROWS: &str = r#"(() => {
  const root = document.querySelector('.ag-center-cols-container')
    || document.querySelector('.ag-body-viewport')
    || document.querySelector('[role="rowgroup"]')
    || document.body;
  const token = (window.__pcapWatchSeq || 0) + 1;
  window.__pcapWatchSeq = token;
  window.__pcapWatches = window.__pcapWatches || {};
  const watch = { rows: 0, observer: null };
  watch.observer = new MutationObserver(records => {
    for (const r of records) watch.rows += r.addedNodes.length;
  });
  watch.observer.observe(root, { childList: true, subtree: true });
  window.__pcapWatches[token] = watch;
  return token;
})()"#;

fn take_changes_script(token: u64) -> String {
    format!(
        "(() => {{ const w = (window.__pcapWatches || {{}})[{token}]; \
         if (!w) return 0; const n = w.rows; w.rows = 0; return n; }})()"
    )
}

fn disconnect_script(token: u64) -> String {
    format!(
        "(() => {{ const all = window.__pcapWatches || {{}}; const w = all[{token}]; \
         if (!w) return false; w.observer.disconnect(); delete all[{token}]; return true; }})()"
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsMetrics {
    found: bool,
    #[serde(default)]
    scroll_top: f64,
    #[serde(default)]
    scroll_height: f64,
    #[serde(default)]
    client_height: f64,
}

/// JavaScript expression resolving `target` to an element.
fn element_expr(target: &ScrollTarget) -> String {
    match target {
        ScrollTarget::Element(selector) => {
            let literal = serde_json::to_string(selector).unwrap_or_else(|_| "''".to_string());
            format!("document.querySelector({literal})")
        }
        ScrollTarget::Page => "(document.scrollingElement || document.documentElement)".to_string(),
    }
}

async fn evaluate<T: DeserializeOwned>(page: &Page, script: impl Into<String>) -> CaptureResult<T> {
    let result = page
        .evaluate(script.into())
        .await
        .map_err(|e| CaptureError::Surface(format!("script failed: {e}")))?;
    result
        .into_value()
        .map_err(|e| CaptureError::Surface(format!("unexpected script result: {e}")))
}

pub struct ChromiumSurface {
    page: Page,
}

impl ChromiumSurface {
    pub fn new(page: Page) -> Self {
        Self { page }
    }
}

#[async_trait]
impl ScanSurface for ChromiumSurface {
    async fn current_url(&self) -> CaptureResult<String> {
        self.page
            .url()
            .await
            .map_err(|e| CaptureError::Surface(e.to_string()))?
            .ok_or_else(|| CaptureError::Surface("page has no URL".into()))
    }

    async fn group_expanders(&self) -> CaptureResult<usize> {
        evaluate(&self.page, GROUP_EXPANDERS).await
    }

    async fn expand_group(&self, index: usize) -> CaptureResult<()> {
        let clicked: bool = evaluate(
            &self.page,
            format!(
                "(() => {{ const el = (window.__pcapExpanders || [])[{index}]; \
                 if (!el || !el.isConnected) return false; el.click(); return true; }})()"
            ),
        )
        .await?;
        if !clicked {
            tracing::debug!("Expander {index} is gone");
        }
        Ok(())
    }

    async fn expand_all_label(&self) -> CaptureResult<Option<String>> {
        let label: String = evaluate(
            &self.page,
            format!(
                "(() => {{ {FIND_EXPAND_ALL} const el = findToggle(); \
                 return el ? (el.textContent || el.getAttribute('aria-label') || '').trim() : ''; }})()"
            ),
        )
        .await?;
        Ok((!label.is_empty()).then_some(label))
    }

    async fn toggle_expand_all(&self) -> CaptureResult<()> {
        let clicked: bool = evaluate(
            &self.page,
            format!(
                "(() => {{ {FIND_EXPAND_ALL} const el = findToggle(); \
                 if (!el) return false; el.click(); return true; }})()"
            ),
        )
        .await?;
        if clicked {
            Ok(())
        } else {
            Err(CaptureError::Surface("expand-all toggle disappeared".into()))
        }
    }

    async fn scroll_metrics(&self, target: &ScrollTarget) -> CaptureResult<Option<ScrollMetrics>> {
        let metrics: JsMetrics = evaluate(
            &self.page,
            format!(
                "(() => {{ const el = {}; if (!el) return {{ found: false }}; \
                 return {{ found: true, scrollTop: el.scrollTop, scrollHeight: el.scrollHeight, \
                 clientHeight: el.clientHeight }}; }})()",
                element_expr(target)
            ),
        )
        .await?;
        Ok(metrics.found.then_some(ScrollMetrics {
            scroll_top: metrics.scroll_top,
            scroll_height: metrics.scroll_height,
            client_height: metrics.client_height,
        }))
    }

    async fn scroll_to(&self, target: &ScrollTarget, top: f64) -> CaptureResult<()> {
        let moved: bool = evaluate(
            &self.page,
            format!(
                "(() => {{ const el = {}; if (!el) return false; el.scrollTop = {top}; return true; }})()",
                element_expr(target)
            ),
        )
        .await?;
        if moved {
            Ok(())
        } else {
            Err(CaptureError::Surface(format!("scroll target {target:?} is gone")))
        }
    }

    async fn watch_rows(&self) -> CaptureResult<Box<dyn ChangeSignal>> {
        let token: u64 = evaluate(&self.page, WATCH_ROWS).await?;
        Ok(Box::new(ChromiumRowSignal {
            page: self.page.clone(),
            token,
            connected: true,
        }))
    }
}

/// Polls the added-node counter kept by the in-page `MutationObserver`
/// registered under `token`.
pub struct ChromiumRowSignal {
    page: Page,
    token: u64,
    connected: bool,
}

#[async_trait]
impl ChangeSignal for ChromiumRowSignal {
    async fn take_changes(&mut self) -> usize {
        if !self.connected {
            return 0;
        }
        match evaluate::<usize>(&self.page, take_changes_script(self.token)).await {
            Ok(n) => n,
            Err(e) => {
                tracing::debug!("Row counter unavailable: {e}");
                0
            }
        }
    }

    async fn disconnect(&mut self) {
        if !std::mem::replace(&mut self.connected, false) {
            return;
        }
        if let Err(e) = evaluate::<bool>(&self.page, disconnect_script(self.token)).await {
            tracing::debug!("Observer disconnect failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_expr_quotes_selector() {
        assert_eq!(
            element_expr(&ScrollTarget::Element("[data-qa='data-table-body']".into())),
            r#"document.querySelector("[data-qa='data-table-body']")"#
        );
        assert!(element_expr(&ScrollTarget::Page).contains("scrollingElement"));
    }

    #[test]
    fn test_row_scripts_address_their_own_watch() {
        let take = take_changes_script(7);
        assert!(take.contains("[7]"));
        let disconnect = disconnect_script(7);
        assert!(disconnect.contains("all[7]"));
        assert!(!disconnect.contains("[8]"));
        assert!(WATCH_ROWS.contains("return token"));
    }

    #[test]
    fn test_metrics_shape() {
        let missing: JsMetrics = serde_json::from_str(r#"{"found": false}"#).unwrap();
        assert!(!missing.found);
        let present: JsMetrics =
            serde_json::from_str(r#"{"found": true, "scrollTop": 5, "scrollHeight": 900, "clientHeight": 300}"#)
                .unwrap();
        assert_eq!(present.scroll_height, 900.0);
    }
}
