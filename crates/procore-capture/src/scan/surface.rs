//! The page abstraction a scan drives.
//!
//! A [`ScanSurface`] exposes just the operations the orchestrator needs on
//! the host page: read the URL, expand groups, measure and move a scroll
//! container, and watch for newly rendered rows. The Chromium driver
//! implements it over DevTools; tests implement it synthetically.

use async_trait::async_trait;

use crate::types::CaptureResult;

/// What to scroll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollTarget {
    /// The first element matching a CSS selector.
    Element(String),
    /// The document itself.
    Page,
}

/// Scroll geometry of a target, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    /// How far the content extends past the visible area.
    pub fn overflow(&self) -> f64 {
        self.scroll_height - self.client_height
    }

    /// Largest reachable scroll offset, never below 1.
    pub fn max_scroll(&self) -> f64 {
        self.overflow().max(1.0)
    }
}

/// Operations the scan needs on the host page.
#[async_trait]
pub trait ScanSurface: Send + Sync {
    /// Current page URL.
    async fn current_url(&self) -> CaptureResult<String>;

    /// Snapshot the individually addressable collapsed group rows and
    /// return how many there are.
    async fn group_expanders(&self) -> CaptureResult<usize>;

    /// Click the `index`-th expander from the last snapshot.
    async fn expand_group(&self, index: usize) -> CaptureResult<()>;

    /// Label of the page-level expand/collapse-all toggle, if present.
    async fn expand_all_label(&self) -> CaptureResult<Option<String>>;

    /// Click the expand/collapse-all toggle.
    async fn toggle_expand_all(&self) -> CaptureResult<()>;

    /// Geometry of `target`, or `None` when it does not exist.
    async fn scroll_metrics(&self, target: &ScrollTarget) -> CaptureResult<Option<ScrollMetrics>>;

    /// Move `target` to the given offset.
    async fn scroll_to(&self, target: &ScrollTarget, top: f64) -> CaptureResult<()>;

    /// Start watching the grid's row container for added nodes.
    async fn watch_rows(&self) -> CaptureResult<Box<dyn ChangeSignal>>;
}

/// Subscription reporting structural changes in the grid.
#[async_trait]
pub trait ChangeSignal: Send {
    /// Nodes added since the previous call.
    async fn take_changes(&mut self) -> usize;

    /// Stop watching. Safe to call more than once.
    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_scroll_floor() {
        let fits = ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 600.0,
            client_height: 800.0,
        };
        assert_eq!(fits.max_scroll(), 1.0);
        assert!(fits.overflow() < 0.0);

        let tall = ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 5000.0,
            client_height: 800.0,
        };
        assert_eq!(tall.max_scroll(), 4200.0);
    }
}
