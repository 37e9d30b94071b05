//! DOM scan orchestrator.
//!
//! Drives a virtualized grid from top to bottom so the host application
//! fetches every row; the passive interceptor sees those responses. One
//! session may be active per page. The run ends on stabilization, timeout,
//! an explicit stop, or a surface failure.

pub mod session;
pub mod surface;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};

use crate::relay::{RelayBridge, RelayEvent};
use crate::types::{CaptureResult, ScanStatus, ScanType};

pub use session::{ScanConfig, ScanResult, ScanSession};
pub use surface::{ChangeSignal, ScanSurface, ScrollMetrics, ScrollTarget};

use session::{expansion_percent, scroll_percent, EXPANSION_BAND_END};

const ALREADY_RUNNING: &str = "A scan is already in progress";

struct ActiveScan {
    session: ScanSession,
    cancel: Arc<Notify>,
}

/// How a run left the scrolling loop.
enum Ending {
    Complete(ScrollTarget),
    Timeout,
    Stopped,
    Failed(String),
}

/// Owns the single scan session for one page.
pub struct ScanOrchestrator {
    surface: Arc<dyn ScanSurface>,
    bridge: RelayBridge,
    config: ScanConfig,
    active: Mutex<Option<ActiveScan>>,
    next_id: AtomicU64,
}

impl ScanOrchestrator {
    pub fn new(surface: Arc<dyn ScanSurface>, bridge: RelayBridge, config: ScanConfig) -> Self {
        Self {
            surface,
            bridge,
            config,
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ActiveScan>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    /// Snapshot of the active session, if any.
    pub fn session(&self) -> Option<ScanSession> {
        self.slot().as_ref().map(|a| a.session.clone())
    }

    /// Run a scan to completion.
    ///
    /// Refuses without side effects when a scan is already active or the
    /// page does not match `scan_type`.
    pub async fn start(&self, scan_type: ScanType) -> ScanResult {
        if self.is_active() {
            return ScanResult::rejected(ALREADY_RUNNING);
        }

        let url = match self.surface.current_url().await {
            Ok(url) => url,
            Err(e) => return ScanResult::rejected(format!("Cannot read page URL: {e}")),
        };
        if !scan_type.matches_page(&url) {
            tracing::info!("Refusing {scan_type} scan on {url}");
            return ScanResult::rejected(scan_type.page_hint());
        }

        let Some((id, cancel)) = self.claim(scan_type) else {
            return ScanResult::rejected(ALREADY_RUNNING);
        };
        tracing::info!("Scan {id} ({scan_type}) started on {url}");

        let deadline = Instant::now() + self.config.timeout;
        let mut signal: Option<Box<dyn ChangeSignal>> = None;
        let ending = tokio::select! {
            biased;
            _ = cancel.notified() => Ending::Stopped,
            _ = sleep_until(deadline) => Ending::Timeout,
            ending = self.drive(id, scan_type, &mut signal) => ending,
        };

        if let Some(mut signal) = signal.take() {
            signal.disconnect().await;
        }
        self.finish(id, ending).await
    }

    /// End the active scan, if any. Idempotent; always succeeds.
    pub fn stop(&self) -> ScanResult {
        let Some(mut active) = self.slot().take() else {
            return ScanResult {
                success: true,
                status: ScanStatus::Idle,
                session_id: None,
                partial: false,
                message: Some("No scan in progress".into()),
            };
        };

        let id = active.session.id;
        let percent = active.session.last_percent;
        let event = active
            .session
            .advance(ScanStatus::Stopped, percent, Some("Scan stopped".into()));
        self.bridge.emit(RelayEvent::ScanProgress(event));
        active.cancel.notify_one();
        tracing::info!("Scan {id} stopped");

        ScanResult::ended(id, ScanStatus::Stopped, Some("Scan stopped".into()))
    }

    fn claim(&self, scan_type: ScanType) -> Option<(u64, Arc<Notify>)> {
        let mut slot = self.slot();
        if slot.is_some() {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = Arc::new(Notify::new());
        *slot = Some(ActiveScan {
            session: ScanSession::new(id, scan_type),
            cancel: Arc::clone(&cancel),
        });
        Some((id, cancel))
    }

    /// Remove session `id` from the slot. `None` if it was already stopped.
    fn release(&self, id: u64) -> Option<ActiveScan> {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(active) if active.session.id == id => slot.take(),
            _ => None,
        }
    }

    /// Update session `id` and emit a progress event. No-op once the
    /// session has been released.
    fn report(&self, id: u64, status: ScanStatus, percent: u8, message: impl Into<String>) {
        let event = {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(active) if active.session.id == id => {
                    active.session.advance(status, percent, Some(message.into()))
                }
                _ => return,
            }
        };
        self.bridge.emit(RelayEvent::ScanProgress(event));
    }

    fn record_position(&self, id: u64, stable_cycles: u32, scroll_position: f64) {
        if let Some(active) = self.slot().as_mut().filter(|a| a.session.id == id) {
            active.session.stable_cycles = stable_cycles;
            active.session.scroll_position = scroll_position;
        }
    }

    async fn drive(
        &self,
        id: u64,
        scan_type: ScanType,
        signal: &mut Option<Box<dyn ChangeSignal>>,
    ) -> Ending {
        if scan_type == ScanType::Drawings {
            self.report(id, ScanStatus::Expanding, 0, "Expanding groups");
            if let Err(e) = self.expand_groups(id).await {
                tracing::warn!("Group expansion failed, scanning what is visible: {e}");
            }
        }

        let target = self.locate_container().await;
        tracing::debug!("Scan {id} scrolling {target:?}");
        self.report(id, ScanStatus::Scanning, EXPANSION_BAND_END, "Scanning");

        match self.surface.watch_rows().await {
            Ok(s) => *signal = Some(s),
            Err(e) => tracing::warn!("Row watcher unavailable, relying on scroll position: {e}"),
        }

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut stable = 0u32;
        loop {
            ticker.tick().await;

            let changed = match signal.as_mut() {
                Some(s) => s.take_changes().await > 0,
                None => false,
            };

            let metrics = match self.surface.scroll_metrics(&target).await {
                Ok(Some(m)) => m,
                Ok(None) => return Ending::Failed("Scroll container disappeared".into()),
                Err(e) => return Ending::Failed(e.to_string()),
            };
            let max = metrics.max_scroll();
            let next = (metrics.scroll_top + self.config.scroll_step).min(max);
            if let Err(e) = self.surface.scroll_to(&target, next).await {
                return Ending::Failed(e.to_string());
            }

            let at_end = next >= max - self.config.end_margin;
            stable = if changed {
                0
            } else if at_end {
                stable + 1
            } else {
                0
            };

            // The element may clamp the offset, so measure where it landed.
            let (landed, extent) = match self.surface.scroll_metrics(&target).await {
                Ok(Some(after)) => (after.scroll_top, after.max_scroll()),
                _ => (next, max),
            };
            self.record_position(id, stable, landed);

            let percent = scroll_percent(landed, extent);
            if at_end {
                self.report(
                    id,
                    ScanStatus::Stabilizing,
                    percent,
                    format!("Waiting for rows ({stable}/{})", self.config.stable_threshold),
                );
            } else {
                self.report(id, ScanStatus::Scanning, percent, format!("Scanning {percent}%"));
            }

            if stable >= self.config.stable_threshold {
                return Ending::Complete(target);
            }
        }
    }

    async fn expand_groups(&self, id: u64) -> CaptureResult<()> {
        let count = self.surface.group_expanders().await?;
        if count > 0 {
            for index in 0..count {
                if let Err(e) = self.surface.expand_group(index).await {
                    tracing::debug!("Expander {index} failed: {e}");
                }
                self.report(
                    id,
                    ScanStatus::Expanding,
                    expansion_percent(index + 1, count),
                    format!("Expanding groups ({}/{count})", index + 1),
                );
                sleep(self.config.group_settle).await;
            }
            return Ok(());
        }

        let Some(label) = self.surface.expand_all_label().await? else {
            return Ok(());
        };
        if label.to_ascii_lowercase().contains("collapse") {
            // Toggle shows "collapse": reset to a known state first.
            self.surface.toggle_expand_all().await?;
            sleep(self.config.group_settle).await;
        }
        self.surface.toggle_expand_all().await?;
        self.report(id, ScanStatus::Expanding, 14, "Expanded all groups");
        sleep(self.config.expand_all_settle).await;
        Ok(())
    }

    async fn locate_container(&self) -> ScrollTarget {
        for selector in &self.config.scroll_candidates {
            let target = ScrollTarget::Element(selector.clone());
            match self.surface.scroll_metrics(&target).await {
                Ok(Some(m)) if m.overflow() > self.config.min_overflow => return target,
                Ok(_) => {}
                Err(e) => tracing::debug!("Probe of {selector} failed: {e}"),
            }
        }
        ScrollTarget::Page
    }

    async fn finish(&self, id: u64, ending: Ending) -> ScanResult {
        let Some(mut active) = self.release(id) else {
            return ScanResult::ended(id, ScanStatus::Stopped, Some("Scan stopped".into()));
        };

        let (status, percent, message) = match ending {
            Ending::Complete(target) => {
                if let Err(e) = self.surface.scroll_to(&target, 0.0).await {
                    tracing::debug!("Scroll reset failed: {e}");
                }
                (ScanStatus::Complete, 100, "Scan complete".to_string())
            }
            Ending::Timeout => (
                ScanStatus::Timeout,
                100,
                "Scan timed out; results may be partial".to_string(),
            ),
            Ending::Stopped => (
                ScanStatus::Stopped,
                active.session.last_percent,
                "Scan stopped".to_string(),
            ),
            Ending::Failed(reason) => {
                tracing::warn!("Scan {id} failed: {reason}");
                (ScanStatus::Failed, active.session.last_percent, reason)
            }
        };

        let event = active.session.advance(status, percent, Some(message.clone()));
        self.bridge.emit(RelayEvent::ScanProgress(event));
        tracing::info!("Scan {id} ended: {status:?}");
        ScanResult::ended(id, status, Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CaptureError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// A surface that only answers the URL; every DOM call is counted.
    struct UrlOnly {
        url: String,
        dom_calls: AtomicUsize,
    }

    impl UrlOnly {
        fn new(url: &str) -> Arc<Self> {
            Arc::new(Self {
                url: url.to_string(),
                dom_calls: AtomicUsize::new(0),
            })
        }

        fn touched(&self) -> CaptureResult<()> {
            self.dom_calls.fetch_add(1, Ordering::SeqCst);
            Err(CaptureError::Surface("not scriptable".into()))
        }
    }

    #[async_trait]
    impl ScanSurface for UrlOnly {
        async fn current_url(&self) -> CaptureResult<String> {
            Ok(self.url.clone())
        }
        async fn group_expanders(&self) -> CaptureResult<usize> {
            self.touched().map(|_| 0)
        }
        async fn expand_group(&self, _index: usize) -> CaptureResult<()> {
            self.touched()
        }
        async fn expand_all_label(&self) -> CaptureResult<Option<String>> {
            self.touched().map(|_| None)
        }
        async fn toggle_expand_all(&self) -> CaptureResult<()> {
            self.touched()
        }
        async fn scroll_metrics(&self, _target: &ScrollTarget) -> CaptureResult<Option<ScrollMetrics>> {
            self.touched().map(|_| None)
        }
        async fn scroll_to(&self, _target: &ScrollTarget, _top: f64) -> CaptureResult<()> {
            self.touched()
        }
        async fn watch_rows(&self) -> CaptureResult<Box<dyn ChangeSignal>> {
            Err(self.touched().unwrap_err())
        }
    }

    #[tokio::test]
    async fn test_wrong_page_is_refused_without_dom_access() {
        let surface = UrlOnly::new("https://app.procore.com/562/project/rfis");
        let orchestrator = ScanOrchestrator::new(surface.clone(), RelayBridge::new(8), ScanConfig::default());

        let result = orchestrator.start(ScanType::Drawings).await;
        assert!(!result.success);
        assert_eq!(result.message.as_deref(), Some(ScanType::Drawings.page_hint()));
        assert_eq!(surface.dom_calls.load(Ordering::SeqCst), 0);
        assert!(!orchestrator.is_active());
    }

    #[test]
    fn test_stop_when_idle_is_success() {
        let surface = UrlOnly::new("https://app.procore.com/562/project/rfis");
        let orchestrator = ScanOrchestrator::new(surface, RelayBridge::new(8), ScanConfig::default());
        let result = orchestrator.stop();
        assert!(result.success);
        assert_eq!(result.status, ScanStatus::Idle);
        assert!(orchestrator.stop().success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_surface_failure_ends_as_failed() {
        let surface = UrlOnly::new("https://app.procore.com/562/project/rfis");
        let bridge = RelayBridge::new(64);
        let mut rx = bridge.subscribe();
        let orchestrator = ScanOrchestrator::new(surface, bridge, ScanConfig::default());

        let result = orchestrator.start(ScanType::Rfis).await;
        assert!(!result.success);
        assert_eq!(result.status, ScanStatus::Failed);
        assert!(!orchestrator.is_active());

        let mut last = None;
        while let Ok(RelayEvent::ScanProgress(p)) = rx.try_recv() {
            last = Some(p);
        }
        assert_eq!(last.map(|p| p.status), Some(ScanStatus::Failed));
    }
}
