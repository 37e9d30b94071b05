//! Scan session state, tuning, and results.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{ProgressEvent, ScanStatus, ScanType};

/// Scroll container candidates, tried in order.
pub const SCROLL_CANDIDATES: &[&str] = &[
    ".ag-body-viewport",
    ".ag-body-vertical-scroll-viewport",
    "[data-qa='data-table-body']",
    ".ReactVirtualized__Grid",
    "[role='grid']",
    "main",
];

/// Leading percentage band reserved for the expansion phase.
pub const EXPANSION_BAND_END: u8 = 15;

/// Timing and geometry knobs for a scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub tick_interval: Duration,
    pub scroll_step: f64,
    /// Distance from the end that counts as "at the end".
    pub end_margin: f64,
    /// Minimum overflow for a candidate to count as scrollable.
    pub min_overflow: f64,
    pub stable_threshold: u32,
    pub timeout: Duration,
    pub group_settle: Duration,
    pub expand_all_settle: Duration,
    pub scroll_candidates: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(400),
            scroll_step: 800.0,
            end_margin: 50.0,
            min_overflow: 50.0,
            stable_threshold: 5,
            timeout: Duration::from_secs(60),
            group_settle: Duration::from_millis(400),
            expand_all_settle: Duration::from_secs(2),
            scroll_candidates: SCROLL_CANDIDATES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// State of the single active scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub id: u64,
    pub status: ScanStatus,
    pub scan_type: ScanType,
    pub stable_cycles: u32,
    pub scroll_position: f64,
    pub last_percent: u8,
}

impl ScanSession {
    pub fn new(id: u64, scan_type: ScanType) -> Self {
        Self {
            id,
            status: ScanStatus::Idle,
            scan_type,
            stable_cycles: 0,
            scroll_position: 0.0,
            last_percent: 0,
        }
    }

    /// Move to `status` and build the matching progress event.
    ///
    /// `percent` is clamped to 100 and never drops below what this session
    /// already reported.
    pub fn advance(&mut self, status: ScanStatus, percent: u8, message: Option<String>) -> ProgressEvent {
        let percent = percent.min(100).max(self.last_percent);
        self.status = status;
        self.last_percent = percent;
        ProgressEvent {
            session_id: self.id,
            status,
            scan_type: self.scan_type,
            percent,
            message,
        }
    }
}

/// Outcome of a scan command. Never an error: failures are described.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub success: bool,
    pub status: ScanStatus,
    pub session_id: Option<u64>,
    /// Whether the scan ended before it could confirm it saw everything.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScanResult {
    /// A request refused before any side effect.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            status: ScanStatus::Idle,
            session_id: None,
            partial: false,
            message: Some(message.into()),
        }
    }

    pub(crate) fn ended(session_id: u64, status: ScanStatus, message: Option<String>) -> Self {
        Self {
            success: status != ScanStatus::Failed,
            status,
            session_id: Some(session_id),
            partial: status != ScanStatus::Complete,
            message,
        }
    }
}

/// Percent for a scroll position: the band after expansion, capped at 99.
pub fn scroll_percent(scroll_top: f64, max_scroll: f64) -> u8 {
    let fraction = (scroll_top / max_scroll.max(1.0)).clamp(0.0, 1.0);
    let percent = EXPANSION_BAND_END as f64 + (fraction * 85.0).floor();
    percent.min(99.0) as u8
}

/// Percent after expanding `done` of `total` groups, within 2..=14.
pub fn expansion_percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 2;
    }
    let done = done.min(total);
    (2 + (done * 12) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scroll_percent_band() {
        assert_eq!(scroll_percent(0.0, 4000.0), 15);
        assert_eq!(scroll_percent(2000.0, 4000.0), 57);
        assert_eq!(scroll_percent(4000.0, 4000.0), 99);
        assert_eq!(scroll_percent(10.0, 0.0), 99);
    }

    #[test]
    fn test_expansion_percent_band() {
        assert_eq!(expansion_percent(0, 10), 2);
        assert_eq!(expansion_percent(5, 10), 8);
        assert_eq!(expansion_percent(10, 10), 14);
        assert_eq!(expansion_percent(3, 0), 2);
    }

    #[test]
    fn test_advance_is_monotonic_and_bounded() {
        let mut session = ScanSession::new(1, ScanType::Rfis);
        assert_eq!(session.advance(ScanStatus::Scanning, 40, None).percent, 40);
        assert_eq!(session.advance(ScanStatus::Scanning, 20, None).percent, 40);
        assert_eq!(session.advance(ScanStatus::Complete, 250, None).percent, 100);
        assert_eq!(session.status, ScanStatus::Complete);
    }

    #[test]
    fn test_result_flags() {
        let done = ScanResult::ended(4, ScanStatus::Complete, None);
        assert!(done.success && !done.partial);
        let timeout = ScanResult::ended(4, ScanStatus::Timeout, None);
        assert!(timeout.success && timeout.partial);
        let failed = ScanResult::ended(4, ScanStatus::Failed, None);
        assert!(!failed.success);
        assert!(!ScanResult::rejected("busy").success);
    }
}
