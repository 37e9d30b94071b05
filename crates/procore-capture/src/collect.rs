//! Consumer-side accumulation of captured records.

use std::collections::HashSet;

use crate::normalize::records_from_capture;
use crate::relay::RelayEvent;
use crate::types::{CanonicalRecord, ResourceKind};

/// Folds `WIRETAP_DATA` events into a deduplicated record set.
///
/// The first record seen for a `(kind, id)` pair wins.
#[derive(Debug, Default)]
pub struct RecordCollector {
    records: Vec<CanonicalRecord>,
    seen: HashSet<(ResourceKind, u64)>,
    captures: usize,
}

impl RecordCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest one relay event; returns how many new records it added.
    pub fn ingest(&mut self, event: &RelayEvent) -> usize {
        let RelayEvent::WiretapData { payload } = event else {
            return 0;
        };
        self.captures += 1;

        let before = self.records.len();
        for record in records_from_capture(payload) {
            if self.seen.insert((record.kind(), record.id())) {
                self.records.push(record);
            }
        }
        let added = self.records.len() - before;
        tracing::debug!("Capture from {} added {added} records", payload.source_url);
        added
    }

    pub fn records(&self) -> &[CanonicalRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<CanonicalRecord> {
        self.records
    }

    /// Number of capture events ingested.
    pub fn captures(&self) -> usize {
        self.captures
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.records.iter().filter(|r| r.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaptureEvent, ContextIds, PaginationHeaders, ProgressEvent, ScanStatus, ScanType};
    use chrono::Utc;
    use serde_json::json;

    fn capture(url: &str, payload: serde_json::Value) -> RelayEvent {
        RelayEvent::WiretapData {
            payload: CaptureEvent {
                payload,
                source_url: url.to_string(),
                context_ids: ContextIds::default(),
                pagination_headers: PaginationHeaders::default(),
                captured_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_repeated_captures_dedup() {
        let mut collector = RecordCollector::new();
        let url = "https://app.procore.com/rest/v1.0/projects/5/rfis?page=1";
        let page = json!([
            {"id": 1, "number": "1", "subject": "Door hardware"},
            {"id": 2, "number": "2", "subject": "Slab edge"}
        ]);

        assert_eq!(collector.ingest(&capture(url, page.clone())), 2);
        assert_eq!(collector.ingest(&capture(url, page)), 0);
        assert_eq!(collector.captures(), 2);
        assert_eq!(collector.count(ResourceKind::Rfis), 2);
    }

    #[test]
    fn test_progress_events_ignored() {
        let mut collector = RecordCollector::new();
        let progress = RelayEvent::ScanProgress(ProgressEvent {
            session_id: 1,
            status: ScanStatus::Scanning,
            scan_type: ScanType::Rfis,
            percent: 30,
            message: None,
        });
        assert_eq!(collector.ingest(&progress), 0);
        assert_eq!(collector.captures(), 0);
        assert!(collector.into_records().is_empty());
    }
}
