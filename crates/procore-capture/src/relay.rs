//! Relay bridge: typed, best-effort messaging between execution contexts.
//!
//! Events travel over a `tokio::sync::broadcast` channel. Delivery is
//! at-most-once and carries no correlation id. Emitting with nobody
//! subscribed is a normal outcome ([`Delivery::NoListener`]), not an error.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{CaptureEvent, ProgressEvent, ScanType};

/// Events flowing from the capture/scan layer to the consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayEvent {
    /// A captured response.
    WiretapData { payload: CaptureEvent },
    /// Scan progress for one session.
    ScanProgress(ProgressEvent),
}

/// Commands flowing from the consumer to the capture/scan layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    TriggerScan {
        #[serde(rename = "scanType")]
        scan_type: ScanType,
    },
    StopScan {},
    GetPageInfo {},
}

/// Outcome of a single emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Number of receivers the event was handed to.
    Delivered(usize),
    /// Nobody was listening; the event was dropped.
    NoListener,
}

/// The event bus shared by the interceptor, orchestrator, and consumers.
#[derive(Clone)]
pub struct RelayBridge {
    sender: broadcast::Sender<RelayEvent>,
}

impl RelayBridge {
    /// Create a new bridge with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: RelayEvent) -> Delivery {
        match self.sender.send(event) {
            Ok(n) => Delivery::Delivered(n),
            Err(_) => Delivery::NoListener,
        }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RelayBridge {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScanStatus;

    fn progress(percent: u8) -> RelayEvent {
        RelayEvent::ScanProgress(ProgressEvent {
            session_id: 1,
            status: ScanStatus::Scanning,
            scan_type: ScanType::Drawings,
            percent,
            message: None,
        })
    }

    #[test]
    fn test_emit_no_listener_is_not_an_error() {
        let bridge = RelayBridge::new(8);
        assert_eq!(bridge.emit(progress(10)), Delivery::NoListener);
    }

    #[test]
    fn test_subscribe_receive() {
        let bridge = RelayBridge::new(8);
        let mut rx = bridge.subscribe();
        assert_eq!(bridge.emit(progress(20)), Delivery::Delivered(1));

        match rx.try_recv().unwrap() {
            RelayEvent::ScanProgress(p) => assert_eq!(p.percent, 20),
            other => panic!("wrong event: {other:?}"),
        }
    }

    #[test]
    fn test_progress_wire_format() {
        let json = serde_json::to_value(progress(55)).unwrap();
        assert_eq!(json["action"], "SCAN_PROGRESS");
        assert_eq!(json["percent"], 55);
        assert_eq!(json["scanType"], "drawings");
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command =
            serde_json::from_str(r#"{"action":"TRIGGER_SCAN","scanType":"rfis"}"#).unwrap();
        assert_eq!(
            cmd,
            Command::TriggerScan {
                scan_type: ScanType::Rfis
            }
        );

        let stop: Command = serde_json::from_str(r#"{"action":"STOP_SCAN"}"#).unwrap();
        assert_eq!(stop, Command::StopScan {});

        let info = serde_json::to_string(&Command::GetPageInfo {}).unwrap();
        assert_eq!(info, r#"{"action":"GET_PAGE_INFO"}"#);
    }
}
