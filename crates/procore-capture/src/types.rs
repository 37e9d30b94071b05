//! Core data types shared by every stage of the capture pipeline.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Numeric identifiers derived from the host page URL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextIds {
    pub company_id: Option<u64>,
    pub project_id: Option<u64>,
    pub area_id: Option<u64>,
}

/// Pagination hints read from response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationHeaders {
    pub total: Option<u64>,
    pub per_page: Option<u64>,
}

/// A passively observed JSON response that passed the relevance filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    pub payload: Value,
    pub source_url: String,
    pub context_ids: ContextIds,
    pub pagination_headers: PaginationHeaders,
    pub captured_at: DateTime<Utc>,
}

/// One page of an active crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePage<T> {
    pub items: Vec<T>,
    pub total: Option<u64>,
    pub per_page: Option<u64>,
}

/// The four upstream resource families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Drawings,
    Rfis,
    Commitments,
    Specifications,
}

impl ResourceKind {
    /// Requested page size for an active crawl of this resource.
    pub fn page_size(self) -> u32 {
        match self {
            Self::Drawings => 500,
            Self::Rfis | Self::Commitments | Self::Specifications => 100,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drawings => write!(f, "drawings"),
            Self::Rfis => write!(f, "rfis"),
            Self::Commitments => write!(f, "commitments"),
            Self::Specifications => write!(f, "specifications"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drawings" | "drawing" => Ok(Self::Drawings),
            "rfis" | "rfi" => Ok(Self::Rfis),
            "commitments" | "commitment" => Ok(Self::Commitments),
            "specifications" | "specification" | "specs" => Ok(Self::Specifications),
            other => Err(CaptureError::InvalidInput(format!("unknown resource kind: {other}"))),
        }
    }
}

/// A drawing from the drawing log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: u64,
    pub number: String,
    pub title: String,
    pub discipline: Option<String>,
    pub discipline_id: Option<u64>,
    pub revision: Option<String>,
    pub drawing_date: Option<String>,
    pub received_date: Option<String>,
    pub status: Option<String>,
}

/// A request for information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rfi {
    pub id: u64,
    pub number: String,
    pub subject: String,
    pub status: Option<String>,
    pub due_date: Option<String>,
    pub assignee: Option<String>,
    pub ball_in_court: Option<String>,
}

/// A commitment (subcontract, purchase order, or work order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: u64,
    pub number: Option<String>,
    pub title: Option<String>,
    pub vendor: Option<String>,
    pub status: Option<String>,
    pub contract_date: Option<String>,
    pub commitment_type: Option<String>,
}

/// A specification section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub id: u64,
    pub number: String,
    pub title: String,
    pub division_id: Option<u64>,
    pub revision: Option<String>,
}

/// A normalized, kind-tagged upstream item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalRecord {
    Drawing(Drawing),
    Rfi(Rfi),
    Commitment(Commitment),
    Specification(Specification),
}

impl CanonicalRecord {
    pub fn id(&self) -> u64 {
        match self {
            Self::Drawing(d) => d.id,
            Self::Rfi(r) => r.id,
            Self::Commitment(c) => c.id,
            Self::Specification(s) => s.id,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Drawing(_) => ResourceKind::Drawings,
            Self::Rfi(_) => ResourceKind::Rfis,
            Self::Commitment(_) => ResourceKind::Commitments,
            Self::Specification(_) => ResourceKind::Specifications,
        }
    }
}

/// Anything carrying a project-scoped identifier.
pub trait Identified {
    fn record_id(&self) -> u64;
}

impl Identified for Drawing {
    fn record_id(&self) -> u64 {
        self.id
    }
}

impl Identified for Rfi {
    fn record_id(&self) -> u64 {
        self.id
    }
}

impl Identified for Commitment {
    fn record_id(&self) -> u64 {
        self.id
    }
}

impl Identified for Specification {
    fn record_id(&self) -> u64 {
        self.id
    }
}

impl Identified for CanonicalRecord {
    fn record_id(&self) -> u64 {
        self.id()
    }
}

/// A single lookup entry: display name plus position in the source ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub name: String,
    pub index: usize,
}

/// Discipline or division lookup, keyed by source identifier.
///
/// Built once per fetch and never merged. An empty map means the lookup
/// was unavailable, not that the project has no entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupMap {
    entries: HashMap<u64, LookupEntry>,
}

impl LookupMap {
    pub fn from_entries(entries: HashMap<u64, LookupEntry>) -> Self {
        Self { entries }
    }

    pub fn get(&self, id: u64) -> Option<&LookupEntry> {
        self.entries.get(&id)
    }

    pub fn name(&self, id: u64) -> Option<&str> {
        self.entries.get(&id).map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the lookup succeeded.
    pub fn is_available(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Entries in source order.
    pub fn ordered(&self) -> Vec<(u64, &LookupEntry)> {
        let mut out: Vec<_> = self.entries.iter().map(|(k, v)| (*k, v)).collect();
        out.sort_by_key(|(_, e)| e.index);
        out
    }
}

/// Which grid a DOM scan targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanType {
    Drawings,
    Rfis,
    Commitments,
}

impl ScanType {
    /// Whether `url` is a page this scan can run on.
    pub fn matches_page(self, url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        match self {
            Self::Drawings => lower.contains("drawing_log") || lower.contains("/drawings"),
            Self::Rfis => lower.contains("/rfis"),
            Self::Commitments => lower.contains("commitments") || lower.contains("contracts"),
        }
    }

    /// Human description of the page the scan needs.
    pub fn page_hint(self) -> &'static str {
        match self {
            Self::Drawings => "Open the project's Drawings log before starting a drawings scan",
            Self::Rfis => "Open the project's RFIs tool before starting an RFI scan",
            Self::Commitments => {
                "Open the project's Commitments tool before starting a commitments scan"
            }
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drawings => write!(f, "drawings"),
            Self::Rfis => write!(f, "rfis"),
            Self::Commitments => write!(f, "commitments"),
        }
    }
}

impl std::str::FromStr for ScanType {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drawings" | "drawing" => Ok(Self::Drawings),
            "rfis" | "rfi" => Ok(Self::Rfis),
            "commitments" | "commitment" => Ok(Self::Commitments),
            other => Err(CaptureError::InvalidInput(format!("unknown scan type: {other}"))),
        }
    }
}

/// Lifecycle state of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Idle,
    Expanding,
    Scanning,
    Stabilizing,
    Complete,
    Timeout,
    Stopped,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Complete | Self::Timeout | Self::Stopped | Self::Failed
        )
    }
}

/// Progress report for one scan session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub session_id: u64,
    pub status: ScanStatus,
    pub scan_type: ScanType,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Errors raised inside the capture pipeline.
///
/// Public pipeline operations resolve these internally; they only surface
/// from the lower-level building blocks (transport, surface, config).
#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Surface error: {0}")]
    Surface(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for CaptureError {
    fn from(e: reqwest::Error) -> Self {
        CaptureError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for CaptureError {
    fn from(e: url::ParseError) -> Self {
        CaptureError::InvalidUrl(e.to_string())
    }
}

/// Convenience result type.
pub type CaptureResult<T> = Result<T, CaptureError>;
