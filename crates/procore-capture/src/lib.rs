//! procore-capture: harvest drawings, RFIs, commitments, and specifications
//! from a project-management web application using the session the user is
//! already signed in with.

pub mod agent;
pub mod collect;
pub mod config;
pub mod fetch;
pub mod intercept;
pub mod normalize;
pub mod relay;
pub mod scan;
pub mod transport;
pub mod types;

pub use agent::{CaptureAgent, CommandReply, PageInfo};
pub use collect::RecordCollector;
pub use config::CaptureConfig;
pub use fetch::{FetchReport, PaginatedFetcher, ResourceRequest, StopReason};
pub use intercept::{InterceptingTransport, Interceptor};
pub use relay::{Command, Delivery, RelayBridge, RelayEvent};
pub use scan::{ScanConfig, ScanOrchestrator, ScanResult, ScanSurface};
pub use transport::{HttpTransport, Transport};
pub use types::*;
