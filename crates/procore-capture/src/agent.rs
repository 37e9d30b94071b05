//! Command dispatch for one page context.
//!
//! `CaptureAgent` is the receiving end of [`Command`]s. It owns the page's
//! scan orchestrator and interceptor, and answers every command with a
//! [`CommandReply`] rather than an error.

use std::sync::Arc;

use serde::Serialize;

use crate::config::CaptureConfig;
use crate::intercept::{context_ids_from_url, Interceptor};
use crate::relay::{Command, RelayBridge};
use crate::scan::{ScanConfig, ScanOrchestrator, ScanResult, ScanSurface};

/// Identity of the page the agent is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub url: String,
    pub company_id: Option<u64>,
    pub project_id: Option<u64>,
    pub drawing_area_id: Option<u64>,
    pub is_matching_host: bool,
}

/// Reply to a single command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    Scan(ScanResult),
    PageInfo(PageInfo),
}

pub struct CaptureAgent {
    surface: Arc<dyn ScanSurface>,
    orchestrator: Arc<ScanOrchestrator>,
    interceptor: Arc<Interceptor>,
    app_domain: String,
}

impl CaptureAgent {
    pub fn new(
        surface: Arc<dyn ScanSurface>,
        bridge: RelayBridge,
        config: &CaptureConfig,
        scan_config: ScanConfig,
    ) -> Self {
        let orchestrator = Arc::new(ScanOrchestrator::new(
            Arc::clone(&surface),
            bridge.clone(),
            scan_config,
        ));
        let interceptor = Arc::new(Interceptor::new(bridge, &config.app_domain, &config.base_url));
        Self {
            surface,
            orchestrator,
            interceptor,
            app_domain: config.app_domain.clone(),
        }
    }

    pub fn interceptor(&self) -> Arc<Interceptor> {
        Arc::clone(&self.interceptor)
    }

    pub fn orchestrator(&self) -> Arc<ScanOrchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub async fn handle(&self, command: Command) -> CommandReply {
        tracing::debug!("Handling {command:?}");
        match command {
            Command::TriggerScan { scan_type } => {
                self.sync_page_url().await;
                CommandReply::Scan(self.orchestrator.start(scan_type).await)
            }
            Command::StopScan {} => CommandReply::Scan(self.orchestrator.stop()),
            Command::GetPageInfo {} => CommandReply::PageInfo(self.page_info().await),
        }
    }

    pub async fn page_info(&self) -> PageInfo {
        let url = match self.surface.current_url().await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Cannot read page URL: {e}");
                String::new()
            }
        };
        let ids = context_ids_from_url(&url);
        let is_matching_host = url::Url::parse(&url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
            .is_some_and(|host| {
                let domain = self.app_domain.to_ascii_lowercase();
                host == domain || host.ends_with(&format!(".{domain}"))
            });

        PageInfo {
            url,
            company_id: ids.company_id,
            project_id: ids.project_id,
            drawing_area_id: ids.area_id,
            is_matching_host,
        }
    }

    /// Keep capture context ids in step with where the page is now.
    async fn sync_page_url(&self) {
        if let Ok(url) = self.surface.current_url().await {
            self.interceptor.set_page_url(&url);
        }
    }
}
