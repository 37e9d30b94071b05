//! `scan` and `serve`: drive a grid in Chromium and collect what the page
//! fetches while it scrolls.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use procore_capture::agent::{CaptureAgent, CommandReply};
use procore_capture::relay::{Command, RelayBridge, RelayEvent};
use procore_capture::scan::{ScanConfig, ScanResult};
use procore_capture::{CanonicalRecord, CaptureConfig, RecordCollector, ScanType};

use super::write_json;
use crate::browser::{spawn_network_capture, BrowserSession, ChromiumSurface, LaunchOptions};
use crate::stdio::StdioServer;

/// Time left for body fetches still in flight when the scan ends.
const CAPTURE_GRACE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub scan_type: ScanType,
    pub url: String,
    pub launch: LaunchOptions,
    pub out: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub result: ScanResult,
    pub captures: usize,
    pub records: Vec<CanonicalRecord>,
}

/// Launch the browser, open `url`, and wire an agent to the page.
async fn attach(
    config: &CaptureConfig,
    launch: &LaunchOptions,
    url: &str,
    bridge: &RelayBridge,
) -> anyhow::Result<(BrowserSession, Arc<CaptureAgent>, tokio::task::JoinHandle<()>)> {
    let session = BrowserSession::launch(launch).await?;
    let page = session.open(url).await?;

    let surface = Arc::new(ChromiumSurface::new(page.clone()));
    let agent = Arc::new(CaptureAgent::new(surface, bridge.clone(), config, ScanConfig::default()));
    agent.interceptor().set_page_url(url);
    let capture = spawn_network_capture(page, agent.interceptor()).await?;
    Ok((session, agent, capture))
}

async fn collect_until(
    mut events: broadcast::Receiver<RelayEvent>,
    mut stop: oneshot::Receiver<()>,
    bar: ProgressBar,
) -> RecordCollector {
    let mut collector = RecordCollector::new();
    loop {
        tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => {
                    if let RelayEvent::ScanProgress(progress) = &event {
                        bar.set_position(progress.percent as u64);
                        if let Some(message) = &progress.message {
                            bar.set_message(message.clone());
                        }
                    }
                    collector.ingest(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Collector lagging, skipped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut stop => {
                while let Ok(event) = events.try_recv() {
                    collector.ingest(&event);
                }
                break;
            }
        }
    }
    collector
}

pub async fn run(config: &CaptureConfig, options: ScanOptions) -> anyhow::Result<ScanReport> {
    let bridge = RelayBridge::default();
    let (session, agent, capture) = attach(config, &options.launch, &options.url, &bridge).await?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    let (stop_tx, stop_rx) = oneshot::channel();
    let collecting = tokio::spawn(collect_until(bridge.subscribe(), stop_rx, bar.clone()));

    let interrupt = {
        let orchestrator = agent.orchestrator();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, stopping scan");
                orchestrator.stop();
            }
        })
    };
    let reply = agent
        .handle(Command::TriggerScan {
            scan_type: options.scan_type,
        })
        .await;
    interrupt.abort();

    tokio::time::sleep(CAPTURE_GRACE).await;
    capture.abort();
    let _ = stop_tx.send(());
    let collector = collecting.await?;
    bar.finish_and_clear();
    session.close().await?;

    let CommandReply::Scan(result) = reply else {
        bail!("unexpected reply to TRIGGER_SCAN");
    };
    if !result.success {
        tracing::warn!(
            "Scan did not run: {}",
            result.message.as_deref().unwrap_or("unknown reason")
        );
    }

    let report = ScanReport {
        result,
        captures: collector.captures(),
        records: collector.into_records(),
    };
    tracing::info!(
        "Collected {} records from {} captures",
        report.records.len(),
        report.captures
    );
    write_json(&report, options.out.as_deref())?;
    Ok(report)
}

/// Serve relay commands over stdio for the page at `url`.
pub async fn serve(config: &CaptureConfig, launch: &LaunchOptions, url: &str) -> anyhow::Result<()> {
    let bridge = RelayBridge::default();
    let (session, agent, capture) = attach(config, launch, url, &bridge).await?;

    let served = StdioServer::new(agent, bridge).run().await;

    capture.abort();
    session.close().await?;
    served
}
