//! `crawl`: page through a REST resource with the ambient session.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use indicatif::{ProgressBar, ProgressStyle};

use procore_capture::fetch::{FetchReport, PaginatedFetcher, ResourceRequest};
use procore_capture::{CaptureConfig, HttpTransport, ResourceKind};

use super::write_json;

/// Build the request for `kind`, checking the ids it needs are present.
pub fn resource_request(
    kind: ResourceKind,
    project_id: Option<u64>,
    area_id: Option<u64>,
    company_id: Option<u64>,
) -> anyhow::Result<ResourceRequest> {
    let Some(project_id) = project_id else {
        bail!("--project is required to crawl {kind}");
    };
    Ok(match kind {
        ResourceKind::Drawings => ResourceRequest::Drawings {
            project_id,
            area_id: area_id.with_context(|| "--area is required to crawl drawings")?,
        },
        ResourceKind::Rfis => ResourceRequest::Rfis { project_id },
        ResourceKind::Commitments => ResourceRequest::Commitments { project_id },
        ResourceKind::Specifications => ResourceRequest::Specifications {
            company_id: company_id
                .with_context(|| "--company is required to crawl specifications")?,
            project_id,
        },
    })
}

fn progress_bar(kind: ResourceKind) -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template("{spinner} {msg:>14} [{bar:30}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    bar.set_style(style);
    bar.set_message(kind.to_string());
    bar
}

pub async fn run(
    config: &CaptureConfig,
    request: ResourceRequest,
    out: Option<&Path>,
) -> anyhow::Result<FetchReport> {
    let transport = HttpTransport::new(config)?;
    let fetcher = PaginatedFetcher::new(Arc::new(transport), &config.base_url);

    let bar = progress_bar(request.kind());
    let report_progress = {
        let bar = bar.clone();
        move |items: usize, total: Option<u64>| {
            if let Some(total) = total {
                bar.set_length(total);
            }
            bar.set_position(items as u64);
        }
    };

    let report = fetcher.fetch(request, Some(&report_progress)).await;
    bar.finish_and_clear();

    if report.partial {
        tracing::warn!(
            "Crawl of {} stopped early ({:?}); {} records kept",
            report.kind,
            report.stop_reason,
            report.records.len()
        );
    } else {
        tracing::info!("Crawled {} {}", report.records.len(), report.kind);
    }

    write_json(&report, out)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_requires_ids() {
        assert!(resource_request(ResourceKind::Rfis, None, None, None).is_err());
        assert!(resource_request(ResourceKind::Drawings, Some(5), None, None).is_err());
        assert!(resource_request(ResourceKind::Specifications, Some(5), None, None).is_err());

        assert_eq!(
            resource_request(ResourceKind::Drawings, Some(5), Some(9), None).unwrap(),
            ResourceRequest::Drawings {
                project_id: 5,
                area_id: 9
            }
        );
        assert_eq!(
            resource_request(ResourceKind::Commitments, Some(5), None, Some(8)).unwrap(),
            ResourceRequest::Commitments { project_id: 5 }
        );
    }
}
