//! Subcommand implementations.

pub mod crawl;
#[cfg(feature = "chromium")]
pub mod scan;

use std::path::Path;

use anyhow::Context;
use serde::Serialize;

/// Write `value` as pretty JSON to `out`, or to stdout when `None`.
pub fn write_json<T: Serialize>(value: &T, out: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match out {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("Wrote {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
