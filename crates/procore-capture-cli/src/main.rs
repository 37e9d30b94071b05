//! procore-capture: entry point.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use procore_capture::{CaptureConfig, CaptureError, ResourceKind, ScanType};
use procore_capture_cli::commands::crawl;

#[derive(Parser)]
#[command(
    name = "procore-capture",
    about = "Harvest drawings, RFIs, commitments, and specifications with your signed-in session",
    version
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Web application base URL. Also reads PROCORE_BASE_URL.
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Session cookie header. Also reads PROCORE_SESSION_COOKIE or
    /// .procore-capture/session.
    #[arg(long, global = true)]
    cookie: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Page through a REST resource and write the records as JSON.
    Crawl {
        /// drawings, rfis, commitments, or specifications.
        #[arg(value_parser = parse_kind)]
        kind: ResourceKind,

        #[arg(long)]
        project: Option<u64>,

        /// Drawing area (drawings only).
        #[arg(long)]
        area: Option<u64>,

        /// Company (specifications only).
        #[arg(long)]
        company: Option<u64>,

        /// Output file; stdout when omitted.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Scroll a grid in Chromium and collect the records it loads.
    #[cfg(feature = "chromium")]
    Scan {
        /// drawings, rfis, or commitments.
        #[arg(value_parser = parse_scan_type)]
        scan_type: ScanType,

        /// Page to open, e.g. the project's RFIs tool.
        #[arg(long)]
        url: String,

        #[command(flatten)]
        browser: BrowserArgs,

        /// Output file; stdout when omitted.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Open a page in Chromium and serve commands as JSON lines over stdio.
    #[cfg(feature = "chromium")]
    Serve {
        #[arg(long)]
        url: String,

        #[command(flatten)]
        browser: BrowserArgs,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   procore-capture completions bash > ~/.local/share/bash-completion/completions/procore-capture
    ///   procore-capture completions zsh > ~/.zfunc/_procore-capture
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[cfg(feature = "chromium")]
#[derive(clap::Args)]
struct BrowserArgs {
    /// Chromium profile directory holding the signed-in session.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Run without a window. Requires an existing signed-in profile.
    #[arg(long)]
    headless: bool,

    /// Chromium binary. Also reads PROCORE_CAPTURE_CHROMIUM_PATH.
    #[arg(long)]
    chromium: Option<PathBuf>,
}

#[cfg(feature = "chromium")]
impl BrowserArgs {
    fn launch_options(self) -> procore_capture_cli::browser::LaunchOptions {
        let defaults = procore_capture_cli::browser::LaunchOptions::default();
        procore_capture_cli::browser::LaunchOptions {
            profile_dir: self.profile.unwrap_or(defaults.profile_dir),
            headless: self.headless,
            chromium_path: self.chromium,
        }
    }
}

fn parse_kind(s: &str) -> Result<ResourceKind, String> {
    s.parse().map_err(|e: CaptureError| e.to_string())
}

#[cfg_attr(not(feature = "chromium"), allow(dead_code))]
fn parse_scan_type(s: &str) -> Result<ScanType, String> {
    s.parse().map_err(|e: CaptureError| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Crawl {
            kind,
            project,
            area,
            company,
            out,
        } => {
            let config = CaptureConfig::resolve(cli.base_url.as_deref(), cli.cookie.as_deref())?;
            let request = crawl::resource_request(kind, project, area, company)?;
            crawl::run(&config, request, out.as_deref()).await?;
        }

        #[cfg(feature = "chromium")]
        Commands::Scan {
            scan_type,
            url,
            browser,
            out,
        } => {
            use procore_capture_cli::commands::scan;

            let config = CaptureConfig::resolve(cli.base_url.as_deref(), cli.cookie.as_deref())?;
            let report = scan::run(
                &config,
                scan::ScanOptions {
                    scan_type,
                    url,
                    launch: browser.launch_options(),
                    out,
                },
            )
            .await?;
            if !report.result.success {
                std::process::exit(1);
            }
        }

        #[cfg(feature = "chromium")]
        Commands::Serve { url, browser } => {
            let config = CaptureConfig::resolve(cli.base_url.as_deref(), cli.cookie.as_deref())?;
            procore_capture_cli::commands::scan::serve(&config, &browser.launch_options(), &url)
                .await?;
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "procore-capture", &mut std::io::stdout());
        }
    }

    Ok(())
}
