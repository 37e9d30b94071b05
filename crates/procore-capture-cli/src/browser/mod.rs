//! Chromium driver: launch a browser on a persistent profile, expose the
//! page as a [`ScanSurface`](procore_capture::scan::ScanSurface), and feed
//! its network traffic to the interceptor.

pub mod network;
pub mod surface;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

pub use network::spawn_network_capture;
pub use surface::{ChromiumRowSignal, ChromiumSurface};

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("PROCORE_CAPTURE_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Default profile directory, so a login survives between runs.
pub fn default_profile_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("procore-capture")
        .join("chromium-profile")
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub profile_dir: PathBuf,
    /// Headed by default: the user may need to sign in.
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            profile_dir: default_profile_dir(),
            headless: false,
            chromium_path: None,
        }
    }
}

/// A running Chromium instance and its event handler task.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn launch(options: &LaunchOptions) -> Result<Self> {
        let chrome_path = match &options.chromium_path {
            Some(path) => path.clone(),
            None => find_chromium()
                .context("Chromium not found. Install Chrome or set PROCORE_CAPTURE_CHROMIUM_PATH.")?,
        };
        std::fs::create_dir_all(&options.profile_dir).with_context(|| {
            format!("failed to create profile dir {}", options.profile_dir.display())
        })?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(&options.profile_dir)
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run");
        if !options.headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler: {e}");
                }
            }
        });

        tracing::info!("Chromium started (profile {})", options.profile_dir.display());
        Ok(Self { browser, handler })
    }

    /// Open `url` in a new tab and wait for it to load.
    pub async fn open(&self, url: &str) -> Result<Page> {
        let page = self
            .browser
            .new_page(url)
            .await
            .with_context(|| format!("failed to open {url}"))?;
        if let Err(e) = page.wait_for_navigation().await {
            tracing::warn!("Navigation to {url} did not settle: {e}");
        }
        Ok(page)
    }

    pub async fn close(mut self) -> Result<()> {
        if let Err(e) = self.browser.close().await {
            tracing::debug!("Browser close: {e}");
        }
        self.handler.abort();
        Ok(())
    }
}
