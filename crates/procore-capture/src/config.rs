//! Configuration loading and resolution.
//!
//! Every value resolves as: explicit argument, then environment variable,
//! then a session file (cookie only), then the built-in default.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{CaptureError, CaptureResult};

/// Default host for the web application and its REST API.
pub const DEFAULT_BASE_URL: &str = "https://app.procore.com";

/// Registrable domain the interceptor accepts traffic from.
pub const DEFAULT_APP_DOMAIN: &str = "procore.com";

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const SESSION_FILE: &str = ".procore-capture/session";

/// Settings shared by the transport, fetcher, and interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub base_url: String,
    pub app_domain: String,
    /// Raw `Cookie` header value for the ambient authenticated session.
    #[serde(skip_serializing)]
    pub session_cookie: Option<String>,
    pub request_timeout_ms: u64,
    /// Transport-level retries for 5xx and 429 responses.
    pub max_retries: u32,
    pub user_agent: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            app_domain: DEFAULT_APP_DOMAIN.to_string(),
            session_cookie: None,
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("procore-capture/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl CaptureConfig {
    /// Resolve configuration from explicit values, the environment, and
    /// the session file.
    pub fn resolve(base_url: Option<&str>, cookie: Option<&str>) -> CaptureResult<Self> {
        let mut config = Self::default();

        if let Some(url) = base_url
            .map(str::to_string)
            .or_else(|| std::env::var("PROCORE_BASE_URL").ok())
        {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        url::Url::parse(&config.base_url)
            .map_err(|e| CaptureError::Config(format!("base URL {}: {e}", config.base_url)))?;

        if let Ok(raw) = std::env::var("PROCORE_TIMEOUT_MS") {
            config.request_timeout_ms = raw
                .parse()
                .map_err(|_| CaptureError::Config(format!("PROCORE_TIMEOUT_MS={raw}")))?;
        }

        config.session_cookie = resolve_session_cookie(cookie);
        if config.session_cookie.is_none() {
            tracing::warn!("No session cookie configured; requests will be unauthenticated");
        }

        Ok(config)
    }

    /// Config pointing at an arbitrary base URL, for local servers.
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

/// Resolve the session cookie: explicit value, `PROCORE_SESSION_COOKIE`,
/// `./.procore-capture/session`, then `~/.procore-capture/session`.
pub fn resolve_session_cookie(explicit: Option<&str>) -> Option<String> {
    if let Some(cookie) = explicit {
        return Some(cookie.trim().to_string());
    }

    if let Ok(cookie) = std::env::var("PROCORE_SESSION_COOKIE") {
        if !cookie.trim().is_empty() {
            return Some(cookie.trim().to_string());
        }
    }

    session_file_candidates()
        .iter()
        .find_map(|path| read_session_file(path))
}

fn session_file_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(SESSION_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(SESSION_FILE));
    }
    candidates
}

/// Read a cookie from a session file, ignoring blank files.
pub fn read_session_file(path: &Path) -> Option<String> {
    let raw = std::fs::read_to_string(path).ok()?;
    let cookie = raw.trim();
    if cookie.is_empty() {
        return None;
    }
    tracing::debug!("Loaded session cookie from {}", path.display());
    Some(cookie.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_cookie_wins() {
        assert_eq!(
            resolve_session_cookie(Some("  _session=abc ")).as_deref(),
            Some("_session=abc")
        );
    }

    #[test]
    fn test_read_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session");
        std::fs::write(&path, "_procore_session=xyz\n").unwrap();
        assert_eq!(read_session_file(&path).as_deref(), Some("_procore_session=xyz"));

        std::fs::write(&path, "   \n").unwrap();
        assert!(read_session_file(&path).is_none());
        assert!(read_session_file(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn test_with_base_url_trims_slash() {
        let config = CaptureConfig::with_base_url("http://127.0.0.1:9000/");
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.app_domain, DEFAULT_APP_DOMAIN);
    }

    #[test]
    fn test_resolve_rejects_bad_base_url() {
        assert!(CaptureConfig::resolve(Some("not a url"), Some("c=1")).is_err());
    }
}
