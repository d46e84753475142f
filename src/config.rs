// src/config.rs

//! Scanner configuration: defaults, TOML files and environment overrides.

use crate::error::{Error, Result};
use crate::logging::PROJECT_NAME;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A common desktop browser string; some origins refuse unknown agents.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Settings shared by every check of a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    /// Deadline for one HTTP(S) hop, one TLS handshake or one API call.
    pub request_timeout_secs: u64,
    /// Redirects a chain may follow before it fails.
    pub max_redirects: usize,
    pub user_agent: String,
    /// Port used for `http` URLs that carry no explicit port.
    pub http_port: u16,
    /// Port used for `https` URLs without explicit port, and by the TLS version checks.
    pub https_port: u16,
    /// Skip peer and hostname verification on crawler HTTPS hops.
    pub accept_invalid_certs: bool,
    /// DNS-over-HTTPS JSON endpoint.
    pub doh_endpoint: String,
    /// HSTS preload list status endpoint.
    pub hsts_preload_endpoint: String,
    /// Terminal hop bodies are truncated beyond this many bytes.
    pub max_body_bytes: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            max_redirects: 8,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_port: 80,
            https_port: 443,
            accept_invalid_certs: false,
            doh_endpoint: "https://dns.google.com/resolve".to_string(),
            hsts_preload_endpoint: "https://hstspreload.org/api/v2/status".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl ScanConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            key: "file".to_string(),
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::InvalidConfig {
            key: "file".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `<PROJECT>_<FIELD>` environment overrides.
    pub fn merge_env(mut self) -> Result<Self> {
        let var = |field: &str| std::env::var(format!("{}_{}", PROJECT_NAME.as_str(), field)).ok();

        if let Some(val) = var("REQUEST_TIMEOUT_SECS") {
            self.request_timeout_secs = parse_env("request_timeout_secs", &val)?;
        }
        if let Some(val) = var("MAX_REDIRECTS") {
            self.max_redirects = parse_env("max_redirects", &val)?;
        }
        if let Some(val) = var("USER_AGENT") {
            self.user_agent = val;
        }
        if let Some(val) = var("HTTP_PORT") {
            self.http_port = parse_env("http_port", &val)?;
        }
        if let Some(val) = var("HTTPS_PORT") {
            self.https_port = parse_env("https_port", &val)?;
        }
        if let Some(val) = var("ACCEPT_INVALID_CERTS") {
            self.accept_invalid_certs = parse_env("accept_invalid_certs", &val)?;
        }
        if let Some(val) = var("DOH_ENDPOINT") {
            self.doh_endpoint = val;
        }
        if let Some(val) = var("HSTS_PRELOAD_ENDPOINT") {
            self.hsts_preload_endpoint = val;
        }
        if let Some(val) = var("MAX_BODY_BYTES") {
            self.max_body_bytes = parse_env("max_body_bytes", &val)?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs", "must be greater than zero"));
        }
        if self.http_port == 0 || self.https_port == 0 {
            return Err(invalid("http_port/https_port", "ports must be non-zero"));
        }
        if self.max_body_bytes == 0 {
            return Err(invalid("max_body_bytes", "must be greater than zero"));
        }
        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The port to connect to for a scheme when the URL names none.
    pub fn default_port(&self, secure: bool) -> u16 {
        if secure { self.https_port } else { self.http_port }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    val.trim().parse().map_err(|e: T::Err| invalid(key, &e.to_string()))
}

fn invalid(key: &str, message: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        message: message.to_string(),
    }
}
