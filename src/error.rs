// src/error.rs

//! Error types for the site scanner.
//!
//! Every failure site maps to one variant, and every variant belongs to exactly
//! one [`ErrorKind`]. Check-level errors are converted into failing verdicts by
//! the scanner; only fatal scan errors and configuration errors reach callers.

use thiserror::Error;

/// Result type alias using the scanner [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input before any scanning happens, or misuse of the scanner.
    Configuration,
    /// Connection refused, DNS failure, TLS handshake failure.
    Transport,
    /// A socket exceeded its deadline and was torn down.
    Timeout,
    /// The peer answered, but not in a way a chain can continue from.
    Protocol,
    /// Neither HTTP nor HTTPS could be reached.
    FatalScan,
}

#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Must specify a valid root domain, eg example.com (got {0:?})")]
    InvalidDomain(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Scan already performed for {domain}")]
    AlreadyScanned { domain: String },

    // === Transport Errors ===
    #[error("Transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("TLS error for {url}: {message}")]
    Tls { url: String, message: String },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // === Timeout Errors ===
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    // === Protocol Errors ===
    #[error("Too many redirects (limit {limit}) at {url}")]
    TooManyRedirects { url: String, limit: usize },

    #[error("Redirect without a Location header from {url}")]
    MissingLocation { url: String },

    #[error("Cannot resolve redirect location {location:?}")]
    InvalidLocation { location: String },

    #[error("Unsupported scheme {scheme:?} in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("{url} answered with status {status}")]
    ErrorStatus { url: String, status: u16 },

    #[error("Malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    #[error("Chain does not satisfy precondition: {0}")]
    ChainContract(&'static str),

    // === Fatal Scan Errors ===
    #[error("{domain} is unreachable over both HTTP ({http}) and HTTPS ({https})")]
    Unreachable {
        domain: String,
        http: String,
        https: String,
    },
}

impl Error {
    /// Classify this error into the scanner's taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidDomain(_) | Error::InvalidConfig { .. } | Error::AlreadyScanned { .. } => {
                ErrorKind::Configuration
            }
            Error::Transport { .. } | Error::Tls { .. } => ErrorKind::Transport,
            Error::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            Error::Http(_) => ErrorKind::Transport,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::TooManyRedirects { .. }
            | Error::MissingLocation { .. }
            | Error::InvalidLocation { .. }
            | Error::UnsupportedScheme { .. }
            | Error::ErrorStatus { .. }
            | Error::MalformedResponse { .. }
            | Error::ChainContract(_) => ErrorKind::Protocol,
            Error::Unreachable { .. } => ErrorKind::FatalScan,
        }
    }

    /// Check if this error must abort the scan instead of becoming a failing verdict.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::FatalScan | ErrorKind::Configuration)
    }

    /// Get an error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidDomain(_) => "INVALID_DOMAIN",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Error::AlreadyScanned { .. } => "ALREADY_SCANNED",
            Error::Transport { .. } => "TRANSPORT_ERROR",
            Error::Tls { .. } => "TLS_ERROR",
            Error::Http(_) => "HTTP_CLIENT_ERROR",
            Error::Timeout { .. } => "TIMEOUT",
            Error::TooManyRedirects { .. } => "TOO_MANY_REDIRECTS",
            Error::MissingLocation { .. } => "MISSING_LOCATION",
            Error::InvalidLocation { .. } => "INVALID_LOCATION",
            Error::UnsupportedScheme { .. } => "UNSUPPORTED_SCHEME",
            Error::ErrorStatus { .. } => "ERROR_STATUS",
            Error::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Error::ChainContract(_) => "CHAIN_CONTRACT",
            Error::Unreachable { .. } => "UNREACHABLE",
        }
    }

    /// Map an I/O failure on a socket to a timeout or transport error.
    pub(crate) fn from_io(url: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Error::Timeout { url: url.to_string() }
            }
            _ => Error::Transport {
                url: url.to_string(),
                message: err.to_string(),
            },
        }
    }
}
