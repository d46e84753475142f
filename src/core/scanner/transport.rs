// src/core/scanner/transport.rs

//! A single GET per hop, sent through reqwest.
//!
//! The hop client never follows redirects and keeps no idle connections, so
//! every hop opens a fresh connection. The chain owns the cookie jar; the
//! client has no cookie store of its own.

use tracing::{debug, warn};

use crate::config::ScanConfig;
use crate::core::models::{CertificateInfo, RequestDescriptor};
use crate::core::scanner::ssl_scanner::certificate_info_from_der;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, ACCEPT, COOKIE};
use reqwest::redirect::Policy;
use reqwest::tls::TlsInfo;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,*/*;q=0.8";

/// What came back from one hop, before it is folded into a `Hop`.
#[derive(Debug)]
pub struct RawResponse {
    pub status: u16,
    /// Header lines in wire order, names lower-cased by the HTTP stack.
    pub header_lines: Vec<(String, String)>,
    /// Only read for non-redirect, non-error statuses.
    pub body: Option<String>,
    pub certificate: Option<CertificateInfo>,
}

/// Builds the client every hop of one chain is sent through.
pub fn hop_client(config: &ScanConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.request_timeout())
        .redirect(Policy::none())
        .pool_max_idle_per_host(0)
        .http1_only()
        .tls_info(true)
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .map_err(|e| Error::InvalidConfig {
            key: "http_client".to_string(),
            message: e.to_string(),
        })
}

/// Issues one GET for `request`, replaying `cookie` if present.
///
/// A URL without an explicit port goes to the configured port for its scheme.
pub async fn fetch(
    client: &reqwest::Client,
    request: &RequestDescriptor,
    cookie: Option<String>,
    config: &ScanConfig,
) -> Result<RawResponse> {
    let url = request.url();
    let secure = match request.protocol() {
        Some(protocol) => protocol.is_secure(),
        None => {
            return Err(Error::UnsupportedScheme {
                url,
                scheme: request.protocol.clone(),
            })
        }
    };
    let port = request.port.unwrap_or(config.default_port(secure));
    let target = format!("{}://{}:{}{}", request.protocol, request.hostname, port, request.path);

    debug!(url = %url, port, "Sending request.");
    let mut builder = client.get(&target).header(ACCEPT, ACCEPT_HTML);
    if let Some(cookie) = cookie.filter(|c| !c.is_empty()) {
        builder = builder.header(COOKIE, cookie);
    }
    let mut response = builder.send().await.map_err(|e| hop_error(&url, e))?;

    let status = response.status().as_u16();
    let header_lines = header_lines(response.headers());
    let certificate = response
        .extensions()
        .get::<TlsInfo>()
        .and_then(TlsInfo::peer_certificate)
        .and_then(|der| peer_certificate(&url, der));
    debug!(url = %url, status, tls = certificate.is_some(), "Received response head.");

    let body = if status < 300 {
        Some(read_body(&url, &mut response, config.max_body_bytes).await?)
    } else {
        None
    };

    Ok(RawResponse {
        status,
        header_lines,
        body,
        certificate,
    })
}

fn header_lines(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

/// Parses the peer certificate. A certificate that cannot be parsed is
/// reported as absent; the hop itself still succeeded.
pub(crate) fn peer_certificate(url: &str, der: &[u8]) -> Option<CertificateInfo> {
    match certificate_info_from_der(der) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(url, error = %e, "Peer certificate could not be parsed.");
            None
        }
    }
}

/// Reads at most `limit` bytes of body. A body that breaks off after the
/// head keeps what arrived; only a timeout fails the hop.
async fn read_body(url: &str, response: &mut reqwest::Response, limit: usize) -> Result<String> {
    let mut body = Vec::new();
    while body.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) if e.is_timeout() => return Err(Error::Timeout { url: url.to_string() }),
            Err(e) => {
                debug!(url, error = %e, "Body ended early.");
                break;
            }
        }
    }
    body.truncate(limit);
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn hop_error(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        return Error::Timeout { url: url.to_string() };
    }
    let message = match std::error::Error::source(&e) {
        Some(source) => format!("{}: {}", e, source),
        None => e.to_string(),
    };
    Error::Transport {
        url: url.to_string(),
        message,
    }
}
