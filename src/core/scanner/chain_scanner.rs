// src/core/scanner/chain_scanner.rs

use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::core::models::{normalize_headers, Hop, Protocol, RequestDescriptor};
use crate::core::scanner::ssl_scanner::negotiated_cipher;
use crate::core::scanner::transport;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use url::Url;

/// Per-crawl mutable state. Owned by exactly one `follow_chain` call.
#[derive(Debug, Default)]
pub struct CrawlState {
    chain_length: usize,
    cookie_jar: BTreeMap<String, String>,
}

impl CrawlState {
    pub fn chain_length(&self) -> usize {
        self.chain_length
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookie_jar.get(name).map(String::as_str)
    }

    /// The `Cookie` header to replay on the next hop, if the jar holds anything.
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookie_jar.is_empty() {
            return None;
        }
        let pairs: Vec<String> = self
            .cookie_jar
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        Some(pairs.join("; "))
    }

    /// Merges every `Set-Cookie` line into the jar, overwriting by name.
    pub fn absorb_cookies(&mut self, header_lines: &[(String, String)]) {
        for (name, value) in header_lines {
            if !name.eq_ignore_ascii_case("set-cookie") {
                continue;
            }
            if let Some((cookie, value)) = parse_set_cookie(value) {
                debug!(cookie = %cookie, "Storing cookie.");
                self.cookie_jar.insert(cookie, value);
            }
        }
    }

    /// Counts one redirect; fails once the count exceeds `limit`.
    pub fn record_redirect(&mut self, url: &str, limit: usize) -> Result<()> {
        self.chain_length += 1;
        if self.chain_length > limit {
            return Err(Error::TooManyRedirects {
                url: url.to_string(),
                limit,
            });
        }
        Ok(())
    }
}

/// Extracts `name=value` from a `Set-Cookie` header, dropping attributes.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

/// Resolves a `Location` header against the request that produced it.
///
/// Handled in order: fully qualified URLs (returned unchanged), protocol-relative
/// `//host/path`, absolute paths, and paths relative to the directory of the
/// current request path. `//x` only counts as protocol-relative when `x` looks
/// like a host (contains a dot or a port); otherwise it is an absolute path.
pub fn resolve_redirect_location(location: &str, current: &RequestDescriptor) -> Result<String> {
    let location = location.trim();
    let invalid = || Error::InvalidLocation {
        location: location.to_string(),
    };
    if location.is_empty() {
        return Err(invalid());
    }

    if !location.starts_with('/') {
        if let Ok(url) = Url::parse(location) {
            return match url.host_str() {
                Some(host) if !host.is_empty() => Ok(location.to_string()),
                _ => Err(invalid()),
            };
        }
    }

    if let Some(rest) = location.strip_prefix("//") {
        let (authority, path) = match rest.find('/') {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };
        if authority.contains('.') || authority.contains(':') {
            let path = if path.is_empty() { "/" } else { path };
            return Ok(format!("{}://{}{}", current.protocol, authority, path));
        }
    }

    let origin = format!("{}://{}", current.protocol, current.authority());

    if location.starts_with('/') {
        return Ok(format!("{}{}", origin, location));
    }

    let current_path = current.path.split('?').next().unwrap_or("/");
    if location.starts_with('?') {
        return Ok(format!("{}{}{}", origin, current_path, location));
    }

    let directory = match current_path.rfind('/') {
        Some(i) => &current_path[..=i],
        None => "/",
    };
    Ok(format!("{}{}{}", origin, directory, location))
}

/// Names the configured port on `request` when it differs from the scheme's
/// own default, so recorded URLs show where the hop actually went.
pub fn with_configured_port(mut request: RequestDescriptor, config: &ScanConfig) -> RequestDescriptor {
    if request.port.is_none() {
        if let Some(protocol) = request.protocol() {
            let port = config.default_port(protocol.is_secure());
            if port != protocol.default_port() {
                request.port = Some(port);
            }
        }
    }
    request
}

/// Follows `protocol://hostname/` through every redirect.
///
/// The returned chain is ordered: first the initial request, last the terminal
/// (status < 300) response, which alone carries body, certificate and cipher.
/// Transport errors, timeouts, error statuses and redirect loops fail the chain.
pub async fn follow_chain(protocol: Protocol, hostname: &str, config: &ScanConfig) -> Result<Vec<Hop>> {
    info!(%protocol, hostname, "Following redirect chain.");

    let client = transport::hop_client(config)?;
    let mut state = CrawlState::default();
    let mut hops = Vec::new();
    let mut request = with_configured_port(RequestDescriptor::root(protocol, hostname), config);

    loop {
        let response = transport::fetch(&client, &request, state.cookie_header(), config)
            .await
            .inspect_err(|e| warn!(url = %request, error = %e, "Hop failed."))?;

        state.absorb_cookies(&response.header_lines);
        let headers = normalize_headers(&response.header_lines);

        match response.status {
            status if status < 300 => {
                let cipher = if request.is_secure() {
                    let port = request.port.unwrap_or(config.https_port);
                    negotiated_cipher(&request.hostname, port, config.request_timeout()).await
                } else {
                    None
                };
                hops.push(Hop {
                    status,
                    request,
                    headers,
                    body: response.body,
                    certificate: response.certificate,
                    cipher,
                });
                info!(%protocol, hostname, hops = hops.len(), "Redirect chain resolved.");
                return Ok(hops);
            }
            status if status < 400 => {
                let location = headers
                    .get("location")
                    .ok_or_else(|| Error::MissingLocation { url: request.url() })?;
                let next = resolve_redirect_location(location, &request)?;
                debug!(from = %request, to = %next, status, "Following redirect.");
                state.record_redirect(&next, config.max_redirects)?;
                let next = with_configured_port(RequestDescriptor::from_url(&next)?, config);

                hops.push(Hop {
                    status,
                    request,
                    headers,
                    body: None,
                    certificate: None,
                    cipher: None,
                });
                request = next;
            }
            status => {
                warn!(url = %request, status, "Chain ended with an error status.");
                return Err(Error::ErrorStatus { url: request.url(), status });
            }
        }
    }
}
