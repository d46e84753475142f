// src/core/scanner/https_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::{ChainData, HstsData, RequestDescriptor, Verdict};
use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// One year, the minimum `max-age` the preload list accepts.
pub const HSTS_PRELOAD_MIN_AGE: u64 = 31_536_000;

static RE_MAX_AGE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(?i)^max-age\s*=\s*"?(\d+)"#).unwrap());

fn chain_data(chain: &[RequestDescriptor]) -> ChainData {
    ChainData {
        applicable: true,
        chain: chain.iter().map(RequestDescriptor::url).collect(),
    }
}

/// Does the server move an `http` visitor to `https` on the very first redirect?
///
/// A chain shorter than two requests fails. A chain starting on `https` is a
/// caller error.
pub fn upgrade_to_https(chain: &[RequestDescriptor]) -> Result<Verdict<ChainData>> {
    if chain.len() < 2 {
        debug!(len = chain.len(), "Chain too short for an upgrade.");
        return Ok(Verdict::new(false, chain_data(chain)));
    }
    if chain[0].is_secure() {
        return Err(Error::ChainContract("upgrade check needs a chain starting on http"));
    }
    Ok(Verdict::new(chain[1].is_secure(), chain_data(chain)))
}

/// Does the chain stay on `https` once it has left its first request?
///
/// The first request is excluded, so an `http` start that redirects straight to
/// `https` and stays there passes. The final request must be `https` too, so a
/// lone `http` request fails.
pub fn secure_redirection_chain(chain: &[RequestDescriptor]) -> Result<Verdict<ChainData>> {
    let Some(last) = chain.last() else {
        return Err(Error::ChainContract("secure redirection check needs a non-empty chain"));
    };
    let passed = chain[1..].iter().all(RequestDescriptor::is_secure) && last.is_secure();
    Ok(Verdict::new(passed, chain_data(chain)))
}

/// Parses a `Strict-Transport-Security` header.
///
/// Passes when `max-age` is positive. Directive names are matched
/// case-insensitively with surrounding whitespace ignored.
pub fn http_strict_transport_security(header: Option<&str>) -> Verdict<HstsData> {
    let Some(header) = header else {
        return Verdict::failed();
    };

    let mut data = HstsData::default();
    for directive in header.split(';') {
        let directive = directive.trim();
        if let Some(caps) = RE_MAX_AGE.captures(directive) {
            data.age = caps[1].parse().unwrap_or(u64::MAX);
        } else if directive.eq_ignore_ascii_case("includesubdomains") {
            data.include_subdomains = true;
        } else if directive.eq_ignore_ascii_case("preload") {
            data.preload = true;
        }
    }

    debug!(?data, "Parsed HSTS header.");
    if data.age == 0 {
        return Verdict::failed();
    }
    Verdict::new(true, data)
}

/// Whether a parsed header asks for, and qualifies for, the preload list.
pub fn preload_eligible(data: &HstsData) -> bool {
    data.include_subdomains && data.preload && data.age >= HSTS_PRELOAD_MIN_AGE
}

#[derive(Debug, Deserialize)]
struct PreloadStatus {
    status: String,
}

/// Asks the preload list API whether `domain` is preloaded.
pub async fn check_preloaded(client: &reqwest::Client, endpoint: &str, domain: &str) -> Result<bool> {
    debug!(domain, "Querying HSTS preload status.");
    let status: PreloadStatus = client
        .get(endpoint)
        .query(&[("domain", domain)])
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(status.status == "preloaded")
}

/// Evaluates HSTS and fills in `preloaded`. The API is only called for eligible headers.
pub async fn run_hsts_scan(
    client: &reqwest::Client,
    endpoint: &str,
    domain: &str,
    header: Option<&str>,
) -> Verdict<HstsData> {
    let mut verdict = http_strict_transport_security(header);

    if let Some(data) = verdict.data.as_mut() {
        if preload_eligible(data) {
            data.preloaded = match check_preloaded(client, endpoint, domain).await {
                Ok(preloaded) => preloaded,
                Err(e) => {
                    warn!(domain, error = %e, "HSTS preload lookup failed.");
                    false
                }
            };
        }
    }

    info!(passed = verdict.passed, "HSTS check finished.");
    verdict
}
