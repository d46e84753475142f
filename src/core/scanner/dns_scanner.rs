// src/core/scanner/dns_scanner.rs

use tracing::{debug, info, warn};

use crate::core::models::Verdict;
use crate::error::Result;
use serde::Deserialize;

/// Record types the DNS checks query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum RecordType {
    Caa,
    Ds,
}

/// The subset of a DNS-over-HTTPS JSON answer the checks read.
#[derive(Debug, Default, Deserialize)]
pub struct DohResponse {
    #[serde(rename = "Answer", default)]
    pub answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
pub struct DohAnswer {
    #[serde(default)]
    pub data: String,
}

/// Runs the CAA and DNSSEC lookups concurrently.
///
/// Lookup failures become failing verdicts; neither lookup can fail the other.
pub async fn run_dns_scan(client: &reqwest::Client, endpoint: &str, domain: &str) -> (Verdict, Verdict) {
    info!(target = %domain, "Starting DNS scan.");

    let (caa_result, dnssec_result) = tokio::join!(
        resolve(client, endpoint, domain, RecordType::Caa),
        resolve(client, endpoint, domain, RecordType::Ds)
    );

    let caa = match caa_result {
        Ok(response) => Verdict::bare(caa_has_issuer(&response)),
        Err(e) => {
            warn!(target = %domain, error = %e, "CAA lookup failed.");
            Verdict::failed()
        }
    };
    let dnssec = match dnssec_result {
        Ok(response) => Verdict::bare(!response.answer.is_empty()),
        Err(e) => {
            warn!(target = %domain, error = %e, "DNSSEC lookup failed.");
            Verdict::failed()
        }
    };

    info!(caa = caa.passed, dnssec = dnssec.passed, "DNS scan finished.");
    (caa, dnssec)
}

/// Issues one DoH query with DNSSEC data requested.
pub async fn resolve(
    client: &reqwest::Client,
    endpoint: &str,
    domain: &str,
    record_type: RecordType,
) -> Result<DohResponse> {
    debug!(target = %domain, %record_type, "Querying DNS-over-HTTPS.");
    let response = client
        .get(endpoint)
        .query(&[("name", domain), ("type", record_type.as_ref()), ("dnssec", "true")])
        .send()
        .await?
        .error_for_status()?
        .json::<DohResponse>()
        .await?;
    debug!(target = %domain, %record_type, answers = response.answer.len(), "DNS answer received.");
    Ok(response)
}

/// True when an answer authorises an issuer (`issue` or `issuewild` tag).
///
/// CAA answer data reads `<flags> <tag> <value>`, e.g. `0 issue "letsencrypt.org"`.
pub fn caa_has_issuer(response: &DohResponse) -> bool {
    response.answer.iter().any(|record| {
        let data = record.data.trim();
        let without_flags = match data.split_once(' ') {
            Some((flags, rest)) if flags.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => data,
        };
        let tag = without_flags.trim_start().to_lowercase();
        tag.starts_with("issue ") || tag.starts_with("issuewild ")
    })
}
