// src/core/models.rs

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use strum::{AsRefStr, Display, EnumString};
use url::Url;

// --- Target ---

/// A validated root hostname, e.g. `example.com`.
///
/// Valid when it is exactly the host component of `https://<domain>` and
/// contains at least one dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Domain(String);

impl Domain {
    pub fn parse(input: &str) -> Result<Self> {
        let host = Url::parse(&format!("https://{input}"))
            .ok()
            .and_then(|url| url.host_str().map(String::from));

        match host {
            Some(host) if host == input && input.contains('.') => Ok(Self(host)),
            _ => Err(Error::InvalidDomain(input.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The two schemes a chain can be started from and spoken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn is_secure(self) -> bool {
        self == Protocol::Https
    }

    /// The port a URL of this scheme implies when it names none.
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

// --- Redirect Chain Models ---

/// The exact parameters of one hop. Built fresh for every request.
///
/// `protocol` is the bare scheme (`"https"`, no trailing colon). Resolution of
/// `Location` headers works for any scheme; the crawler only speaks `http` and
/// `https`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    pub protocol: String,
    pub hostname: String,
    /// Only set when the URL named a port explicitly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Path including any query string; always starts with `/`.
    pub path: String,
}

impl RequestDescriptor {
    pub fn new(protocol: &str, hostname: &str, path: &str) -> Self {
        Self {
            protocol: protocol.to_string(),
            hostname: hostname.to_string(),
            port: None,
            path: path.to_string(),
        }
    }

    /// The first hop of a chain: `/` on the given host.
    pub fn root(protocol: Protocol, hostname: &str) -> Self {
        Self::new(protocol.as_ref(), hostname, "/")
    }

    /// Builds a descriptor from a fully qualified URL.
    pub fn from_url(location: &str) -> Result<Self> {
        let url = Url::parse(location).map_err(|_| Error::InvalidLocation {
            location: location.to_string(),
        })?;
        let hostname = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidLocation {
                location: location.to_string(),
            })?;

        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            protocol: url.scheme().to_string(),
            hostname: hostname.to_string(),
            port: url.port(),
            path,
        })
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.protocol.parse().ok()
    }

    pub fn is_secure(&self) -> bool {
        self.protocol() == Some(Protocol::Https)
    }

    /// `hostname` or `hostname:port` when a port was given explicitly.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.hostname, port),
            None => self.hostname.clone(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}://{}{}", self.protocol, self.authority(), self.path)
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Response headers keyed by lower-cased name. Built once per hop at ingestion.
pub type Headers = BTreeMap<String, String>;

/// Folds raw header lines into [`Headers`]. Repeated names are joined with `", "`.
pub fn normalize_headers<'a, I>(lines: I) -> Headers
where
    I: IntoIterator<Item = &'a (String, String)>,
{
    let mut headers = Headers::new();
    for (name, value) in lines {
        headers
            .entry(name.trim().to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value.trim());
            })
            .or_insert_with(|| value.trim().to_string());
    }
    headers
}

/// Details of a peer certificate captured during a TLS hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// The cipher suite negotiated on a TLS hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CipherInfo {
    /// OpenSSL name, e.g. `ECDHE-RSA-AES256-GCM-SHA384`.
    pub name: String,
    /// IANA name, e.g. `TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_name: Option<String>,
    /// Negotiated protocol, e.g. `TLSv1.3`.
    pub version: String,
}

/// One response in a redirect chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub status: u16,
    pub request: RequestDescriptor,
    pub headers: Headers,
    /// Only recorded on the terminal hop.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<CipherInfo>,
}

impl Hop {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

// --- Verdicts ---

/// The uniform result of every check: pass/fail plus optional evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict<T = ()> {
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Verdict<T> {
    pub fn new(passed: bool, data: T) -> Self {
        Self { passed, data: Some(data) }
    }

    /// A failing verdict with no evidence.
    pub fn failed() -> Self {
        Self { passed: false, data: None }
    }

    /// A verdict carrying no evidence.
    pub fn bare(passed: bool) -> Self {
        Self { passed, data: None }
    }
}

/// Evidence for the certificate lifetime check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    /// Lifetime in whole days.
    pub length: i64,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub subject: String,
    pub issuer: String,
}

/// Which TLS versions the host completed a pinned handshake for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsProtocolSupport {
    #[serde(rename = "1.3")]
    pub tls1_3: bool,
    #[serde(rename = "1.2")]
    pub tls1_2: bool,
    #[serde(rename = "1.1")]
    pub tls1_1: bool,
    #[serde(rename = "1.0")]
    pub tls1_0: bool,
}

/// Evidence for the chain-based HTTPS checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainData {
    /// False when the chain the check needs was never obtained.
    pub applicable: bool,
    pub chain: Vec<String>,
}

impl ChainData {
    pub fn not_applicable() -> Self {
        Self { applicable: false, chain: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HstsData {
    pub age: u64,
    pub include_subdomains: bool,
    pub preload: bool,
    pub preloaded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CspData {
    pub directives: BTreeMap<String, Vec<String>>,
    pub unsafe_sources: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturePolicyData {
    pub directives: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerData {
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XssData {
    pub block: bool,
}

/// The longest value observed for a header that discloses server software.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisclosureData {
    pub value: String,
}

// --- Main Report ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepts {
    pub http: bool,
    pub https: bool,
}

/// Check name to verdict. Each field is written once, by the phase that owns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub accepts: Option<Accepts>,
    pub caa: Option<Verdict>,
    pub dnssec: Option<Verdict>,
    pub forward_secrecy: Option<Verdict<CipherInfo>>,
    pub certificate: Option<Verdict<CertificateData>>,
    pub tls_protocols: Option<Verdict<TlsProtocolSupport>>,
    pub upgrade_to_https: Option<Verdict<ChainData>>,
    pub secure_redirection_chain: Option<Verdict<ChainData>>,
    pub hsts: Option<Verdict<HstsData>>,
    pub content_security_policy: Option<Verdict<CspData>>,
    pub feature_policy: Option<Verdict<FeaturePolicyData>>,
    pub referrer_policy: Option<Verdict<ReferrerData>>,
    pub x_xss_protection: Option<Verdict<XssData>>,
    pub x_content_type_options: Option<Verdict>,
    pub x_frame_options: Option<Verdict>,
    pub server: Option<Verdict<DisclosureData>>,
    pub powered_by: Option<Verdict<DisclosureData>>,
    pub asp_version: Option<Verdict<DisclosureData>>,
}
