// src/core/scanner/headers_scanner.rs

use tracing::debug;

use crate::core::models::{
    CspData, DisclosureData, FeaturePolicyData, Hop, ReferrerData, Verdict, XssData,
};
use std::collections::BTreeMap;

/// Static tables the header evaluators judge values against.
#[derive(Debug, Clone, Copy)]
pub struct PolicyTables {
    /// Referrer policies that never leak the full URL to other origins.
    pub safe_referrers: &'static [&'static str],
    /// Allowlist entries a Feature-Policy directive may use.
    pub safe_feature_sources: &'static [&'static str],
    /// CSP source expressions that defeat the policy.
    pub unsafe_csp_sources: &'static [&'static str],
}

impl PolicyTables {
    pub const DEFAULT: PolicyTables = PolicyTables {
        // "no-referrer-when-downgrade" and "unsafe-url" send the full referrer cross-origin.
        safe_referrers: &[
            "no-referrer",
            "origin",
            "origin-when-cross-origin",
            "same-origin",
            "strict-origin",
            "strict-origin-when-cross-origin",
        ],
        safe_feature_sources: &["'none'", "'self'"],
        unsafe_csp_sources: &["'unsafe-inline'", "'unsafe-eval'", "*", "data:", "http:", "https:"],
    };
}

impl Default for PolicyTables {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Header families whose presence discloses server software.
pub const SERVER_HEADERS: &[&str] = &["server"];
pub const POWERED_BY_HEADERS: &[&str] = &["x-powered-by"];
pub const ASP_VERSION_HEADERS: &[&str] = &["x-aspnet-version", "x-aspnetmvc-version"];

/// Checks for a `key=value` directive among `;`-separated directives.
///
/// Whitespace around `=` is ignored and both sides match case-insensitively,
/// but the value must be a single token.
pub fn check_header_key_value(header: &str, key: &str, value: &str) -> bool {
    header.split(';').any(|directive| match directive.split_once('=') {
        Some((k, v)) => k.trim().eq_ignore_ascii_case(key) && v.trim().eq_ignore_ascii_case(value),
        None => false,
    })
}

/// Splits a `;`-separated policy into lower-cased directive name and its tokens.
fn parse_directives(header: &str) -> BTreeMap<String, Vec<String>> {
    let mut directives = BTreeMap::new();
    for directive in header.split(';') {
        let mut tokens = directive.split_whitespace();
        let Some(name) = tokens.next() else {
            continue;
        };
        // The first occurrence of a directive wins.
        directives
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| tokens.map(|t| t.to_ascii_lowercase()).collect());
    }
    directives
}

/// Content-Security-Policy: present, non-empty, and no unsafe source anywhere.
pub fn content_security_policy(header: Option<&str>, tables: &PolicyTables) -> Verdict<CspData> {
    let Some(header) = header else {
        return Verdict::failed();
    };

    let directives = parse_directives(header);
    if directives.is_empty() {
        return Verdict::failed();
    }

    let mut unsafe_sources: Vec<String> = directives
        .values()
        .flatten()
        .filter(|source| tables.unsafe_csp_sources.contains(&source.as_str()))
        .cloned()
        .collect();
    unsafe_sources.sort();
    unsafe_sources.dedup();

    debug!(directives = directives.len(), unsafe_sources = ?unsafe_sources, "Evaluated CSP.");
    Verdict::new(unsafe_sources.is_empty(), CspData { directives, unsafe_sources })
}

/// Feature-Policy: every directive restricted to the safe allowlist entries.
pub fn feature_policy(header: Option<&str>, tables: &PolicyTables) -> Verdict<FeaturePolicyData> {
    let Some(header) = header else {
        return Verdict::failed();
    };

    let directives = parse_directives(header);
    if directives.is_empty() {
        return Verdict::failed();
    }

    let passed = directives.values().all(|allowlist| {
        !allowlist.is_empty()
            && allowlist
                .iter()
                .all(|source| tables.safe_feature_sources.contains(&source.as_str()))
    });

    Verdict::new(passed, FeaturePolicyData { directives })
}

/// Referrer-Policy: the effective (last) policy must be in the safe table.
pub fn referrer_policy(header: Option<&str>, tables: &PolicyTables) -> Verdict<ReferrerData> {
    let Some(header) = header else {
        return Verdict::failed();
    };

    let value = header
        .split(',')
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .last();

    match value {
        Some(value) if tables.safe_referrers.contains(&value.as_str()) => {
            Verdict::new(true, ReferrerData { value })
        }
        _ => Verdict::failed(),
    }
}

pub fn x_content_type_options(header: Option<&str>) -> Verdict {
    Verdict::bare(header.is_some_and(|h| h.trim().eq_ignore_ascii_case("nosniff")))
}

pub fn x_frame_options(header: Option<&str>) -> Verdict {
    let passed = header.is_some_and(|h| {
        h.split(';').any(|directive| {
            let directive = directive.trim();
            directive.eq_ignore_ascii_case("deny") || directive.eq_ignore_ascii_case("sameorigin")
        })
    });
    Verdict::bare(passed)
}

/// X-XSS-Protection: filter enabled (`1`); evidence records `mode=block`.
pub fn x_xss_protection(header: Option<&str>) -> Verdict<XssData> {
    let Some(header) = header else {
        return Verdict::failed();
    };

    if !header.split(';').any(|directive| directive.trim() == "1") {
        return Verdict::failed();
    }

    Verdict::new(
        true,
        XssData {
            block: check_header_key_value(header, "mode", "block"),
        },
    )
}

/// Scans every hop for a disclosing header family and reports the longest value.
///
/// Passing means nothing was disclosed.
pub fn header_disclosure<'a, I>(hops: I, names: &[&str]) -> Verdict<DisclosureData>
where
    I: IntoIterator<Item = &'a Hop>,
{
    let longest = hops
        .into_iter()
        .flat_map(move |hop| names.iter().filter_map(move |name| hop.header(name)))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .max_by_key(|value| value.len());

    match longest {
        Some(value) => {
            debug!(value, "Header discloses server details.");
            Verdict::new(false, DisclosureData { value: value.to_string() })
        }
        None => Verdict::bare(true),
    }
}
