// src/core/scanner/mod.rs

pub mod chain_scanner;
pub mod dns_scanner;
pub mod headers_scanner;
pub mod https_scanner;
pub mod ssl_scanner;
pub mod transport;

use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::core::models::{
    Accepts, ChainData, Domain, Hop, Protocol, RequestDescriptor, ScanReport, Verdict,
};
use crate::error::{Error, Result};
use self::chain_scanner::follow_chain;
use self::dns_scanner::run_dns_scan;
use self::headers_scanner::{
    content_security_policy, feature_policy, header_disclosure, referrer_policy, x_content_type_options,
    x_frame_options, x_xss_protection, PolicyTables, ASP_VERSION_HEADERS, POWERED_BY_HEADERS, SERVER_HEADERS,
};
use self::https_scanner::{run_hsts_scan, secure_redirection_chain, upgrade_to_https};
use self::ssl_scanner::{certificate_validity, check_protocols, forward_secrecy, modern_tls};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Unscanned,
    Scanned,
}

/// The chains obtained in the reachability phase. At least one is present.
struct Chains {
    http: Option<Vec<Hop>>,
    https: Option<Vec<Hop>>,
}

impl Chains {
    /// HTTP's chain when it exists, so scheme upgrades can be analysed.
    fn primary(&self) -> &[Hop] {
        self.http.as_deref().or(self.https.as_deref()).unwrap_or_default()
    }

    /// HTTPS's chain, when HTTP's is the primary one.
    fn secondary(&self) -> Option<&[Hop]> {
        self.http.as_ref().and(self.https.as_deref())
    }

    fn final_hop(&self) -> Option<&Hop> {
        self.primary().last()
    }

    fn all_hops(&self) -> impl Iterator<Item = &Hop> {
        self.http.iter().chain(self.https.iter()).flatten()
    }
}

fn requests(chain: &[Hop]) -> Vec<RequestDescriptor> {
    chain.iter().map(|hop| hop.request.clone()).collect()
}

/// Both chains must stay on https after their first request. Not applicable
/// unless HTTP was reachable; a missing HTTPS chain fails.
fn secure_redirection(chains: &Chains) -> Verdict<ChainData> {
    let Some(http) = chains.http.as_deref() else {
        return Verdict::new(false, ChainData::not_applicable());
    };

    let secure = |chain: &[Hop]| {
        secure_redirection_chain(&requests(chain))
            .inspect_err(|e| warn!(error = %e, "Secure redirection check rejected the chain."))
            .is_ok_and(|verdict| verdict.passed)
    };
    let passed = secure(http) && chains.secondary().is_some_and(secure);

    Verdict::new(
        passed,
        ChainData {
            applicable: true,
            chain: http.iter().map(|hop| hop.request.url()).collect(),
        },
    )
}

/// Owns the lifecycle of one domain's scan. `scan` runs at most once.
///
/// Phases run in order because each consumes the results of the ones before;
/// checks inside a phase run concurrently and settle independently.
///
/// 1. Reachability: HTTP and HTTPS chains, joined settle-all. Fatal only when both fail.
/// 2. DNS: CAA and DNSSEC, settle-all.
/// 3. TLS: cipher and certificate of the primary chain's final hop, protocol matrix.
/// 4. HTTPS hygiene: upgrade, secure redirection, HSTS with preload cross-check.
/// 5. Header hygiene: policy headers on the final hop, disclosure across every hop.
pub struct Scanner {
    domain: Domain,
    config: ScanConfig,
    tables: PolicyTables,
    client: reqwest::Client,
    state: ScanState,
    report: ScanReport,
}

impl Scanner {
    pub fn new(domain: &str) -> Result<Self> {
        Self::with_config(domain, ScanConfig::default())
    }

    pub fn with_config(domain: &str, config: ScanConfig) -> Result<Self> {
        let domain = Domain::parse(domain)?;
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::InvalidConfig {
                key: "http_client".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            domain,
            config,
            tables: PolicyTables::DEFAULT,
            client,
            state: ScanState::Unscanned,
            report: ScanReport::default(),
        })
    }

    /// Replaces the tables the header evaluators judge against.
    pub fn with_tables(mut self, tables: PolicyTables) -> Self {
        self.tables = tables;
        self
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The report, once `scan` has completed successfully.
    pub fn report(&self) -> Option<&ScanReport> {
        match self.state {
            ScanState::Scanned if self.report.accepts.is_some() => Some(&self.report),
            _ => None,
        }
    }

    pub async fn scan(&mut self) -> Result<&ScanReport> {
        if self.state == ScanState::Scanned {
            return Err(Error::AlreadyScanned {
                domain: self.domain.to_string(),
            });
        }
        self.state = ScanState::Scanned;
        info!(domain = %self.domain, "Starting scan.");

        let chains = self.check_reachability().await?;
        self.check_dns().await;
        self.check_tls(&chains).await;
        self.check_https(&chains).await;
        self.check_headers(&chains);

        info!(domain = %self.domain, "Scan finished.");
        Ok(&self.report)
    }

    async fn check_reachability(&mut self) -> Result<Chains> {
        let host = self.domain.as_str();
        let (http, https) = tokio::join!(
            follow_chain(Protocol::Http, host, &self.config),
            follow_chain(Protocol::Https, host, &self.config)
        );

        let accepts = Accepts {
            http: http.is_ok(),
            https: https.is_ok(),
        };
        info!(http = accepts.http, https = accepts.https, "Reachability established.");

        match (http, https) {
            (Err(http), Err(https)) => Err(Error::Unreachable {
                domain: self.domain.to_string(),
                http: http.to_string(),
                https: https.to_string(),
            }),
            (http, https) => {
                self.report.accepts = Some(accepts);
                Ok(Chains {
                    http: http.ok(),
                    https: https.ok(),
                })
            }
        }
    }

    async fn check_dns(&mut self) {
        let (caa, dnssec) = run_dns_scan(&self.client, &self.config.doh_endpoint, self.domain.as_str()).await;
        self.report.caa = Some(caa);
        self.report.dnssec = Some(dnssec);
    }

    async fn check_tls(&mut self, chains: &Chains) {
        let last = chains.final_hop();
        self.report.forward_secrecy = Some(forward_secrecy(last.and_then(|hop| hop.cipher.as_ref())));
        self.report.certificate = Some(certificate_validity(last.and_then(|hop| hop.certificate.as_ref())));

        let support = check_protocols(
            self.domain.as_str(),
            self.config.https_port,
            self.config.request_timeout(),
        )
        .await;
        self.report.tls_protocols = Some(modern_tls(support));
    }

    async fn check_https(&mut self, chains: &Chains) {
        let primary = requests(chains.primary());

        self.report.upgrade_to_https = Some(if chains.http.is_some() {
            upgrade_to_https(&primary).unwrap_or_else(|e| {
                warn!(error = %e, "Upgrade check rejected the chain.");
                Verdict::new(false, ChainData::not_applicable())
            })
        } else {
            Verdict::new(false, ChainData::not_applicable())
        });

        self.report.secure_redirection_chain = Some(secure_redirection(chains));

        let hsts_header = chains.final_hop().and_then(|hop| hop.header("strict-transport-security"));
        self.report.hsts = Some(
            run_hsts_scan(
                &self.client,
                &self.config.hsts_preload_endpoint,
                self.domain.as_str(),
                hsts_header,
            )
            .await,
        );
    }

    fn check_headers(&mut self, chains: &Chains) {
        let last = chains.final_hop();
        let header = |name: &str| last.and_then(|hop| hop.header(name));
        let tables = &self.tables;

        self.report.content_security_policy =
            Some(content_security_policy(header("content-security-policy"), tables));
        self.report.feature_policy = Some(feature_policy(header("feature-policy"), tables));
        self.report.referrer_policy = Some(referrer_policy(header("referrer-policy"), tables));
        self.report.x_xss_protection = Some(x_xss_protection(header("x-xss-protection")));
        self.report.x_content_type_options = Some(x_content_type_options(header("x-content-type-options")));
        self.report.x_frame_options = Some(x_frame_options(header("x-frame-options")));

        self.report.server = Some(header_disclosure(chains.all_hops(), SERVER_HEADERS));
        self.report.powered_by = Some(header_disclosure(chains.all_hops(), POWERED_BY_HEADERS));
        self.report.asp_version = Some(header_disclosure(chains.all_hops(), ASP_VERSION_HEADERS));
    }
}

/// Scans `domain` once and returns the finished report.
pub async fn run_full_scan(domain: &str, config: ScanConfig) -> Result<ScanReport> {
    let mut scanner = Scanner::with_config(domain, config)?;
    scanner.scan().await.cloned()
}
