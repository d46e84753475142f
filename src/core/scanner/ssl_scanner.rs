// src/core/scanner/ssl_scanner.rs

use tracing::{debug, error, info, warn};

use crate::core::models::{CertificateData, CertificateInfo, CipherInfo, TlsProtocolSupport, Verdict};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use openssl::ssl::{HandshakeError, SslConnector, SslMethod, SslStream, SslVerifyMode, SslVersion};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use strum::{Display, EnumIter};
use tokio::task::spawn_blocking;
use x509_parser::prelude::*;

/// Longest certificate lifetime, in days, that still passes (~6 months).
pub const MAX_CERTIFICATE_DAYS: i64 = 190;

/// Lower-cased cipher name fragments that denote an ephemeral key exchange.
const FORWARD_SECRECY_MARKERS: &[&str] = &["dhe", "edh", "ecdhe"];

/// TLS versions the capability check pins a handshake to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum TlsVersion {
    #[strum(to_string = "1.3")]
    Tls13,
    #[strum(to_string = "1.2")]
    Tls12,
    #[strum(to_string = "1.1")]
    Tls11,
    #[strum(to_string = "1.0")]
    Tls10,
}

impl TlsVersion {
    fn ssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls13 => SslVersion::TLS1_3,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls10 => SslVersion::TLS1,
        }
    }

    /// OpenSSL refuses these at its default security level.
    fn is_legacy(self) -> bool {
        matches!(self, TlsVersion::Tls11 | TlsVersion::Tls10)
    }
}

/// Finds which TLS versions `host` completes a handshake for.
///
/// All four handshakes run concurrently and each one settles on its own: an error
/// or timeout marks only that version unsupported.
pub async fn check_protocols(host: &str, port: u16, timeout: Duration) -> TlsProtocolSupport {
    info!(host, port, "Starting TLS protocol check.");

    let (tls1_3, tls1_2, tls1_1, tls1_0) = tokio::join!(
        try_version(host, port, TlsVersion::Tls13, timeout),
        try_version(host, port, TlsVersion::Tls12, timeout),
        try_version(host, port, TlsVersion::Tls11, timeout),
        try_version(host, port, TlsVersion::Tls10, timeout)
    );

    let support = TlsProtocolSupport { tls1_3, tls1_2, tls1_1, tls1_0 };
    info!(?support, "TLS protocol check finished.");
    support
}

async fn try_version(host: &str, port: u16, version: TlsVersion, timeout: Duration) -> bool {
    let host_owned = host.to_string();
    let handle = spawn_blocking(move || pinned_handshake(&host_owned, port, version, timeout));

    let outcome = match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!(panic = %e, "Blocking TLS handshake task panicked!");
            return false;
        }
        Err(_) => Err(Error::Timeout {
            url: format!("{}:{}", host, port),
        }),
    };

    match outcome {
        Ok(()) => {
            debug!(host, %version, "Handshake succeeded.");
            true
        }
        Err(e) => {
            debug!(host, %version, error = %e, "Handshake failed.");
            false
        }
    }
}

/// One handshake with min = max = `version`. The stream is dropped right after.
fn pinned_handshake(host: &str, port: u16, version: TlsVersion, timeout: Duration) -> Result<()> {
    handshake(host, port, Some(version), timeout).map(|_| ())
}

/// Completes an unverified TLS handshake, optionally pinned to one version.
fn handshake(
    host: &str,
    port: u16,
    pin: Option<TlsVersion>,
    timeout: Duration,
) -> Result<SslStream<TcpStream>> {
    let target = format!("{}:{}", host, port);
    let tls_error = |e: openssl::error::ErrorStack| Error::Tls {
        url: target.clone(),
        message: e.to_string(),
    };

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::from_io(&target, e))?
        .next()
        .ok_or_else(|| Error::Transport {
            url: target.clone(),
            message: "host did not resolve".to_string(),
        })?;

    debug!(target = %target, pin = ?pin, "Connecting TCP stream.");
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| Error::from_io(&target, e))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| Error::from_io(&target, e))?;

    let mut builder = SslConnector::builder(SslMethod::tls()).map_err(tls_error)?;
    builder.set_verify(SslVerifyMode::NONE);
    if let Some(version) = pin {
        builder
            .set_min_proto_version(Some(version.ssl_version()))
            .map_err(tls_error)?;
        builder
            .set_max_proto_version(Some(version.ssl_version()))
            .map_err(tls_error)?;
        if version.is_legacy() {
            builder.set_cipher_list("ALL:@SECLEVEL=0").map_err(tls_error)?;
        }
    }

    let connector = builder.build();
    let mut configuration = connector.configure().map_err(tls_error)?;
    configuration.set_verify_hostname(false);

    configuration.connect(host, stream).map_err(|e| match e {
        HandshakeError::WouldBlock(_) => Error::Timeout { url: target.clone() },
        e => Error::Tls {
            url: target.clone(),
            message: e.to_string(),
        },
    })
}

/// The cipher suite `host` negotiates with a default client.
///
/// Runs one unpinned handshake; any failure yields `None`.
pub async fn negotiated_cipher(host: &str, port: u16, timeout: Duration) -> Option<CipherInfo> {
    let host_owned = host.to_string();
    let handle = spawn_blocking(move || {
        handshake(&host_owned, port, None, timeout).map(|stream| {
            let ssl = stream.ssl();
            ssl.current_cipher().map(|cipher| CipherInfo {
                name: cipher.name().to_string(),
                standard_name: cipher.standard_name().map(String::from),
                version: ssl.version_str().to_string(),
            })
        })
    });

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(cipher))) => {
            debug!(host, port, cipher = ?cipher, "Negotiated cipher captured.");
            cipher
        }
        Ok(Ok(Err(e))) => {
            warn!(host, port, error = %e, "Cipher handshake failed.");
            None
        }
        Ok(Err(e)) => {
            error!(panic = %e, "Blocking cipher handshake task panicked!");
            None
        }
        Err(_) => {
            warn!(host, port, "Cipher handshake timed out.");
            None
        }
    }
}

/// The "modern TLS" composite: 1.3 offered, 1.1 and 1.0 refused.
pub fn modern_tls(support: TlsProtocolSupport) -> Verdict<TlsProtocolSupport> {
    let passed = support.tls1_3 && !support.tls1_1 && !support.tls1_0;
    Verdict::new(passed, support)
}

fn is_tls13_suite(name: &str) -> bool {
    name.starts_with("TLS_AES_") || name.starts_with("TLS_CHACHA20_")
}

/// Passes for TLS 1.3 or an ephemeral Diffie-Hellman key exchange.
pub fn forward_secrecy(cipher: Option<&CipherInfo>) -> Verdict<CipherInfo> {
    let Some(cipher) = cipher else {
        debug!("No negotiated cipher available.");
        return Verdict::failed();
    };

    let tls13 = cipher.version == "TLSv1.3" || is_tls13_suite(&cipher.name);
    let names = [Some(cipher.name.as_str()), cipher.standard_name.as_deref()];
    let ephemeral = names.iter().flatten().any(|name| {
        let lower = name.to_lowercase();
        FORWARD_SECRECY_MARKERS.iter().any(|marker| lower.contains(marker))
    });

    debug!(cipher = %cipher.name, tls13, ephemeral, "Evaluated forward secrecy.");
    Verdict::new(tls13 || ephemeral, cipher.clone())
}

/// Passes when the certificate lifetime is at most [`MAX_CERTIFICATE_DAYS`].
pub fn certificate_validity(certificate: Option<&CertificateInfo>) -> Verdict<CertificateData> {
    let Some(cert) = certificate else {
        debug!("No peer certificate available.");
        return Verdict::failed();
    };

    let length = (cert.not_after - cert.not_before).num_seconds().div_euclid(86_400);
    debug!(length, "Computed certificate lifetime.");

    Verdict::new(
        length <= MAX_CERTIFICATE_DAYS,
        CertificateData {
            length,
            not_before: cert.not_before,
            not_after: cert.not_after,
            subject: cert.subject.clone(),
            issuer: cert.issuer.clone(),
        },
    )
}

/// Parses a DER certificate into the fields the scanner reports.
pub fn certificate_info_from_der(der: &[u8]) -> std::result::Result<CertificateInfo, String> {
    let (_, x509) = parse_x509_certificate(der).map_err(|e| {
        error!(error = %e, "Failed to parse X.509 certificate");
        format!("X.509 Parse Error: {}", e)
    })?;

    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Successfully parsed certificate.");

    let validity = x509.validity();
    Ok(CertificateInfo {
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        not_before: asn1_time_to_chrono_utc(&validity.not_before),
        not_after: asn1_time_to_chrono_utc(&validity.not_after),
    })
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use strum::IntoEnumIterator;

    fn cert(from: DateTime<Utc>, to: DateTime<Utc>) -> CertificateInfo {
        CertificateInfo {
            subject: "CN=example.com".to_string(),
            issuer: "CN=Test CA".to_string(),
            not_before: from,
            not_after: to,
        }
    }

    fn cipher(name: &str, version: &str) -> CipherInfo {
        CipherInfo {
            name: name.to_string(),
            standard_name: None,
            version: version.to_string(),
        }
    }

    #[test]
    fn certificate_lifetime_in_whole_days() {
        let day0 = Utc.with_ymd_and_hms(2020, 1, 1, 1, 0, 0).unwrap();

        let verdict = certificate_validity(Some(&cert(day0, Utc.with_ymd_and_hms(2021, 1, 1, 1, 0, 0).unwrap())));
        assert!(!verdict.passed);
        assert_eq!(verdict.data.unwrap().length, 366);

        let verdict = certificate_validity(Some(&cert(day0, Utc.with_ymd_and_hms(2020, 1, 11, 1, 0, 0).unwrap())));
        assert!(verdict.passed);
        assert_eq!(verdict.data.unwrap().length, 10);

        let verdict = certificate_validity(Some(&cert(day0, Utc.with_ymd_and_hms(2020, 7, 1, 1, 0, 0).unwrap())));
        assert!(verdict.passed);
        assert_eq!(verdict.data.unwrap().length, 31 + 29 + 31 + 30 + 31 + 30);
    }

    #[test]
    fn partial_days_round_down() {
        let from = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2020, 1, 6, 23, 59, 59).unwrap();
        assert_eq!(certificate_validity(Some(&cert(from, to))).data.unwrap().length, 5);
    }

    #[test]
    fn missing_certificate_fails_without_data() {
        assert_eq!(certificate_validity(None), Verdict::failed());
    }

    #[test]
    fn forward_secrecy_by_protocol_or_key_exchange() {
        assert!(forward_secrecy(Some(&cipher("TLS_AES_256_GCM_SHA384", "TLSv1.3"))).passed);
        assert!(forward_secrecy(Some(&cipher("TLS_AES_256_GCM_SHA384", ""))).passed);
        assert!(forward_secrecy(Some(&cipher("ECDHE-RSA-AES256-SHA", "TLSv1.2"))).passed);
        assert!(forward_secrecy(Some(&cipher("EDH-RSA-DES-CBC3-SHA", "TLSv1"))).passed);
        assert!(!forward_secrecy(Some(&cipher("RSA-AES256-SHA", "TLSv1.2"))).passed);
        assert!(!forward_secrecy(Some(&cipher("AES256-SHA", "TLSv1.2"))).passed);
        assert!(!forward_secrecy(None).passed);
    }

    #[test]
    fn standard_name_also_counts() {
        let info = CipherInfo {
            name: "unknown".to_string(),
            standard_name: Some("TLS_DHE_RSA_WITH_AES_128_GCM_SHA256".to_string()),
            version: "TLSv1.2".to_string(),
        };
        let verdict = forward_secrecy(Some(&info));
        assert!(verdict.passed);
        assert_eq!(verdict.data, Some(info));
    }

    #[test]
    fn modern_tls_requires_13_and_no_legacy() {
        let base = TlsProtocolSupport { tls1_3: true, tls1_2: true, tls1_1: false, tls1_0: false };
        assert!(modern_tls(base).passed);
        assert!(!modern_tls(TlsProtocolSupport { tls1_0: true, ..base }).passed);
        assert!(!modern_tls(TlsProtocolSupport { tls1_1: true, ..base }).passed);
        assert!(!modern_tls(TlsProtocolSupport { tls1_3: false, ..base }).passed);
    }

    #[test]
    fn versions_are_labelled_like_the_report() {
        let labels: Vec<String> = TlsVersion::iter().map(|v| v.to_string()).collect();
        assert_eq!(labels, ["1.3", "1.2", "1.1", "1.0"]);
    }

    #[test]
    fn parses_generated_certificate() {
        use openssl::asn1::Asn1Time;
        use openssl::hash::MessageDigest;
        use openssl::pkey::PKey;
        use openssl::rsa::Rsa;
        use openssl::x509::{X509Builder, X509NameBuilder};

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "example.com").unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(90).unwrap()).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        let der = builder.build().to_der().unwrap();

        let info = certificate_info_from_der(&der).unwrap();
        assert!(info.subject.contains("example.com"));
        let verdict = certificate_validity(Some(&info));
        assert!(verdict.passed);
        assert_eq!(verdict.data.unwrap().length, 90);
    }

    #[tokio::test]
    async fn closed_port_supports_nothing() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let support = check_protocols("127.0.0.1", port, Duration::from_secs(2)).await;
        assert_eq!(support, TlsProtocolSupport::default());
        assert!(negotiated_cipher("127.0.0.1", port, Duration::from_secs(2)).await.is_none());
    }
}
