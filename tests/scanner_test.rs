// tests/scanner_test.rs

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::ssl::{SslAcceptor, SslMethod};
use openssl::x509::{X509NameBuilder, X509};
use serde_json::json;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use vanguard_sitecheck::config::ScanConfig;
use vanguard_sitecheck::core::models::Protocol;
use vanguard_sitecheck::core::scanner::chain_scanner::follow_chain;
use vanguard_sitecheck::core::scanner::{run_full_scan, Scanner};
use vanguard_sitecheck::error::{Error, ErrorKind};
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const TLS_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\
Content-Type: text/html\r\n\
Content-Length: 5\r\n\
Strict-Transport-Security: max-age=300\r\n\
Server: tls-fixture/1.0\r\n\
Connection: close\r\n\
\r\n\
hello";

fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn mount_doh(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/resolve"))
        .and(query_param("type", "CAA"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Status": 0,
            "Answer": [{ "data": "0 issue \"letsencrypt.org\"" }]
        })))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/resolve"))
        .and(query_param("type", "DS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Status": 0 })))
        .mount(mock_server)
        .await;
}

fn config_for(mock_server: &MockServer, http_port: u16, https_port: u16) -> ScanConfig {
    ScanConfig {
        http_port,
        https_port,
        request_timeout_secs: 5,
        accept_invalid_certs: true,
        doh_endpoint: format!("{}/resolve", mock_server.uri()),
        hsts_preload_endpoint: format!("{}/api/v2/status", mock_server.uri()),
        ..Default::default()
    }
}

/// A TLS site answering with one canned response, plus the request heads it received.
struct TlsSite {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
}

/// Serves one canned response over TLS with a fresh self-signed certificate valid for 30 days.
fn spawn_tls_site() -> TlsSite {
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", "127.0.0.1").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder.set_pubkey(&key).unwrap();
    builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
    builder.set_not_after(&Asn1Time::days_from_now(30).unwrap()).unwrap();
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    acceptor.set_private_key(&key).unwrap();
    acceptor.set_certificate(&cert).unwrap();
    acceptor.check_private_key().unwrap();
    let acceptor = Arc::new(acceptor.build());

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let acceptor = Arc::clone(&acceptor);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                // Version checks hang up right after the handshake; that is fine here.
                let Ok(mut tls) = acceptor.accept(stream) else { return };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match tls.read(&mut buf) {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                seen.lock().unwrap().push(String::from_utf8_lossy(&head).to_ascii_lowercase());
                let _ = tls.write_all(TLS_RESPONSE);
                let _ = tls.shutdown();
            });
        }
    });

    TlsSite { port, requests }
}

#[tokio::test]
async fn test_http_only_site() {
    let mock_server = MockServer::start().await;
    mount_doh(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-Powered-By", "Express")
                .insert_header("X-Content-Type-Options", "nosniff")
                .insert_header("Referrer-Policy", "no-referrer")
                .set_body_string("<html></html>"),
        )
        .mount(&mock_server)
        .await;

    let http_port = mock_server.address().port();
    let config = config_for(&mock_server, http_port, closed_port());
    let mut scanner = Scanner::with_config("127.0.0.1", config).unwrap();
    let report = scanner.scan().await.unwrap().clone();

    let accepts = report.accepts.unwrap();
    assert!(accepts.http);
    assert!(!accepts.https);

    let upgrade = report.upgrade_to_https.unwrap();
    assert!(!upgrade.passed);
    let upgrade = upgrade.data.unwrap();
    assert!(upgrade.applicable);
    assert_eq!(upgrade.chain, [format!("http://127.0.0.1:{}/", http_port)]);

    let secure = report.secure_redirection_chain.unwrap();
    assert!(!secure.passed);
    assert!(secure.data.unwrap().applicable);

    assert!(report.caa.unwrap().passed);
    assert!(!report.dnssec.unwrap().passed);

    let tls = report.tls_protocols.unwrap();
    assert!(!tls.passed);
    assert!(!tls.data.unwrap().tls1_3);
    assert!(!report.certificate.unwrap().passed);
    assert!(!report.forward_secrecy.unwrap().passed);
    assert!(!report.hsts.unwrap().passed);

    assert!(report.x_content_type_options.unwrap().passed);
    assert!(report.referrer_policy.unwrap().passed);
    assert!(!report.x_frame_options.unwrap().passed);
    assert_eq!(report.powered_by.unwrap().data.unwrap().value, "Express");

    assert!(scanner.report().is_some());
    let again = scanner.scan().await.unwrap_err();
    assert!(matches!(again, Error::AlreadyScanned { .. }));
    assert_eq!(again.kind(), ErrorKind::Configuration);
}

#[tokio::test]
async fn test_https_only_site() {
    let mock_server = MockServer::start().await;
    mount_doh(&mock_server).await;

    let config = config_for(&mock_server, closed_port(), spawn_tls_site().port);
    let report = run_full_scan("127.0.0.1", config).await.unwrap();

    let accepts = report.accepts.unwrap();
    assert!(!accepts.http);
    assert!(accepts.https);

    let upgrade = report.upgrade_to_https.unwrap();
    assert!(!upgrade.passed);
    assert!(!upgrade.data.unwrap().applicable);
    assert!(!report.secure_redirection_chain.unwrap().data.unwrap().applicable);

    let certificate = report.certificate.unwrap();
    assert!(certificate.passed);
    let certificate = certificate.data.unwrap();
    assert_eq!(certificate.length, 30);
    assert!(certificate.subject.contains("127.0.0.1"));

    assert!(report.forward_secrecy.unwrap().passed);

    let tls = report.tls_protocols.unwrap().data.unwrap();
    assert!(tls.tls1_3);
    assert!(tls.tls1_2);
    assert!(!tls.tls1_0);

    let hsts = report.hsts.unwrap();
    assert!(hsts.passed);
    let hsts = hsts.data.unwrap();
    assert_eq!(hsts.age, 300);
    assert!(!hsts.preloaded);

    assert_eq!(report.server.unwrap().data.unwrap().value, "tls-fixture/1.0");
}

#[tokio::test]
async fn test_http_site_upgrades_to_https() {
    let mock_server = MockServer::start().await;
    mount_doh(&mock_server).await;
    let site = spawn_tls_site();
    let https_url = format!("https://127.0.0.1:{}/", site.port);

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(301)
                .insert_header("Location", https_url.as_str())
                .insert_header("Set-Cookie", "sid=42; Secure"),
        )
        .mount(&mock_server)
        .await;

    let http_port = mock_server.address().port();
    let config = config_for(&mock_server, http_port, site.port);

    let hops = follow_chain(Protocol::Http, "127.0.0.1", &config).await.unwrap();
    assert_eq!(hops.len(), 2);
    assert_eq!(hops[0].status, 301);
    assert!(hops[0].certificate.is_none());
    assert!(hops[0].cipher.is_none());
    assert_eq!(hops[1].request.url(), https_url);
    assert!(hops[1].certificate.is_some());
    assert!(hops[1].cipher.is_some());
    assert!(
        site.requests
            .lock()
            .unwrap()
            .iter()
            .any(|head| head.contains("cookie: sid=42"))
    );

    let report = run_full_scan("127.0.0.1", config).await.unwrap();

    let accepts = report.accepts.unwrap();
    assert!(accepts.http);
    assert!(accepts.https);

    let upgrade = report.upgrade_to_https.unwrap();
    assert!(upgrade.passed);
    assert_eq!(
        upgrade.data.unwrap().chain,
        [format!("http://127.0.0.1:{}/", http_port), https_url.clone()]
    );

    let secure = report.secure_redirection_chain.unwrap();
    assert!(secure.passed);
    assert!(secure.data.unwrap().applicable);

    let certificate = report.certificate.unwrap();
    assert!(certificate.passed);
    assert_eq!(certificate.data.unwrap().length, 30);
    assert!(report.forward_secrecy.unwrap().passed);
    assert_eq!(report.hsts.unwrap().data.unwrap().age, 300);
}

#[tokio::test]
async fn test_unreachable_site_is_fatal() {
    let mock_server = MockServer::start().await;
    mount_doh(&mock_server).await;

    let config = config_for(&mock_server, closed_port(), closed_port());
    let mut scanner = Scanner::with_config("127.0.0.1", config).unwrap();

    let err = scanner.scan().await.unwrap_err();
    assert!(matches!(err, Error::Unreachable { .. }));
    assert!(err.is_fatal());
    assert_eq!(err.kind(), ErrorKind::FatalScan);
    assert!(scanner.report().is_none());

    assert!(matches!(scanner.scan().await, Err(Error::AlreadyScanned { .. })));
}
