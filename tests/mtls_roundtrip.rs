//! End-to-end mTLS tests: per-alias clients against the demo endpoint.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum_server::Handle;
use pretty_assertions::assert_eq;
use reqwest::Method;
use reqwest::StatusCode;

use mtls_connector::Error;
use mtls_connector::config::{Config, ConnectorConfig};
use mtls_connector::connector::{HttpConnector, ManagedClient, SharedStores};
use mtls_connector::error::StoreKind;
use mtls_connector::mtls::{CaParams, CertGenerator, GeneratedCert, LeafCertParams, MtlsConfig};
use mtls_connector::server::DemoServer;

const ALIASES: [&str; 4] = ["client1", "client2", "client3", "client4"];
const PASSWORD: &str = "changeit";

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn ca(cn: &str) -> GeneratedCert {
    CertGenerator::init_ca(&CaParams {
        cn,
        validity_days: 7,
    })
    .unwrap()
}

/// Writes server material and the combined client stores into `dir`.
fn write_material(dir: &Path, require_client_cert: bool) -> Config {
    write_material_revoking(dir, require_client_cert, &[])
}

/// Same as [`write_material`], plus a CA-signed CRL revoking `revoked`.
fn write_material_revoking(dir: &Path, require_client_cert: bool, revoked: &[&str]) -> Config {
    let ca = ca("Roundtrip CA");
    let server = CertGenerator::issue_leaf(
        &LeafCertParams::server(
            "localhost",
            vec!["localhost".to_owned()],
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
            7,
        ),
        &ca.cert_pem,
        &ca.key_pem,
    )
    .unwrap();
    CertGenerator::write_to_dir(&ca, dir, "ca").unwrap();
    CertGenerator::write_to_dir(&server, dir, "server").unwrap();

    let clients: Vec<_> = ALIASES
        .iter()
        .map(|alias| {
            CertGenerator::issue_leaf(&LeafCertParams::client(alias, 7), &ca.cert_pem, &ca.key_pem)
                .unwrap()
        })
        .collect();
    let identities: Vec<_> = ALIASES.iter().copied().zip(&clients).collect();
    CertGenerator::write_keystore(&dir.join("keystore.p12"), &identities, PASSWORD).unwrap();
    CertGenerator::write_trust_store(&dir.join("truststore.p12"), &[("ca", &ca)], PASSWORD)
        .unwrap();

    let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
    let crl_path = if revoked.is_empty() {
        None
    } else {
        let revoked_certs: Vec<_> = identities
            .iter()
            .filter(|(alias, _)| revoked.contains(alias))
            .map(|&(_, cert)| cert)
            .collect();
        CertGenerator::write_crl(&dir.join("ca.crl"), &revoked_certs, &ca, 7).unwrap();
        Some(path("ca.crl"))
    };
    let mut config = Config::default();
    config.server.port = 0;
    config.mtls = MtlsConfig {
        server_cert: path("server.crt"),
        server_key: path("server.key"),
        ca_cert: path("ca.crt"),
        require_client_cert,
        crl_path,
    };
    config.client = ConnectorConfig {
        request_timeout_secs: 5,
        ..ConnectorConfig::new("client1")
            .with_keystore(dir.join("keystore.p12"), Some(PASSWORD))
            .with_trust_store(dir.join("truststore.p12"), Some(PASSWORD))
    };
    config
}

async fn start_server(config: &Config) -> (Handle<SocketAddr>, SocketAddr) {
    let server = DemoServer::new(config).unwrap();
    let handle = Handle::new();
    tokio::spawn(server.run_with_handle(handle.clone()));
    let addr = handle.listening().await.expect("server listening");
    (handle, addr)
}

fn url(addr: SocketAddr) -> String {
    format!("https://127.0.0.1:{}/", addr.port())
}

// ── Alias selection ──────────────────────────────────────────────────────────

#[tokio::test]
async fn each_alias_is_greeted_by_its_own_name() {
    // GIVEN: one keystore holding four client identities
    let dir = tempfile::tempdir().unwrap();
    let config = write_material(dir.path(), true);
    let (handle, addr) = start_server(&config).await;
    let stores = SharedStores::load(&config.client).unwrap();

    // WHEN: one connector per alias, sharing the loaded stores
    let mut greetings = Vec::new();
    for alias in ALIASES {
        let connector =
            HttpConnector::with_stores(config.client.for_alias(alias), stores.clone()).unwrap();
        let body = connector.get_text_or_none(&url(addr)).await.unwrap();
        greetings.push(body.expect("request succeeded"));
    }

    // THEN: every greeting names its own principal, and only that one
    for (alias, greeting) in ALIASES.iter().zip(&greetings) {
        assert!(greeting.starts_with("Hello "), "{greeting}");
        let principal = greeting.rsplit("for client=").next().unwrap();
        assert_eq!(principal, *alias);
    }

    handle.shutdown();
}

#[tokio::test]
async fn unknown_alias_is_rejected_when_certificate_required() {
    // GIVEN: an alias the keystore does not contain
    let dir = tempfile::tempdir().unwrap();
    let config = write_material(dir.path(), true);
    let (handle, addr) = start_server(&config).await;

    // WHEN: construction succeeds
    let connector = HttpConnector::new(config.client.for_alias("client9")).unwrap();

    // THEN: no certificate is presented, so the server refuses the connection
    let body = connector.get_text_or_none(&url(addr)).await.unwrap();
    assert_eq!(body, None);

    handle.shutdown();
}

#[tokio::test]
async fn unknown_alias_is_unauthenticated_when_certificate_optional() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_material(dir.path(), false);
    let (handle, addr) = start_server(&config).await;
    let connector = HttpConnector::new(config.client.for_alias("client9")).unwrap();

    let status = connector
        .with_client(async |client: &ManagedClient| {
            let request = client.request(Method::GET, &url(addr))?;
            client.execute(request).await.map(|r| r.status())
        })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(status, StatusCode::UNAUTHORIZED);

    handle.shutdown();
}

#[tokio::test]
async fn revoked_alias_is_refused_while_others_are_greeted() {
    // GIVEN: the server checks client certificates against a CRL revoking client2
    let dir = tempfile::tempdir().unwrap();
    let config = write_material_revoking(dir.path(), true, &["client2"]);
    let (handle, addr) = start_server(&config).await;
    let stores = SharedStores::load(&config.client).unwrap();

    // WHEN: every alias sends one request
    let mut bodies = Vec::new();
    for alias in ALIASES {
        let connector =
            HttpConnector::with_stores(config.client.for_alias(alias), stores.clone()).unwrap();
        bodies.push(connector.get_text_or_none(&url(addr)).await.unwrap());
    }

    // THEN: only the revoked alias gets nothing back
    for (alias, body) in ALIASES.iter().zip(&bodies) {
        if *alias == "client2" {
            assert_eq!(body, &None);
        } else {
            let body = body.as_deref().expect("request succeeded");
            assert!(body.ends_with(&format!("for client={alias}")), "{body}");
        }
    }

    handle.shutdown();
}

// ── Trust ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn server_outside_trust_store_is_rejected() {
    // GIVEN: a trust store holding an unrelated CA
    let dir = tempfile::tempdir().unwrap();
    let config = write_material(dir.path(), true);
    let (handle, addr) = start_server(&config).await;

    let other = dir.path().join("other-truststore.p12");
    CertGenerator::write_trust_store(&other, &[("other", &ca("Other CA"))], PASSWORD).unwrap();
    let client_config = config
        .client
        .clone()
        .with_trust_store(other, Some(PASSWORD));

    // WHEN
    let connector = HttpConnector::new(client_config).unwrap();
    let result = connector
        .with_client(async |client: &ManagedClient| client.get_text(&url(addr)).await)
        .await
        .unwrap();

    // THEN: certificate verification fails as a request error
    assert!(matches!(result, Err(Error::RequestExecution { .. })));

    handle.shutdown();
}

#[test]
fn wrong_trust_store_password_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_material(dir.path(), true);
    config.client.trust_store_password = Some("not-the-password".to_owned());

    let err = HttpConnector::new(config.client).unwrap_err();

    assert!(matches!(
        err,
        Error::StoreLoad {
            kind: StoreKind::TrustStore,
            ..
        }
    ));
    assert!(err.is_construction_error());
}

// ── Interceptors & lifecycle ─────────────────────────────────────────────────

#[tokio::test]
async fn interceptors_run_once_per_request() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_material(dir.path(), true);
    let (handle, addr) = start_server(&config).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let connector = HttpConnector::new(config.client.clone())
        .unwrap()
        .with_interceptor(move |req: &mut reqwest::Request| -> mtls_connector::Result<()> {
            assert!(req.headers().contains_key("X-ApplicationName"));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    for _ in 0..2 {
        let body = connector.get_text_or_none(&url(addr)).await.unwrap();
        assert!(body.is_some());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);

    handle.shutdown();
}

#[tokio::test]
async fn client_is_usable_after_failed_request() {
    // GIVEN: a client whose first request fails
    let dir = tempfile::tempdir().unwrap();
    let config = write_material(dir.path(), true);
    let (handle, addr) = start_server(&config).await;
    let connector = HttpConnector::new(config.client.clone()).unwrap();
    let mut client = connector.create_client().unwrap();

    assert!(client.get_text("https://127.0.0.1:9/").await.is_err());

    // THEN: the same client still reaches the server, then closes exactly once
    let body = client.get_text(&url(addr)).await.unwrap();
    assert!(body.ends_with("for client=client1"));
    assert!(client.close());
    assert!(!client.close());
    assert!(matches!(
        client.get_text(&url(addr)).await,
        Err(Error::ClientClosed(_))
    ));

    handle.shutdown();
}
