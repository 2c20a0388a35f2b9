//! Certificate management: rustls config building, loading, and generation.
//!
//! Provides:
//! - [`build_client_tls_config`]: `rustls::ClientConfig` presenting one alias
//! - [`build_tls_config`]: `rustls::ServerConfig` for the demo endpoint
//! - [`load_certs`] / [`load_private_key`]: PEM file loading
//! - [`CertGenerator`]: `rcgen`-backed CA, server and client certificates,
//!   plus PKCS#12 keystore / trust store writers for `gen-certs`
//!
//! # File format
//!
//! Server-side certificate and key files are **PEM**.  Client identities and
//! the client trust store are **PKCS#12** (see [`crate::mtls::store`]).

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use p12_keystore::{Certificate as P12Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rcgen::string::Ia5String;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateRevocationListParams, DistinguishedName,
    DnType, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyIdMethod, KeyPair,
    KeyUsagePurpose, RevocationReason, RevokedCertParams, SanType, SerialNumber, date_time_ymd,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::debug;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::mtls::alias::AliasCertResolver;
use crate::mtls::config::MtlsConfig;
use crate::mtls::store::{ClientKeystore, TrustStore};
use crate::{Error, Result};

/// The crypto provider every TLS config in this crate is built with.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS client config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ClientConfig` that presents the identity stored under
/// `alias`.
///
/// - With a trust store, peers are validated against it only; without one,
///   against the `webpki-roots` Mozilla set.
/// - With a keystore, client authentication goes through
///   [`AliasCertResolver`]; without one, no client certificate is sent.
///
/// # Errors
///
/// Returns [`Error::SslContextBuild`] if the trust or key material cannot be
/// assembled.
pub fn build_client_tls_config(
    alias: &str,
    trust_store: Option<&TrustStore>,
    keystore: Option<&ClientKeystore>,
) -> Result<ClientConfig> {
    let provider = crypto_provider();
    let ctx = |e: rustls::Error| Error::ssl_context(alias, e);

    let roots = match trust_store {
        Some(store) => store.root_store().map_err(ctx)?,
        None => RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        },
    };

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(ctx)?
        .with_root_certificates(roots);

    let tls_cfg = match keystore {
        Some(keystore) => {
            let resolver = AliasCertResolver::new(alias, keystore, &provider).map_err(ctx)?;
            builder.with_client_cert_resolver(Arc::new(resolver))
        }
        None => builder.with_no_client_auth(),
    };

    debug!(
        alias = %alias,
        trust_store = ?trust_store.map(|s| s.path().display().to_string()),
        keystore = ?keystore.map(|k| k.path().display().to_string()),
        "Client TLS config built"
    );

    Ok(tls_cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: build TLS server config
// ─────────────────────────────────────────────────────────────────────────────

/// Build a `rustls::ServerConfig` for the demo endpoint.
///
/// When `config.require_client_cert` is `true`, clients without a valid
/// certificate signed by the configured CA are rejected at the handshake.
/// Otherwise certificates are requested but optional.
///
/// # Errors
///
/// Returns an error if any certificate or key file cannot be read or parsed,
/// or if the rustls config cannot be built (e.g. mismatched cert/key pair).
pub fn build_tls_config(config: &MtlsConfig) -> Result<ServerConfig> {
    let server_certs = load_certs(&config.server_cert)?;
    let server_key = load_private_key(&config.server_key)?;
    let ca_certs = load_certs(&config.ca_cert)?;

    let mut root_store = RootCertStore::empty();
    for cert in &ca_certs {
        root_store
            .add(cert.clone())
            .map_err(|e| Error::Config(format!("Failed to add CA cert to trust store: {e}")))?;
    }

    let provider = crypto_provider();
    let client_verifier = build_client_verifier(config, root_store, Arc::clone(&provider))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Config(format!("TLS protocol version error: {e}")))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(server_certs, server_key)
        .map_err(|e| Error::Config(format!("TLS config error (cert/key mismatch?): {e}")))?;

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    debug!(
        server_cert = %config.server_cert,
        ca_cert = %config.ca_cert,
        require_client_cert = config.require_client_cert,
        "Server TLS config built"
    );

    Ok(tls_cfg)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: PEM loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or contains no valid PEM
/// certificate blocks.
pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse certs from '{path}': {e}")))?;

    if certs.is_empty() {
        return Err(Error::Config(format!("No certificates found in '{path}'")));
    }

    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, contains no private key, or
/// the key format is unsupported.
pub fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    let key = rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| Error::Config(format!("Failed to parse private key from '{path}': {e}")))?
        .ok_or_else(|| Error::Config(format!("No private key found in '{path}'")))?;

    Ok(key)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public: certificate generation
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters for generating a CA certificate.
#[derive(Debug)]
pub struct CaParams<'a> {
    /// Common Name for the root CA.
    pub cn: &'a str,
    /// Validity period in days.
    pub validity_days: u32,
}

/// What a leaf certificate is for; sets its extended key usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafUsage {
    /// TLS server (`serverAuth`)
    Server,
    /// TLS client (`clientAuth`)
    Client,
}

/// Parameters for generating a leaf certificate (server or client).
#[derive(Debug)]
pub struct LeafCertParams<'a> {
    /// Common Name.
    pub cn: &'a str,
    /// Subject Alternative Names, DNS entries.
    pub san_dns: Vec<String>,
    /// Subject Alternative Names, IP addresses.
    pub san_ips: Vec<IpAddr>,
    /// Extended key usage.
    pub usage: LeafUsage,
    /// Validity period in days.
    pub validity_days: u32,
}

impl<'a> LeafCertParams<'a> {
    /// Client certificate with only a CN.
    pub fn client(cn: &'a str, validity_days: u32) -> Self {
        Self {
            cn,
            san_dns: Vec::new(),
            san_ips: Vec::new(),
            usage: LeafUsage::Client,
            validity_days,
        }
    }

    /// Server certificate valid for the given host names and addresses.
    pub fn server(
        cn: &'a str,
        san_dns: Vec<String>,
        san_ips: Vec<IpAddr>,
        validity_days: u32,
    ) -> Self {
        Self {
            cn,
            san_dns,
            san_ips,
            usage: LeafUsage::Server,
            validity_days,
        }
    }
}

/// Generated certificate and key pair.
#[derive(Debug, Clone)]
pub struct GeneratedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded private key.
    pub key_pem: String,
    /// DER-encoded certificate.
    pub cert_der: Vec<u8>,
    /// DER-encoded PKCS#8 private key.
    pub key_der: Vec<u8>,
}

/// Certificate generator backed by `rcgen` and `p12-keystore`.
pub struct CertGenerator;

impl CertGenerator {
    /// Generate a self-signed CA certificate.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or certificate serialisation fails.
    pub fn init_ca(params: &CaParams<'_>) -> Result<GeneratedCert> {
        let key_pair = KeyPair::generate()
            .map_err(|e| Error::Certificate(format!("Failed to generate CA key: {e}")))?;

        let mut ca_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        ca_params.distinguished_name = dn;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        ca_params.not_after = validity_to_date(params.validity_days)?;

        let ca_cert = ca_params
            .self_signed(&key_pair)
            .map_err(|e| Error::Certificate(format!("CA cert generation failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: ca_cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: ca_cert.der().to_vec(),
            key_der: key_pair.serialize_der(),
        })
    }

    /// Issue a leaf certificate signed by `ca_cert_pem` / `ca_key_pem`.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA cert/key cannot be parsed, key generation
    /// fails, a SAN is invalid, or signing fails.
    pub fn issue_leaf(
        params: &LeafCertParams<'_>,
        ca_cert_pem: &str,
        ca_key_pem: &str,
    ) -> Result<GeneratedCert> {
        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::Certificate(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
            .map_err(|e| Error::Certificate(format!("Failed to parse CA cert: {e}")))?;

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::Certificate(format!("Failed to generate leaf key: {e}")))?;

        let mut leaf_params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, params.cn);
        leaf_params.distinguished_name = dn;
        leaf_params.not_after = validity_to_date(params.validity_days)?;
        leaf_params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        leaf_params.extended_key_usages = vec![match params.usage {
            LeafUsage::Server => ExtendedKeyUsagePurpose::ServerAuth,
            LeafUsage::Client => ExtendedKeyUsagePurpose::ClientAuth,
        }];

        let mut sans: Vec<SanType> = Vec::new();
        for dns in &params.san_dns {
            let ia5 = Ia5String::try_from(dns.as_str())
                .map_err(|e| Error::Certificate(format!("Invalid DNS SAN '{dns}': {e}")))?;
            sans.push(SanType::DnsName(ia5));
        }
        sans.extend(params.san_ips.iter().copied().map(SanType::IpAddress));
        leaf_params.subject_alt_names = sans;

        let leaf_cert = leaf_params
            .signed_by(&leaf_key, &issuer)
            .map_err(|e| Error::Certificate(format!("Leaf cert signing failed: {e}")))?;

        Ok(GeneratedCert {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
            cert_der: leaf_cert.der().to_vec(),
            key_der: leaf_key.serialize_der(),
        })
    }

    /// Encode identities into one PKCS#12 keystore, one alias per entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate cannot be re-read or encoding fails.
    pub fn keystore_bytes(
        identities: &[(&str, &GeneratedCert)],
        password: &str,
    ) -> Result<Vec<u8>> {
        let mut keystore = KeyStore::new();
        for &(alias, identity) in identities {
            let cert = p12_certificate(&identity.cert_der)?;
            let chain = PrivateKeyChain::new(
                identity.key_der.clone(),
                alias.as_bytes().to_vec(),
                vec![cert],
            );
            keystore.add_entry(alias, KeyStoreEntry::PrivateKeyChain(chain));
        }
        encode_pkcs12(&keystore, password)
    }

    /// Encode CA certificates into a PKCS#12 trust store.
    ///
    /// # Errors
    ///
    /// Returns an error if a certificate cannot be re-read or encoding fails.
    pub fn trust_store_bytes(cas: &[(&str, &GeneratedCert)], password: &str) -> Result<Vec<u8>> {
        let mut keystore = KeyStore::new();
        for &(alias, ca) in cas {
            keystore.add_entry(alias, KeyStoreEntry::Certificate(p12_certificate(&ca.cert_der)?));
        }
        encode_pkcs12(&keystore, password)
    }

    /// Write a [`GeneratedCert`] to disk as `<stem>.crt` and `<stem>.key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the files
    /// cannot be written.
    pub fn write_to_dir(cert: &GeneratedCert, dir: &Path, stem: &str) -> Result<()> {
        create_dir(dir)?;
        write_file(&dir.join(format!("{stem}.crt")), cert.cert_pem.as_bytes())?;
        write_file(&dir.join(format!("{stem}.key")), cert.key_pem.as_bytes())
    }

    /// Write a PKCS#12 keystore holding `identities` to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_keystore(
        path: &Path,
        identities: &[(&str, &GeneratedCert)],
        password: &str,
    ) -> Result<()> {
        write_file(path, &Self::keystore_bytes(identities, password)?)
    }

    /// Write a PKCS#12 trust store holding `cas` to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_trust_store(
        path: &Path,
        cas: &[(&str, &GeneratedCert)],
        password: &str,
    ) -> Result<()> {
        write_file(path, &Self::trust_store_bytes(cas, password)?)
    }

    /// Issue a PEM CRL signed by the CA, listing `revoked` as compromised.
    ///
    /// An empty `revoked` yields a valid CRL that revokes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the CA cert/key or a revoked certificate cannot be
    /// parsed, or signing fails.
    pub fn issue_crl(
        revoked: &[&GeneratedCert],
        ca_cert_pem: &str,
        ca_key_pem: &str,
        validity_days: u32,
    ) -> Result<String> {
        let ca_key = KeyPair::from_pem(ca_key_pem)
            .map_err(|e| Error::Certificate(format!("Failed to parse CA key: {e}")))?;
        let issuer = Issuer::from_ca_cert_pem(ca_cert_pem, ca_key)
            .map_err(|e| Error::Certificate(format!("Failed to parse CA cert: {e}")))?;

        let now = unix_time(0)?;
        let revoked_certs = revoked
            .iter()
            .map(|cert| {
                Ok(RevokedCertParams {
                    serial_number: serial_of(&cert.cert_der)?,
                    revocation_time: now,
                    reason_code: Some(RevocationReason::KeyCompromise),
                    invalidity_date: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let params = CertificateRevocationListParams {
            this_update: now,
            next_update: validity_to_date(validity_days.max(1))?,
            crl_number: SerialNumber::from(1u64),
            issuing_distribution_point: None,
            revoked_certs,
            key_identifier_method: KeyIdMethod::Sha256,
        };

        params
            .signed_by(&issuer)
            .and_then(|crl| crl.pem())
            .map_err(|e| Error::Certificate(format!("CRL signing failed: {e}")))
    }

    /// Write a CRL from [`issue_crl`](Self::issue_crl) to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if issuing or writing fails.
    pub fn write_crl(
        path: &Path,
        revoked: &[&GeneratedCert],
        ca: &GeneratedCert,
        validity_days: u32,
    ) -> Result<()> {
        let pem = Self::issue_crl(revoked, &ca.cert_pem, &ca.key_pem, validity_days)?;
        write_file(path, pem.as_bytes())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn read_file(path: &str) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Config(format!("Cannot read '{path}': {e}")))
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| Error::Certificate(format!("Cannot create dir '{}': {e}", dir.display())))
}

fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir(parent)?;
    }
    fs::write(path, contents)
        .map_err(|e| Error::Certificate(format!("Cannot write '{}': {e}", path.display())))
}

fn p12_certificate(der: &[u8]) -> Result<P12Certificate> {
    P12Certificate::from_der(der)
        .map_err(|e| Error::Certificate(format!("Cannot encode certificate for PKCS#12: {e}")))
}

fn encode_pkcs12(keystore: &KeyStore, password: &str) -> Result<Vec<u8>> {
    keystore
        .writer(password)
        .write()
        .map_err(|e| Error::Certificate(format!("PKCS#12 encoding failed: {e}")))
}

/// Build a `WebPkiClientVerifier` with optional CRL support.
fn build_client_verifier(
    config: &MtlsConfig,
    root_store: RootCertStore,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>> {
    let builder = WebPkiClientVerifier::builder_with_provider(Arc::new(root_store), provider);

    let builder = if let Some(ref crl_path) = config.crl_path {
        builder.with_crls(load_crls(crl_path)?)
    } else {
        builder
    };

    let builder = if config.require_client_cert {
        builder
    } else {
        builder.allow_unauthenticated()
    };

    builder
        .build()
        .map_err(|e| Error::Config(format!("Failed to build client verifier: {e}")))
}

/// Load CRL entries from a PEM file.
fn load_crls(path: &str) -> Result<Vec<rustls::pki_types::CertificateRevocationListDer<'static>>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::crls(&mut pem_data.as_slice())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Failed to parse CRL from '{path}': {e}")))
}

/// Convert a validity period (days) into a future date for `rcgen`.
fn validity_to_date(days: u32) -> Result<time::OffsetDateTime> {
    let dt = unix_time(u64::from(days) * 86_400)?;
    Ok(date_time_ymd(dt.year(), dt.month() as u8, dt.day()))
}

/// Current time plus `offset_secs`.
fn unix_time(offset_secs: u64) -> Result<time::OffsetDateTime> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Certificate(format!("System time error: {e}")))?
        .as_secs();

    let secs = now_secs.saturating_add(offset_secs);

    time::OffsetDateTime::from_unix_timestamp(i64::try_from(secs).unwrap_or(i64::MAX))
        .map_err(|e| Error::Certificate(format!("Date calculation error: {e}")))
}

fn serial_of(cert_der: &[u8]) -> Result<SerialNumber> {
    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))?;
    Ok(SerialNumber::from_slice(cert.raw_serial()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
