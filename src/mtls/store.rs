//! Trust store and client keystore loading.
//!
//! Both stores are loaded once and then shared read-only (`Arc`) by every
//! client built from them.  A missing path is not an error: it means the
//! store is not configured, and callers get `Ok(None)`.
//!
//! # Formats
//!
//! - Client keystore: PKCS#12, one private-key entry per alias (the bag's
//!   friendly name).
//! - Trust store: PKCS#12 trusted-certificate entries (default) or a PEM
//!   bundle.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreKind, StoreLoadCause};
use crate::mtls::identity::CertIdentity;
use crate::{Error, Result};

/// On-disk format of a trust store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreFormat {
    /// Password-protected PKCS#12 file
    #[default]
    Pkcs12,
    /// PEM bundle of CA certificates; the password is ignored
    Pem,
}

// ─────────────────────────────────────────────────────────────────────────────
// Trust store
// ─────────────────────────────────────────────────────────────────────────────

/// Trusted root / intermediate certificates used to validate peers.
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
    certificates: Vec<CertificateDer<'static>>,
}

impl TrustStore {
    /// Load a trust store, or `Ok(None)` when `path` is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreLoad`] when the file is missing, the password is
    /// wrong, the format is invalid, or the store holds no certificates.
    pub fn load(
        path: Option<&Path>,
        password: Option<&str>,
        format: StoreFormat,
    ) -> Result<Option<Self>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let fail = |source| store_error(StoreKind::TrustStore, path, source);

        let data = fs::read(path).map_err(|e| fail(e.into()))?;
        let certificates = match format {
            StoreFormat::Pkcs12 => trusted_certs_from_pkcs12(&data, password.unwrap_or_default()),
            StoreFormat::Pem => trusted_certs_from_pem(&data),
        }
        .map_err(fail)?;

        if certificates.is_empty() {
            return Err(fail(StoreLoadCause::Empty("trusted certificates")));
        }

        debug!(
            path = %path.display(),
            ?format,
            certificates = certificates.len(),
            "Trust store loaded"
        );

        Ok(Some(Self {
            path: path.to_path_buf(),
            certificates,
        }))
    }

    /// Build a trust store directly from DER certificates.
    pub fn from_certificates(
        path: impl Into<PathBuf>,
        certificates: Vec<CertificateDer<'static>>,
    ) -> Self {
        Self {
            path: path.into(),
            certificates,
        }
    }

    /// The file this store was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Trusted certificates, in file order.
    pub fn certificates(&self) -> &[CertificateDer<'static>] {
        &self.certificates
    }

    /// Number of trusted certificates.
    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    /// `true` if the store holds no certificates.
    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    /// Convert into a rustls root store.
    pub fn root_store(&self) -> std::result::Result<RootCertStore, rustls::Error> {
        let mut roots = RootCertStore::empty();
        for cert in &self.certificates {
            roots.add(cert.clone())?;
        }
        Ok(roots)
    }
}

fn trusted_certs_from_pkcs12(
    data: &[u8],
    password: &str,
) -> std::result::Result<Vec<CertificateDer<'static>>, StoreLoadCause> {
    let keystore = KeyStore::from_pkcs12(data, password).map_err(StoreLoadCause::Pkcs12)?;

    let mut certs = Vec::new();
    for (alias, entry) in keystore.entries() {
        if let KeyStoreEntry::Certificate(cert) = entry {
            debug!(alias = %alias, "Trusted certificate entry");
            certs.push(CertificateDer::from(cert.as_der().to_vec()));
        }
    }
    Ok(certs)
}

fn trusted_certs_from_pem(
    data: &[u8],
) -> std::result::Result<Vec<CertificateDer<'static>>, StoreLoadCause> {
    rustls_pemfile::certs(&mut &data[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(StoreLoadCause::Pem)
}

// ─────────────────────────────────────────────────────────────────────────────
// Client keystore
// ─────────────────────────────────────────────────────────────────────────────

/// One client identity: a PKCS#8 private key and its certificate chain.
#[derive(Clone)]
pub struct KeyEntry {
    key_der: Vec<u8>,
    chain: Vec<CertificateDer<'static>>,
}

impl KeyEntry {
    /// Create an entry from a PKCS#8 DER key and a leaf-first chain.
    ///
    /// Returns `None` when the chain is empty.
    pub fn new(key_der: Vec<u8>, chain: Vec<CertificateDer<'static>>) -> Option<Self> {
        if chain.is_empty() {
            return None;
        }
        Some(Self { key_der, chain })
    }

    /// The private key, ready for a rustls key provider.
    pub fn private_key(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key_der.clone()))
    }

    /// Certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// The leaf (end-entity) certificate.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }
}

impl fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyEntry")
            .field("key_der", &"<redacted>")
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

/// Private keys and certificate chains addressed by alias.
#[derive(Debug, Clone)]
pub struct ClientKeystore {
    path: PathBuf,
    entries: BTreeMap<String, KeyEntry>,
}

impl ClientKeystore {
    /// Load a PKCS#12 keystore, or `Ok(None)` when `path` is `None`.
    ///
    /// A missing password is treated as the empty password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreLoad`] when the file is missing, the password is
    /// wrong, the data is not PKCS#12, or it holds no private-key entries.
    pub fn load(path: Option<&Path>, password: Option<&str>) -> Result<Option<Self>> {
        let Some(path) = path else {
            return Ok(None);
        };
        let fail = |source| store_error(StoreKind::ClientKeystore, path, source);

        let data = fs::read(path).map_err(|e| fail(e.into()))?;
        let keystore = KeyStore::from_pkcs12(&data, password.unwrap_or_default())
            .map_err(|e| fail(StoreLoadCause::Pkcs12(e)))?;

        let mut entries = BTreeMap::new();
        for (alias, entry) in keystore.entries() {
            let KeyStoreEntry::PrivateKeyChain(key_chain) = entry else {
                continue;
            };
            let chain: Vec<CertificateDer<'static>> = key_chain
                .chain()
                .iter()
                .map(|c| CertificateDer::from(c.as_der().to_vec()))
                .collect();
            match KeyEntry::new(key_chain.key().to_vec(), chain) {
                Some(key_entry) => {
                    debug!(
                        alias = %alias,
                        subject = %subject_of(key_entry.leaf()),
                        "Keystore identity"
                    );
                    entries.insert(alias.to_string(), key_entry);
                }
                None => warn!(alias = %alias, "Keystore entry has no certificate, skipped"),
            }
        }

        if entries.is_empty() {
            return Err(fail(StoreLoadCause::Empty("private key entries")));
        }

        debug!(
            path = %path.display(),
            aliases = entries.len(),
            "Client keystore loaded"
        );

        Ok(Some(Self {
            path: path.to_path_buf(),
            entries,
        }))
    }

    /// Build a keystore directly from entries.
    pub fn from_entries(
        path: impl Into<PathBuf>,
        entries: impl IntoIterator<Item = (String, KeyEntry)>,
    ) -> Self {
        Self {
            path: path.into(),
            entries: entries.into_iter().collect(),
        }
    }

    /// The file this keystore was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All aliases, sorted.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Look up the identity stored under `alias`.
    pub fn get(&self, alias: &str) -> Option<&KeyEntry> {
        self.entries.get(alias)
    }

    /// Iterate over `(alias, entry)` pairs in alias order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &KeyEntry)> {
        self.entries.iter().map(|(alias, entry)| (alias.as_str(), entry))
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if the keystore holds no identities.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Private helpers
// ─────────────────────────────────────────────────────────────────────────────

fn store_error(kind: StoreKind, path: &Path, source: StoreLoadCause) -> Error {
    Error::StoreLoad {
        kind,
        path: path.to_path_buf(),
        source,
    }
}

fn subject_of(cert: &CertificateDer<'_>) -> String {
    CertIdentity::from_der(cert.as_ref())
        .map(|id| id.subject)
        .unwrap_or_else(|_| "<unparseable>".to_owned())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
