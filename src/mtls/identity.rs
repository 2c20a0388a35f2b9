//! Certificate identity extraction.
//!
//! Parses an X.509 DER-encoded certificate and extracts the fields the demo
//! endpoint logs about: the subject and issuer DNs, the Common Name and the
//! DNS SAN entries.  The authenticated *principal* of a client certificate is
//! its subject CN, falling back to the full subject.

use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Certificate identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity fields of a certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertIdentity {
    /// Subject distinguished name, RFC 4514 style (`CN=client1, O=Acme`).
    pub subject: String,

    /// Issuer distinguished name.
    pub issuer: String,

    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Subject Alternative Name, DNS entries.
    pub san_dns_names: Vec<String>,
}

impl CertIdentity {
    /// Parse a DER-encoded certificate and extract its identity fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Certificate` if the bytes are not a certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))?;

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            common_name: extract_cn(&cert),
            san_dns_names: extract_dns_sans(&cert),
        })
    }

    /// Name of the authenticated principal: the CN, else the whole subject.
    pub fn principal_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or(&self.subject)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Extraction helpers
// ─────────────────────────────────────────────────────────────────────────────

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}

fn extract_dns_sans(cert: &X509Certificate<'_>) -> Vec<String> {
    let Ok(Some(san_ext)) = cert.subject_alternative_name() else {
        return Vec::new();
    };
    san_ext
        .value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some((*dns).to_owned()),
            _ => None,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
