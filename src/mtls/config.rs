//! mTLS configuration types for the demo endpoint.
//!
//! Defines the YAML-deserialisable configuration for the server side of
//! mutual TLS: server certificate paths, the CA used to verify client
//! certificates, and an optional CRL.
//!
//! # Example YAML
//!
//! ```yaml
//! mtls:
//!   server_cert: "certs/server.crt"
//!   server_key:  "certs/server.key"
//!   ca_cert:     "certs/ca.crt"
//!   require_client_cert: true
//!   crl_path:    "certs/ca.crl"
//! ```

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level mTLS config
// ─────────────────────────────────────────────────────────────────────────────

/// Top-level mTLS configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtlsConfig {
    /// Path to the PEM-encoded server certificate file.
    pub server_cert: String,

    /// Path to the PEM-encoded server private key file.
    pub server_key: String,

    /// Path to the PEM-encoded CA certificate used to verify client certs.
    pub ca_cert: String,

    /// When `true`, clients that do not present a valid certificate signed
    /// by `ca_cert` are rejected at the TLS handshake.
    ///
    /// When `false`, the handshake succeeds without one and the endpoint
    /// answers `401 Unauthorized` instead.
    #[serde(default = "default_require_client_cert")]
    pub require_client_cert: bool,

    /// Optional path to a PEM-encoded Certificate Revocation List.
    #[serde(default)]
    pub crl_path: Option<String>,
}

fn default_require_client_cert() -> bool {
    true
}

impl Default for MtlsConfig {
    fn default() -> Self {
        Self {
            server_cert: String::new(),
            server_key: String::new(),
            ca_cert: String::new(),
            require_client_cert: default_require_client_cert(),
            crl_path: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
