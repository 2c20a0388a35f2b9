//! Mutual TLS (mTLS) key material and TLS contexts.
//!
//! # Architecture
//!
//! ```text
//! PKCS#12 keystore ──┐
//!                    ├─ store ──→ AliasCertResolver ─┐
//! trust store ───────┘                               ├─ cert_manager ──→ rustls::ClientConfig
//!                                                    │
//! handshake: server offers sigschemes → choose_alias(usable aliases, configured)
//!            → CertifiedKey for the configured alias, or no certificate
//! ```
//!
//! # Modules
//!
//! - [`config`]: YAML configuration of the demo endpoint (`MtlsConfig`)
//! - [`store`]: trust store and client keystore loading
//! - [`alias`]: `choose_alias` and the rustls client-cert resolver
//! - [`identity`]: X.509 subject / CN extraction (`CertIdentity`)
//! - [`cert_manager`]: rustls config building and certificate generation

pub mod alias;
pub mod cert_manager;
pub mod config;
pub mod identity;
pub mod store;

pub use alias::{AliasCertResolver, AliasStrategy, choose_alias};
pub use cert_manager::{
    CaParams, CertGenerator, GeneratedCert, LeafCertParams, LeafUsage, build_client_tls_config,
    build_tls_config, crypto_provider, load_certs, load_private_key,
};
pub use config::MtlsConfig;
pub use identity::CertIdentity;
pub use store::{ClientKeystore, KeyEntry, StoreFormat, TrustStore};
