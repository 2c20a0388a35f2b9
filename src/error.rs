//! Error types for the mTLS connector

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for the mTLS connector
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used where several libraries can fail behind one variant.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// mTLS connector errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A trust store or client keystore could not be loaded
    #[error("Could not load {kind} '{}': {source}", path.display())]
    StoreLoad {
        /// Which store failed
        kind: StoreKind,
        /// Path that was read
        path: PathBuf,
        /// Underlying cause
        #[source]
        source: StoreLoadCause,
    },

    /// Trust and key material could not be assembled into a TLS context
    #[error("Could not create TLS context for client '{alias}': {source}")]
    SslContextBuild {
        /// Alias the client was being built for
        alias: String,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// Network, timeout or protocol failure while executing a request
    #[error("Request failed for client '{alias}': {source}")]
    RequestExecution {
        /// Alias of the client that issued the request
        alias: String,
        /// Underlying cause
        #[source]
        source: reqwest::Error,
    },

    /// A managed client was used after it was released
    #[error("HTTP client for '{0}' is already closed")]
    ClientClosed(String),

    /// Certificate generation or parsing error
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap any TLS-assembly failure for `alias`.
    pub fn ssl_context(alias: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::SslContextBuild {
            alias: alias.into(),
            source: source.into(),
        }
    }

    /// `true` for errors raised while constructing stores or clients.
    ///
    /// These are not retried: the caller's configuration has to change.
    #[must_use]
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::StoreLoad { .. } | Self::SslContextBuild { .. }
        )
    }
}

/// The two kinds of key material the connector loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// CA certificates used to validate peers
    TrustStore,
    /// Private keys and certificate chains addressed by alias
    ClientKeystore,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustStore => f.write_str("trust store"),
            Self::ClientKeystore => f.write_str("client keystore"),
        }
    }
}

/// Root cause of a [`Error::StoreLoad`].
#[derive(Error, Debug)]
pub enum StoreLoadCause {
    /// File missing or unreadable
    #[error("{0}")]
    Io(#[from] io::Error),

    /// Malformed PKCS#12 data, or integrity check failed (wrong password)
    #[error("invalid PKCS#12 data or wrong password: {0}")]
    Pkcs12(#[source] p12_keystore::error::Error),

    /// Malformed PEM data
    #[error("invalid PEM data: {0}")]
    Pem(#[source] io::Error),

    /// The store parsed but holds nothing usable
    #[error("store contains no {0}")]
    Empty(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_load_message_names_kind_and_path() {
        let err = Error::StoreLoad {
            kind: StoreKind::TrustStore,
            path: PathBuf::from("/tmp/trust.p12"),
            source: StoreLoadCause::Empty("trusted certificates"),
        };
        let msg = err.to_string();
        assert!(msg.contains("trust store"));
        assert!(msg.contains("/tmp/trust.p12"));
        assert!(msg.contains("no trusted certificates"));
    }

    #[test]
    fn store_load_keeps_original_cause() {
        let err = Error::StoreLoad {
            kind: StoreKind::ClientKeystore,
            path: PathBuf::from("missing.p12"),
            source: StoreLoadCause::Io(io::Error::new(io::ErrorKind::NotFound, "gone")),
        };
        let source = std::error::Error::source(&err).expect("cause attached");
        assert_eq!(source.to_string(), "gone");
    }

    #[test]
    fn ssl_context_wraps_boxed_cause() {
        let err = Error::ssl_context("client1", rustls::Error::General("bad key".into()));
        assert!(err.to_string().contains("client1"));
        assert!(err.is_construction_error());
    }

    #[test]
    fn client_closed_is_not_a_construction_error() {
        assert!(!Error::ClientClosed("client1".into()).is_construction_error());
    }
}
