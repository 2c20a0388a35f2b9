//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::mtls::{MtlsConfig, StoreFormat};
use crate::{Error, Result};

/// Request header carrying the application identifier.
pub const APPLICATION_NAME_HEADER: &str = "X-ApplicationName";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Outbound client (connector) configuration
    pub client: ConnectorConfig,
    /// Demo endpoint listener
    pub server: ServerConfig,
    /// Demo endpoint TLS material
    pub mtls: MtlsConfig,
}

/// Listener configuration for the demo endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
        }
    }
}

/// Configuration of one aliased HTTPS client.
///
/// Passwords support a literal value or `env:VAR_NAME`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Keystore alias whose certificate is presented (required)
    pub client_alias: String,

    /// PKCS#12 client keystore; absent means no client certificate
    pub client_keystore_path: Option<PathBuf>,

    /// Keystore password; absent means the empty password
    pub keystore_password: Option<String>,

    /// Trust store; absent means the platform default roots
    pub trust_store_path: Option<PathBuf>,

    /// Trust store password
    pub trust_store_password: Option<String>,

    /// Trust store file format
    pub trust_store_format: StoreFormat,

    /// Connect, connection-acquisition and read timeout, in seconds
    pub request_timeout_secs: u64,

    /// Value of the `X-ApplicationName` header
    pub application_name: String,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            client_alias: String::new(),
            client_keystore_path: None,
            keystore_password: None,
            trust_store_path: None,
            trust_store_password: None,
            trust_store_format: StoreFormat::default(),
            request_timeout_secs: 45,
            application_name: "Acme-Keycloak".to_string(),
        }
    }
}

impl ConnectorConfig {
    /// Client for `alias` with neither keystore nor trust store.
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            client_alias: alias.into(),
            ..Self::default()
        }
    }

    /// Use the PKCS#12 keystore at `path`.
    #[must_use]
    pub fn with_keystore(mut self, path: impl Into<PathBuf>, password: Option<&str>) -> Self {
        self.client_keystore_path = Some(path.into());
        self.keystore_password = password.map(str::to_owned);
        self
    }

    /// Use the trust store at `path`.
    #[must_use]
    pub fn with_trust_store(mut self, path: impl Into<PathBuf>, password: Option<&str>) -> Self {
        self.trust_store_path = Some(path.into());
        self.trust_store_password = password.map(str::to_owned);
        self
    }

    /// Same configuration bound to another alias.
    #[must_use]
    pub fn for_alias(&self, alias: impl Into<String>) -> Self {
        Self {
            client_alias: alias.into(),
            ..self.clone()
        }
    }

    /// Uniform request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Keystore password with `env:` references expanded.
    pub fn resolve_keystore_password(&self) -> Option<String> {
        self.keystore_password.as_deref().map(resolve_secret)
    }

    /// Trust store password with `env:` references expanded.
    pub fn resolve_trust_store_password(&self) -> Option<String> {
        self.trust_store_password.as_deref().map(resolve_secret)
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty alias or a zero timeout.
    pub fn validate(&self) -> Result<()> {
        if self.client_alias.trim().is_empty() {
            return Err(Error::Config("client_alias is required".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `env:VAR_NAME`; unknown variables leave the value as written.
fn resolve_secret(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).unwrap_or_else(|_| value.to_string()),
        None => value.to_string(),
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MTLS_CONNECTOR_ prefix)
        figment = figment.merge(Env::prefixed("MTLS_CONNECTOR_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}
