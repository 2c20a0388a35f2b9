//! Aliased HTTPS client factory.
//!
//! An [`HttpConnector`] is bound to one keystore alias. Every client it
//! creates presents the certificate stored under that alias (or none, if the
//! alias is absent) and validates servers against the configured trust
//! store.
//!
//! Clients are acquired in a scope and released when it ends:
//!
//! ```no_run
//! # async fn demo() -> mtls_connector::Result<()> {
//! use mtls_connector::config::ConnectorConfig;
//! use mtls_connector::connector::HttpConnector;
//!
//! let config = ConnectorConfig::new("client1")
//!     .with_keystore("certs/clients-combined-keystore.p12", Some("changeit"))
//!     .with_trust_store("certs/clients-combined-truststore.p12", Some("changeit"));
//! let connector = HttpConnector::new(config)?;
//!
//! let body = connector
//!     .with_client(async |client| client.get_text("https://localhost:8443/").await)
//!     .await??;
//! println!("{body}");
//! # Ok(())
//! # }
//! ```

mod interceptor;
mod managed;

pub use interceptor::{ApplicationNameHeader, RequestInterceptor};
pub use managed::ManagedClient;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::config::ConnectorConfig;
use crate::mtls::{ClientKeystore, TrustStore, build_client_tls_config};
use crate::{Error, Result};

/// Trust store and keystore loaded once and shared between connectors.
#[derive(Debug, Clone, Default)]
pub struct SharedStores {
    /// Peer validation anchors; `None` means platform defaults
    pub trust_store: Option<Arc<TrustStore>>,
    /// Client identities; `None` means no client certificate
    pub keystore: Option<Arc<ClientKeystore>>,
}

impl SharedStores {
    /// Load whichever stores `config` names.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreLoad`] if a configured store cannot be read.
    pub fn load(config: &ConnectorConfig) -> Result<Self> {
        let trust_password = config.resolve_trust_store_password();
        let trust_store = TrustStore::load(
            config.trust_store_path.as_deref(),
            trust_password.as_deref(),
            config.trust_store_format,
        )?;

        let keystore_password = config.resolve_keystore_password();
        let keystore = ClientKeystore::load(
            config.client_keystore_path.as_deref(),
            keystore_password.as_deref(),
        )?;

        if let Some(keystore) = &keystore {
            info!(
                keystore = %keystore.path().display(),
                aliases = ?keystore.aliases().collect::<Vec<_>>(),
                "Client keystore loaded"
            );
        }

        Ok(Self {
            trust_store: trust_store.map(Arc::new),
            keystore: keystore.map(Arc::new),
        })
    }

    fn is_empty(&self) -> bool {
        self.trust_store.is_none() && self.keystore.is_none()
    }
}

/// Factory of HTTPS clients presenting one alias's certificate.
pub struct HttpConnector {
    config: ConnectorConfig,
    stores: SharedStores,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl HttpConnector {
    /// Validate `config` and load its stores.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration or
    /// `Error::StoreLoad` if a store cannot be loaded.
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        config.validate()?;
        let stores = SharedStores::load(&config)?;
        Self::with_stores(config, stores)
    }

    /// Build a connector over already loaded stores.
    ///
    /// The store paths in `config` are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid configuration.
    pub fn with_stores(config: ConnectorConfig, stores: SharedStores) -> Result<Self> {
        config.validate()?;
        let app_name = ApplicationNameHeader::new(&config.application_name)?;
        Ok(Self {
            config,
            stores,
            interceptors: vec![Arc::new(app_name)],
        })
    }

    /// Append an interceptor; it runs after those already registered.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// The configured alias.
    pub fn alias(&self) -> &str {
        &self.config.client_alias
    }

    /// The connector's configuration.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Build a new client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SslContextBuild`] if the TLS context or the HTTP
    /// client cannot be built. This is not retried.
    pub fn create_client(&self) -> Result<ManagedClient> {
        let alias = self.alias();
        let timeout = self.config.request_timeout();

        let mut builder = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .timeout(timeout);

        if !self.stores.is_empty() {
            let tls = build_client_tls_config(
                alias,
                self.stores.trust_store.as_deref(),
                self.stores.keystore.as_deref(),
            )?;
            builder = builder.use_preconfigured_tls(tls);
        }

        let client = builder
            .build()
            .map_err(|e| Error::ssl_context(alias, e))?;

        debug!(alias = %alias, timeout_secs = timeout.as_secs(), "HTTP client created");

        Ok(ManagedClient::new(
            alias.to_owned(),
            client,
            self.interceptors.clone().into(),
        ))
    }

    /// Run `work` with a fresh client, then release it.
    ///
    /// The client is released however `work` ends, including by panic or by
    /// the returned future being dropped.
    ///
    /// # Errors
    ///
    /// Only client construction errors; `work`'s own result is returned as
    /// `T`.
    pub async fn with_client<T>(&self, work: impl AsyncFnOnce(&ManagedClient) -> T) -> Result<T> {
        let mut client = self.create_client()?;
        let result = work(&client).await;
        client.close();
        Ok(result)
    }

    /// GET `url` and return its body, or `None` if the request failed.
    ///
    /// # Errors
    ///
    /// Construction errors still propagate.
    pub async fn get_text_or_none(&self, url: &str) -> Result<Option<String>> {
        let outcome = self
            .with_client(async |client: &ManagedClient| client.get_text(url).await)
            .await?;

        match outcome {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                error!(alias = %self.alias(), url = %url, error = %e, "Error during request");
                Ok(None)
            }
        }
    }
}

impl fmt::Debug for HttpConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpConnector")
            .field("alias", &self.config.client_alias)
            .field("stores", &self.stores)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::APPLICATION_NAME_HEADER;
    use crate::error::StoreKind;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};
    use tokio::net::TcpListener;
    use crate::mtls::{CaParams, CertGenerator, LeafCertParams};

    fn write_stores(dir: &std::path::Path, aliases: &[&str]) -> ConnectorConfig {
        let ca = CertGenerator::init_ca(&CaParams {
            cn: "Connector CA",
            validity_days: 7,
        })
        .unwrap();
        let leaves: Vec<_> = aliases
            .iter()
            .map(|a| {
                CertGenerator::issue_leaf(&LeafCertParams::client(a, 7), &ca.cert_pem, &ca.key_pem)
                    .unwrap()
            })
            .collect();
        let ids: Vec<_> = aliases.iter().copied().zip(leaves.iter()).collect();

        let ks = dir.join("keystore.p12");
        let ts = dir.join("truststore.p12");
        CertGenerator::write_keystore(&ks, &ids, "changeit").unwrap();
        CertGenerator::write_trust_store(&ts, &[("ca", &ca)], "changeit").unwrap();

        ConnectorConfig::new(aliases[0])
            .with_keystore(ks, Some("changeit"))
            .with_trust_store(ts, Some("changeit"))
    }

    #[test]
    fn new_rejects_missing_alias() {
        let err = HttpConnector::new(ConnectorConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn new_without_stores_builds_plain_client() {
        let connector = HttpConnector::new(ConnectorConfig::new("client1")).unwrap();
        let client = connector.create_client().unwrap();
        assert_eq!(client.alias(), "client1");
        assert!(!client.is_closed());
    }

    #[test]
    fn new_loads_stores_and_creates_clients() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_stores(dir.path(), &["client1", "client2"]);

        let connector = HttpConnector::new(config).unwrap();

        assert!(connector.create_client().is_ok());
    }

    #[test]
    fn unknown_alias_still_constructs() {
        // GIVEN: a keystore without the configured alias
        let dir = tempfile::tempdir().unwrap();
        let config = write_stores(dir.path(), &["client1"]).for_alias("other");

        // THEN: construction succeeds; the alias is unavailable at handshake
        let connector = HttpConnector::new(config).unwrap();
        assert!(connector.create_client().is_ok());
    }

    #[test]
    fn wrong_keystore_password_is_store_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_stores(dir.path(), &["client1"]);
        config.keystore_password = Some("wrong".to_owned());

        let err = HttpConnector::new(config).unwrap_err();

        assert!(matches!(
            err,
            Error::StoreLoad {
                kind: StoreKind::ClientKeystore,
                ..
            }
        ));
    }

    #[test]
    fn missing_trust_store_is_store_load_error() {
        let config = ConnectorConfig::new("client1").with_trust_store("/nonexistent.p12", None);
        let err = HttpConnector::new(config).unwrap_err();
        assert!(matches!(
            err,
            Error::StoreLoad {
                kind: StoreKind::TrustStore,
                ..
            }
        ));
    }

    #[test]
    fn shared_stores_serve_several_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_stores(dir.path(), &["client1", "client2"]);
        let stores = SharedStores::load(&config).unwrap();

        for alias in ["client1", "client2"] {
            let connector =
                HttpConnector::with_stores(config.for_alias(alias), stores.clone()).unwrap();
            assert_eq!(connector.alias(), alias);
        }
        // One keystore instance, shared
        assert_eq!(Arc::strong_count(stores.keystore.as_ref().unwrap()), 1);
    }

    #[tokio::test]
    async fn application_name_header_is_set_before_added_interceptors() {
        // GIVEN: an added interceptor that records whether the header is already there
        let saw_header = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&saw_header);
        let connector = HttpConnector::new(ConnectorConfig::new("client1"))
            .unwrap()
            .with_interceptor(move |req: &mut reqwest::Request| -> Result<()> {
                if !req.headers().contains_key(APPLICATION_NAME_HEADER) {
                    return Err(Error::Config("application name header missing".to_owned()));
                }
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });

        // WHEN: a request is sent to a closed port
        let result = connector
            .with_client(async |client: &ManagedClient| {
                client.get_text("https://127.0.0.1:9/").await
            })
            .await
            .unwrap();

        // THEN: the interceptor passed and only the network failed
        assert!(saw_header.load(Ordering::SeqCst));
        assert!(matches!(result, Err(Error::RequestExecution { .. })));
    }

    #[tokio::test]
    async fn with_client_releases_after_work() {
        let connector = HttpConnector::new(ConnectorConfig::new("client1")).unwrap();

        let seen_open = connector
            .with_client(async |client: &ManagedClient| !client.is_closed())
            .await
            .unwrap();

        assert!(seen_open);
    }

    #[tokio::test]
    async fn with_client_propagates_work_error_as_value() {
        let connector = HttpConnector::new(ConnectorConfig::new("client1")).unwrap();

        let result = connector
            .with_client(async |client: &ManagedClient| client.get_text("not a url").await)
            .await
            .unwrap();

        assert!(matches!(result, Err(Error::RequestExecution { .. })));
    }

    #[tokio::test]
    async fn request_to_silent_server_times_out() {
        // GIVEN: a listener that accepts connections and never answers
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        let config = ConnectorConfig {
            request_timeout_secs: 1,
            ..ConnectorConfig::new("client1")
        };
        let connector = HttpConnector::new(config).unwrap();

        // WHEN
        let started = Instant::now();
        let result = connector
            .with_client(async |client: &ManagedClient| {
                client.get_text(&format!("https://127.0.0.1:{port}/")).await
            })
            .await
            .unwrap();

        // THEN: the configured timeout fires, well before any OS default
        match result {
            Err(Error::RequestExecution { source, .. }) => {
                assert!(source.is_timeout(), "{source}");
            }
            other => panic!("expected a request error, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn get_text_or_none_degrades_request_errors() {
        let config = ConnectorConfig {
            request_timeout_secs: 2,
            ..ConnectorConfig::new("client1")
        };
        let connector = HttpConnector::new(config).unwrap();

        // Nothing listens on the discard port
        let body = connector.get_text_or_none("https://127.0.0.1:9/").await.unwrap();

        assert!(body.is_none());
    }
}
