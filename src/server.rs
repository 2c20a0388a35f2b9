//! Demo mTLS endpoint.
//!
//! Serves `GET /` over TLS and greets the authenticated client by the Common
//! Name of its certificate. The verified peer certificate is captured by a
//! custom acceptor and handed to handlers as a request extension.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::middleware::AddExtension;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum_server::Handle;
use axum_server::accept::{Accept, DefaultAcceptor};
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal;
use tokio_rustls::server::TlsStream;
use tower::Layer;
use tracing::{info, warn};

use crate::config::Config;
use crate::mtls::{CertIdentity, build_tls_config};
use crate::{Error, Result};

/// How long in-flight requests may take to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Identity of the TLS peer, if it presented a certificate.
#[derive(Debug, Clone, Default)]
pub struct PeerIdentity(pub Option<CertIdentity>);

impl PeerIdentity {
    fn from_connection(conn: &rustls::ServerConnection) -> Self {
        let identity = conn
            .peer_certificates()
            .and_then(|chain| chain.first())
            .and_then(|leaf| match CertIdentity::from_der(leaf.as_ref()) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    warn!(error = %e, "Unparseable peer certificate");
                    None
                }
            });
        Self(identity)
    }
}

/// Greeting for `principal` at `now`.
pub fn greeting(principal: &str, now: DateTime<Utc>) -> String {
    format!(
        "Hello {} for client={principal}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

async fn greet(Extension(peer): Extension<PeerIdentity>) -> Response {
    let Some(identity) = peer.0 else {
        warn!("Request without client certificate rejected");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    };

    let principal = identity.principal_name();
    info!(principal = %principal, subject = %identity.subject, "Authenticated client request");
    greeting(principal, Utc::now()).into_response()
}

/// Routes of the demo endpoint.
pub fn router() -> Router {
    Router::new().route("/", get(greet))
}

/// Acceptor that completes the TLS handshake, then records the peer
/// certificate on every request of the connection.
#[derive(Clone)]
struct PeerCertAcceptor {
    inner: RustlsAcceptor<DefaultAcceptor>,
}

impl<I, S> Accept<I, S> for PeerCertAcceptor
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    S: Send + 'static,
{
    type Stream = TlsStream<I>;
    type Service = AddExtension<S, PeerIdentity>;
    type Future = BoxFuture<'static, io::Result<(Self::Stream, Self::Service)>>;

    fn accept(&self, stream: I, service: S) -> Self::Future {
        let acceptor = self.inner.clone();
        Box::pin(async move {
            let (stream, service) = acceptor.accept(stream, service).await?;
            let peer = PeerIdentity::from_connection(stream.get_ref().1);
            Ok((stream, Extension(peer).layer(service)))
        })
    }
}

/// The demo HTTPS server.
pub struct DemoServer {
    addr: SocketAddr,
    tls: Arc<rustls::ServerConfig>,
    require_client_cert: bool,
}

impl DemoServer {
    /// Resolve the listen address and build the TLS context.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the host is invalid or the certificate
    /// files cannot be loaded.
    pub fn new(config: &Config) -> Result<Self> {
        let addr = SocketAddr::new(
            config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            config.server.port,
        );

        Ok(Self {
            addr,
            tls: Arc::new(build_tls_config(&config.mtls)?),
            require_client_cert: config.mtls.require_client_cert,
        })
    }

    /// Serve until Ctrl-C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run(self) -> Result<()> {
        let handle = Handle::new();
        tokio::spawn(shutdown_signal(handle.clone()));
        self.run_with_handle(handle).await
    }

    /// Serve until `handle` is shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn run_with_handle(self, handle: Handle<SocketAddr>) -> Result<()> {
        let acceptor = PeerCertAcceptor {
            inner: RustlsAcceptor::new(RustlsConfig::from_config(self.tls)),
        };

        info!(
            addr = %self.addr,
            require_client_cert = self.require_client_cert,
            "Demo endpoint listening"
        );

        axum_server::bind(self.addr)
            .acceptor(acceptor)
            .handle(handle)
            .serve(router().into_make_service())
            .await?;

        info!("Demo endpoint stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn greeting_names_principal_and_time() {
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(
            greeting("client2", now),
            "Hello 2026-01-02T03:04:05.000Z for client=client2"
        );
    }

    #[tokio::test]
    async fn greet_without_certificate_is_unauthorized() {
        let response = greet(Extension(PeerIdentity::default())).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn greet_with_certificate_is_ok() {
        let identity = CertIdentity {
            subject: "CN=client1".to_owned(),
            common_name: Some("client1".to_owned()),
            ..CertIdentity::default()
        };
        let response = greet(Extension(PeerIdentity(Some(identity)))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn new_without_certificate_files_is_config_error() {
        let err = DemoServer::new(&Config::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn new_rejects_invalid_host() {
        let mut config = Config::default();
        config.server.host = "not-an-ip".to_owned();
        assert!(DemoServer::new(&config).is_err());
    }
}
