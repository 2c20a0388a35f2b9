//! A configured HTTP client with an explicit release.

use std::fmt;
use std::sync::Arc;

use reqwest::{Method, Request, Response};
use tracing::debug;

use crate::connector::interceptor::RequestInterceptor;
use crate::{Error, Result};

/// HTTP client bound to one alias.
///
/// Released by [`close`](Self::close) or on drop, whichever comes first.
/// Requests after release fail with [`Error::ClientClosed`].
pub struct ManagedClient {
    alias: String,
    inner: Option<reqwest::Client>,
    interceptors: Arc<[Arc<dyn RequestInterceptor>]>,
}

impl ManagedClient {
    pub(crate) fn new(
        alias: String,
        client: reqwest::Client,
        interceptors: Arc<[Arc<dyn RequestInterceptor>]>,
    ) -> Self {
        Self {
            alias,
            inner: Some(client),
            interceptors,
        }
    }

    /// Alias whose certificate this client presents.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// `true` once the client has been released.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::ClientClosed(self.alias.clone()))
    }

    fn request_error(&self, source: reqwest::Error) -> Error {
        Error::RequestExecution {
            alias: self.alias.clone(),
            source,
        }
    }

    /// Build a request for `url` without sending it.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClientClosed` after release, or `Error::RequestExecution`
    /// if `url` is invalid.
    pub fn request(&self, method: Method, url: &str) -> Result<Request> {
        self.client()?
            .request(method, url)
            .build()
            .map_err(|e| self.request_error(e))
    }

    /// Run the interceptors over `request` and send it.
    ///
    /// Any response status is returned as-is.
    ///
    /// # Errors
    ///
    /// Returns `Error::ClientClosed` after release, an interceptor's error, or
    /// `Error::RequestExecution` on network, TLS or timeout failure.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let client = self.client()?;
        for interceptor in self.interceptors.iter() {
            interceptor.intercept(&mut request)?;
        }

        debug!(
            alias = %self.alias,
            method = %request.method(),
            url = %request.url(),
            "Sending request"
        );

        client
            .execute(request)
            .await
            .map_err(|e| self.request_error(e))
    }

    /// GET `url` and return the body as text, whatever the status.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute); reading the body can also fail with
    /// `Error::RequestExecution`.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let request = self.request(Method::GET, url)?;
        let response = self.execute(request).await?;
        debug!(alias = %self.alias, status = %response.status(), "Response received");
        response.text().await.map_err(|e| self.request_error(e))
    }

    /// Release the client and its pooled connections.
    ///
    /// Returns `false` if it was already released.
    pub fn close(&mut self) -> bool {
        match self.inner.take() {
            Some(client) => {
                drop(client);
                debug!(alias = %self.alias, "HTTP client closed");
                true
            }
            None => false,
        }
    }
}

impl Drop for ManagedClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ManagedClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedClient")
            .field("alias", &self.alias)
            .field("closed", &self.is_closed())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
