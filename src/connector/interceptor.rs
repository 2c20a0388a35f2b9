//! Request interceptors applied to every outbound request.

use reqwest::Request;
use reqwest::header::{HeaderName, HeaderValue};

use crate::{Error, Result};

/// Mutates a request before it is sent.
///
/// Interceptors run in registration order. An error aborts the request.
pub trait RequestInterceptor: Send + Sync {
    /// Inspect or modify `request`.
    ///
    /// # Errors
    ///
    /// Any error stops the request from being sent.
    fn intercept(&self, request: &mut Request) -> Result<()>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(&mut Request) -> Result<()> + Send + Sync,
{
    fn intercept(&self, request: &mut Request) -> Result<()> {
        self(request)
    }
}

/// Appends [`APPLICATION_NAME_HEADER`](crate::config::APPLICATION_NAME_HEADER)
/// to every request.
#[derive(Debug, Clone)]
pub struct ApplicationNameHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl ApplicationNameHeader {
    /// Header carrying `application_name`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the name is not a valid header value.
    pub fn new(application_name: &str) -> Result<Self> {
        let value = HeaderValue::from_str(application_name).map_err(|e| {
            Error::Config(format!(
                "Invalid application_name '{application_name}': {e}"
            ))
        })?;
        Ok(Self {
            name: HeaderName::from_static("x-applicationname"),
            value,
        })
    }
}

impl RequestInterceptor for ApplicationNameHeader {
    fn intercept(&self, request: &mut Request) -> Result<()> {
        request
            .headers_mut()
            .append(self.name.clone(), self.value.clone());
        Ok(())
    }
}
