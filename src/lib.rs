//! mTLS Connector Library
//!
//! HTTPS clients that each present one client certificate, chosen by alias
//! from a single shared PKCS#12 keystore, plus a demo endpoint that greets
//! the caller by certificate Common Name.
//!
//! # Features
//!
//! - **Alias-scoped identity**: a client built for alias `A` presents `A`'s
//!   certificate and never another alias's
//! - **Shared stores**: keystore and trust store are loaded once and shared
//!   between per-alias connectors
//! - **Scoped clients**: every client is released when its scope ends
//! - **Demo endpoint**: axum over rustls with client certificate verification
//! - **Certificate generation**: CA, server and combined client keystore

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod mtls;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
