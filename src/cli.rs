//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Mutual-TLS demo: alias-scoped client certificates over one shared keystore
#[derive(Parser, Debug)]
#[command(name = "mtls-connector")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MTLS_CONNECTOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "MTLS_CONNECTOR_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "MTLS_CONNECTOR_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MTLS_CONNECTOR_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_CONNECTOR_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the demo mTLS endpoint (default)
    Serve,

    /// GET a URL once per alias, each with its own client certificate
    Get {
        /// Target URL
        #[arg(required = true)]
        url: String,

        /// Alias to present; repeat for several (default: configured alias)
        #[arg(short, long = "alias")]
        aliases: Vec<String>,
    },

    /// Generate a CA, a server certificate and a combined client keystore
    GenCerts {
        /// Output directory
        #[arg(short, long, default_value = "certs")]
        dir: PathBuf,

        /// Client aliases, one certificate each
        #[arg(
            long,
            value_delimiter = ',',
            default_value = "client1,client2,client3,client4"
        )]
        aliases: Vec<String>,

        /// Password of the generated PKCS#12 files
        #[arg(long, default_value = "changeit", env = "MTLS_CONNECTOR_STORE_PASSWORD")]
        password: String,

        /// DNS names of the server certificate
        #[arg(long, value_delimiter = ',', default_value = "localhost")]
        server_dns: Vec<String>,

        /// Validity of every certificate, in days
        #[arg(long, default_value_t = 365)]
        validity_days: u32,
    },
}
