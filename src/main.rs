//! mTLS Connector - alias-scoped client certificates over one shared keystore

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_connector::{
    cli::{Cli, Command},
    config::Config,
    connector::{HttpConnector, SharedStores},
    mtls::{CaParams, CertGenerator, LeafCertParams},
    server::DemoServer,
    setup_tracing,
};

/// File names written by `gen-certs`.
const KEYSTORE_FILE: &str = "clients-combined-keystore.p12";
const TRUSTSTORE_FILE: &str = "clients-combined-truststore.p12";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Get { ref url, ref aliases }) => run_get(&cli, url, aliases).await,
        Some(Command::GenCerts {
            ref dir,
            ref aliases,
            ref password,
            ref server_dns,
            validity_days,
        }) => run_gen_certs(dir, aliases, password, server_dns, validity_days),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(config) => Some(config),
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// GET `url` once per alias, sharing one set of loaded stores.
async fn run_get(cli: &Cli, url: &str, aliases: &[String]) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let aliases = if aliases.is_empty() {
        vec![config.client.client_alias.clone()]
    } else {
        aliases.to_vec()
    };

    let stores = match SharedStores::load(&config.client) {
        Ok(stores) => stores,
        Err(e) => {
            error!("Failed to load key material: {e}");
            return ExitCode::FAILURE;
        }
    };

    for alias in &aliases {
        let connector =
            match HttpConnector::with_stores(config.client.for_alias(alias), stores.clone()) {
                Ok(connector) => connector,
                Err(e) => {
                    error!(alias = %alias, "Failed to create connector: {e}");
                    return ExitCode::FAILURE;
                }
            };

        match connector.get_text_or_none(url).await {
            Ok(body) => println!(
                "#### Client {alias}: {}",
                body.as_deref().unwrap_or("<none>")
            ),
            Err(e) => {
                error!(alias = %alias, "Failed to create HTTP client: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}

/// Write a CA, a server certificate and the combined client stores to `dir`.
fn run_gen_certs(
    dir: &Path,
    aliases: &[String],
    password: &str,
    server_dns: &[String],
    validity_days: u32,
) -> ExitCode {
    match gen_certs(dir, aliases, password, server_dns, validity_days) {
        Ok(()) => {
            println!("Certificates written to {}", dir.display());
            println!("  ca.crt, ca.key");
            println!("  server.crt, server.key");
            println!("  {KEYSTORE_FILE} (aliases: {})", aliases.join(", "));
            println!("  {TRUSTSTORE_FILE}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Certificate generation failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn gen_certs(
    dir: &Path,
    aliases: &[String],
    password: &str,
    server_dns: &[String],
    validity_days: u32,
) -> mtls_connector::Result<()> {
    let ca = CertGenerator::init_ca(&CaParams {
        cn: "mtls-connector Demo CA",
        validity_days,
    })?;
    CertGenerator::write_to_dir(&ca, dir, "ca")?;

    let server_cn = server_dns.first().map_or("localhost", String::as_str);
    let server = CertGenerator::issue_leaf(
        &LeafCertParams::server(
            server_cn,
            server_dns.to_vec(),
            vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)],
            validity_days,
        ),
        &ca.cert_pem,
        &ca.key_pem,
    )?;
    CertGenerator::write_to_dir(&server, dir, "server")?;

    let clients = aliases
        .iter()
        .map(|alias| {
            CertGenerator::issue_leaf(
                &LeafCertParams::client(alias, validity_days),
                &ca.cert_pem,
                &ca.key_pem,
            )
        })
        .collect::<mtls_connector::Result<Vec<_>>>()?;
    let identities: Vec<_> = aliases.iter().map(String::as_str).zip(&clients).collect();

    CertGenerator::write_keystore(&dir.join(KEYSTORE_FILE), &identities, password)?;
    CertGenerator::write_trust_store(&dir.join(TRUSTSTORE_FILE), &[("ca", &ca)], password)?;

    info!(dir = %dir.display(), clients = aliases.len(), "Certificates generated");
    Ok(())
}

async fn run_server(cli: &Cli) -> ExitCode {
    let Some(mut config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    // Apply CLI overrides
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host.clone_from(host);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting demo endpoint"
    );

    let server = match DemoServer::new(&config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
