//! gRPC-Web proxy server.
//!
//! ```text
//! grpcweb --target http://localhost:9090 --listen 8080
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use grpcweb_proxy::{ProxyConfig, ProxyError, ProxyServer};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grpcweb")]
#[command(about = "Translate gRPC-Web requests into gRPC calls", long_about = None)]
#[command(version)]
struct Cli {
    /// Address of the gRPC server (host:port or http://host:port)
    #[arg(long)]
    target: Option<String>,

    /// Port (or host:port) to accept gRPC-Web requests on
    #[arg(long)]
    listen: Option<String>,

    /// Allowed CORS origin (defaults to any)
    #[arg(long)]
    origin: Option<String>,

    /// Extra response headers exposed to browsers, comma-separated or repeated
    #[arg(long)]
    headers: Vec<String>,

    /// JSON configuration file; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,

    /// Per-request channel capacity
    #[arg(long)]
    buffer: Option<usize>,
}

impl Cli {
    fn into_config(self) -> Result<ProxyConfig> {
        let base = match &self.config {
            Some(path) => ProxyConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ProxyConfig::default(),
        };
        Ok(base.merge(ProxyConfig {
            target: self.target,
            listen: self.listen,
            origin: self.origin,
            headers: self.headers,
            buffer: self.buffer,
        }))
    }
}

async fn run(config: ProxyConfig) -> Result<()> {
    let addr = config.listen_addr()?;
    let server = ProxyServer::from_config(&config)?;
    info!(upstream = config.target.as_deref().unwrap_or_default(), "proxying gRPC-Web");
    server.serve(addr).await.context("proxy server stopped")
}

fn die(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => die(format!("Error: {:#}", e)),
    };
    if let Err(ProxyError::Configuration(message)) = config.validate() {
        die(message);
    }

    if let Err(e) = run(config).await {
        die(format!("Error: {:#}", e));
    }
}
