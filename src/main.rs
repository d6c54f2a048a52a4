//! Chat Relay - Entry Point
//!
//! Loads configuration, starts the ChatServer, and shuts it down on Ctrl-C.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatServer, Config, Framing};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum simultaneous clients
    #[arg(short, long)]
    max_clients: Option<usize>,

    /// Idle timeout in seconds before a liveness probe
    #[arg(long)]
    idle_timeout: Option<u64>,

    /// Wire framing: raw (no delimiter) or line
    #[arg(long)]
    framing: Option<Framing>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<Config, chat_relay::ChatError> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(idle_timeout) = self.idle_timeout {
            config.idle_timeout_secs = idle_timeout;
        }
        if let Some(framing) = self.framing {
            config.framing = framing;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if self.verbose {
            config.log_level = "debug".to_string();
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Args::parse().into_config()?;

    // Use RUST_LOG env var to override, e.g. RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("chat_relay={}", config.log_level))),
        )
        .init();

    info!("Starting chat relay v{}", env!("CARGO_PKG_VERSION"));

    let server = ChatServer::bind(config).await?;

    let stats = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!(
        "Shutdown complete ({} total, {} peak)",
        stats.total_connections, stats.peak_concurrent
    );
    Ok(())
}
