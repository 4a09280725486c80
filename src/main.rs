//! shard-proxy
//!
//! A sharded reverse proxy built with Tokio, Axum and reqwest.
//!
//! # Architecture Overview
//!
//! ```text
//!   client ──▶ admission gate ──▶ location router ──┬──▶ static files
//!                (429 on overload)                   │
//!                                                    └──▶ dispatch queue
//!                                                           │ round robin
//!                                        ┌──────────────────┼──────────────────┐
//!                                        ▼                  ▼                  ▼
//!                                     shard 0            shard 1    ...     shard N
//!                                  (own client,       (own client,       (own client,
//!                                   own cursors)       own cursors)       own cursors)
//!                                        │                  │                  │
//!                                        └──────────▶ upstream groups ◀────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use shard_proxy::config::load_or_init;
use shard_proxy::http::HttpServer;
use shard_proxy::lifecycle::{signals::spawn_signal_listener, Shutdown};
use shard_proxy::observability::{logging::init_logging, metrics::init_metrics};

#[derive(Parser)]
#[command(name = "shard-proxy")]
#[command(about = "Sharded HTTP reverse proxy and load balancer", long_about = None)]
struct Cli {
    /// Path to the TOML configuration; created with defaults when missing.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let existed = cli.config.exists();
    let config = Arc::new(load_or_init(&cli.config)?);
    init_logging(&config.observability);

    if !existed {
        tracing::warn!(path = %cli.config.display(), "No configuration found, wrote defaults");
    }
    tracing::info!(
        path = %cli.config.display(),
        bind_address = %config.server.bind_address,
        shards = config.shard_count,
        algorithm = %config.load_balancing_alg,
        locations = config.locations.len(),
        "Configuration loaded"
    );

    if cli.check {
        tracing::info!("Configuration is valid");
        return Ok(());
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = HttpServer::new(config.clone())?;

    let listener = TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Arc::new(Shutdown::new());
    spawn_signal_listener(shutdown.clone());

    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
