//! Agent platform API gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────────┐
//!                     │                       GATEWAY                            │
//!                     │                                                          │
//!   Client Request    │  ┌──────────┐   ┌─────────┐   ┌────────────┐   ┌───────┐ │
//!   ──────────────────┼─▶│   auth   │──▶│ breaker │──▶│ rate limit │──▶│ proxy │─┼──▶ ams
//!                     │  └──────────┘   └─────────┘   └────────────┘   └───┬───┘ │    letta
//!                     │                                                    │     │    litellm
//!   Client Response   │              buffered body or SSE relay            │     │
//!   ◀─────────────────┼────────────────────────────────────────────────────┘     │
//!                     │                                                          │
//!                     │  ┌──────────────────────┐  ┌────────────────────────────┐│
//!                     │  │   resilience store   │  │ health / admin / metrics   ││
//!                     │  │   memory | redis     │  │ logging / shutdown         ││
//!                     │  └──────────────────────┘  └────────────────────────────┘│
//!                     └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use agent_gateway::config::{load_config, load_config_str};
use agent_gateway::lifecycle::{wait_for_signal, Shutdown};
use agent_gateway::observability::{logging, metrics};
use agent_gateway::{store, HttpServer};

#[derive(Parser)]
#[command(name = "agent-gateway")]
#[command(about = "API gateway for the agent platform services", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Without a file every section takes its defaults; secrets come from env.
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_config_str("")?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "agent-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstreams = config.upstreams.len(),
        store = ?config.store.backend,
        rate_limit = config.rate_limit.enabled,
        circuit_breaker = config.circuit_breaker.enabled,
        "Configuration loaded"
    );

    let prometheus = if config.observability.metrics_enabled {
        Some(metrics::init_metrics()?)
    } else {
        None
    };

    let store = store::connect(&config.store)?;
    if let Err(e) = store.ping().await {
        // Components fail open, so an unreachable store is not fatal.
        tracing::warn!(backend = store.backend(), error = %e, "Resilience store unreachable at startup");
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config, store, prometheus)?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    tokio::spawn(wait_for_signal(shutdown));

    server.run(listener, receiver).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
