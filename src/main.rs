use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::server::HttpServer;

/// Sliding window rate limiting service.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "GATEKEEPER_CONFIG")]
    config: Option<PathBuf>,

    /// Address for the HTTP server
    #[arg(long)]
    http_addr: Option<SocketAddr>,

    /// Shared counter store URL; without it limits are enforced per instance
    #[arg(long, env = "GATEKEEPER_REDIS_URL")]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatekeeper Rate Limiting Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(cli.config.as_deref())?;
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }
    if let Some(url) = cli.redis_url {
        config.rate_limiting.redis_url = Some(url);
    }
    info!(http_addr = %config.server.http_addr, "Configuration loaded");

    // Policies are validated and the counter backend chosen here, once
    let rate_limiter = Arc::new(config.rate_limiting.build_limiter()?);
    info!(
        backend = rate_limiter.backend_kind(),
        policies = rate_limiter.registry().len(),
        "Rate limiter initialized"
    );

    let server = HttpServer::new(config.server.http_addr, rate_limiter);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Gatekeeper Rate Limiting Service stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
