use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderName;
use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatekeeper::admission::{start_sweep_loop, RequestAdmissionTracker, SystemClock};
use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::{AdmissionState, HttpServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Per-identity request admission for HTTP services")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address from configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen_addr = listen;
    }
    let (policies, sweep_settings) = config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        authenticated_limit = policies.authenticated.limit(),
        authenticated_window = ?policies.authenticated.window(),
        anonymous_limit = policies.anonymous.limit(),
        anonymous_window = ?policies.anonymous.window(),
        "Configuration loaded"
    );

    let tracker = Arc::new(RequestAdmissionTracker::new());
    let clock = Arc::new(SystemClock);
    let sweeper = start_sweep_loop(tracker.clone(), clock.clone(), sweep_settings);

    let mut state = AdmissionState::new(tracker, policies, clock)
        .with_trust_forwarded_for(config.server.trust_forwarded_for);
    if let Some(header) = &config.server.user_id_header {
        state = state.with_user_id_header(HeaderName::try_from(header.as_str())?);
    }

    let server = HttpServer::new(config.server.listen_addr, state);
    let result = server.serve_with_shutdown(shutdown_signal()).await;

    sweeper.stop().await;
    result?;

    info!("Gatekeeper stopped");
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
