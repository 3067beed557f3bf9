//! booking-edge server
//!
//! Serves cached catalog reads and payment webhooks.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use booking_edge::app::AppContext;
use booking_edge::catalog::StaticCatalog;
use booking_edge::config::AppConfig;
use booking_edge::metrics::Metrics;
use booking_edge::webhook::LoggingHandler;
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// booking-edge server
#[derive(Parser, Debug)]
#[command(name = "booking-edge")]
#[command(author = "Booking Edge Team <team@booking-edge.dev>")]
#[command(version)]
#[command(about = "Versioned read cache and idempotent payment webhooks")]
struct Args {
    /// Port to listen on (overrides BOOKING_EDGE_PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides BOOKING_EDGE_HOST)
    #[arg(short = 'H', long)]
    host: Option<IpAddr>,

    /// Redis URL (overrides BOOKING_EDGE_REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,

    /// JSON file with the trip catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(args: &Args) {
    let default = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);
    Metrics::describe();

    let mut config = AppConfig::from_env().context("loading configuration")?;
    if let Some(host) = args.host {
        config.bind_addr.set_ip(host);
    }
    if let Some(port) = args.port {
        config.bind_addr.set_port(port);
    }
    if let Some(url) = args.redis_url.clone() {
        config.redis_url = Some(url);
    }

    let catalog = match &args.catalog {
        Some(path) => StaticCatalog::from_json_file(path)?,
        None => {
            tracing::warn!("No catalog file given, serving an empty catalog");
            StaticCatalog::default()
        }
    };

    let providers: Vec<&str> = config
        .webhook
        .enabled_providers()
        .into_iter()
        .map(|p| p.as_str())
        .collect();
    let addr: SocketAddr = config.bind_addr;

    let ctx = Arc::new(
        AppContext::connect(config, Arc::new(catalog), Arc::new(LoggingHandler)).await?,
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        %addr,
        backend = ctx.backend.backend_name(),
        webhook_providers = ?providers,
        "booking-edge listening"
    );

    axum::serve(listener, ctx.router())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    ctx.shutdown().await;
    Ok(())
}
