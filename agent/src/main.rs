//! OrbitSync Node - one instance of the shared orbital clock
//!
//! This binary wires the orbitsync core into a running process:
//! - Loads the JSON instance configuration
//! - Resumes the simulated clock from the sled snapshot
//! - Serves positions, time and scale commands over HTTP
//! - Saves and publishes the final simulated time on Ctrl-C, SIGTERM or `POST /stop`

use anyhow::{Context, Result};
use clap::Parser;
use orbitsync_core::{Instance, InstanceConfig, SnapshotBackend};
use orbitsync_env::{HttpTransport, InstanceId, TokioContext};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod http;

use http::NodeInstance;

/// OrbitSync instance server
#[derive(Parser, Debug)]
#[command(name = "orbitsync-node")]
#[command(about = "Serve a simulated orbital clock shared with sibling instances", long_about = None)]
struct Args {
    /// Path to the JSON instance configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let mut config = InstanceConfig::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let local_id = InstanceId::new();
    let transport = Arc::new(HttpTransport::new(local_id, config.peer_timeout())?);
    // An unopenable store is logged and the node starts from a fresh epoch
    let store = Arc::new(SnapshotBackend::open(&config.store_path));
    let instance: Arc<NodeInstance> = Arc::new(Instance::new(&config, TokioContext::shared(), transport, store)?);

    instance.start()?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(
        name = %config.name,
        id = %local_id,
        listen = %config.listen,
        siblings = config.siblings.len(),
        "OrbitSync node ready"
    );

    // Signals go through the same stop() as POST /stop
    let signal_instance = Arc::clone(&instance);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Termination signal received");
        if let Err(e) = signal_instance.stop().await {
            warn!(error = %e, "Stop after signal failed");
        }
    });

    let app = http::router(Arc::clone(&instance));
    let stopped = Arc::clone(&instance);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { stopped.stopped().await })
        .await
        .context("HTTP server failed")?;

    info!("OrbitSync node exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
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
}
