//! # upwatchd
//!
//! Watches a third-party application's rotating log directory for
//! screen-capture events and broadcasts them to local subscribers over an
//! authenticated WebSocket, with a small HTTP health surface alongside.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use upwatch_server::app::{bind_first_available, build_router, candidate_ports, AppState};
use upwatch_server::websocket::ConnectionRegistry;
use upwatch_server::detection;

/// Quiescence window after cancellation, to let in-flight writes finish.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

const DEFAULT_CONFIG_PATH: &str = "upwatch.config.json";

#[derive(Parser, Debug)]
#[command(name = "upwatchd")]
#[command(about = "Watches for screen-capture events and broadcasts them over a local WebSocket")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "UPWATCH_CONFIG_PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory to watch for `upwork.*.log` files (overrides config and `UPWORK_LOGS_DIR`).
    #[arg(long, env = "UPWATCH_LOGS_DIR")]
    logs_dir: Option<PathBuf>,

    /// Enable the debug-only `/test/broadcast` endpoint (overrides config).
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upwatch_server=info,upwatch_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = upwatch_core::load_config(&args.config).unwrap_or_else(|err| {
        warn!(error = %err, "falling back to default configuration");
        upwatch_core::DaemonConfig::default()
    });

    if let Some(dir) = args.logs_dir {
        config.upwork_logs_dir = dir;
    }
    if args.debug {
        config.debug_mode = true;
    }

    if config.upwork_logs_dir.as_os_str().is_empty() {
        anyhow::bail!("no logs directory configured; set upworkLogsDir, UPWORK_LOGS_DIR, or --logs-dir");
    }
    if !config.upwork_logs_dir.is_dir() {
        anyhow::bail!(
            "configured logs directory {} does not exist",
            config.upwork_logs_dir.display()
        );
    }

    info!(
        logs_dir = %config.upwork_logs_dir.display(),
        debug_mode = config.debug_mode,
        "starting upwatchd"
    );

    let cancel = CancellationToken::new();
    let registry = ConnectionRegistry::new();

    let events = upwatch_core::tailer::spawn(config.upwork_logs_dir.clone(), cancel.clone());
    let detection_task = tokio::spawn(detection::run(events, registry.clone()));

    let state = AppState {
        registry,
        debug_mode: config.debug_mode,
    };
    let router = build_router(state);

    let listener = bind_first_available(&candidate_ports()).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "listening");

    let server_cancel = cancel.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await;
        if let Err(err) = result {
            error!(error = %err, "http server exited with error");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, cancelling root context");
    cancel.cancel();

    let _ = server_task.await;
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    detection_task.abort();

    info!("shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
