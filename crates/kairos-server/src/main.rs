//! Kairos graphics server binary.
//!
//! Boot order: logging, config, core assembly, listeners, render thread.
//! Termination signals raise the shutdown flag; the render thread finishes
//! its frame, sessions drop with reason "Server shutdown", and the process
//! exits 0. Bind or GPU-init failures exit 1.

use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

use kairos_server::config;
use kairos_server::render::RecordingBackend;
use kairos_server::server::ServerCore;

const DEFAULT_CONFIG_PATH: &str = "kairos.yaml";

#[tokio::main]
async fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config_path =
        std::env::var("KAIROS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let cfg = if std::path::Path::new(&config_path).exists() {
        match config::load_from_file(&config_path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(path = %config_path, error = %e, "config load failed");
                return ExitCode::FAILURE;
            }
        }
    } else {
        tracing::info!(path = %config_path, "no config file, using defaults");
        config::ServerConfig::default()
    };

    let core = match ServerCore::new(cfg) {
        Ok(core) => core,
        Err(e) => {
            tracing::error!(error = %e, "server core init failed");
            return ExitCode::FAILURE;
        }
    };

    let listener_handles = match core.start_listeners().await {
        Ok(handles) => handles,
        Err(e) => {
            tracing::error!(error = %e, "listener start failed");
            return ExitCode::FAILURE;
        }
    };

    // The windowed GPU backend plugs in here; headless operation records
    // draws and composites nothing.
    let render_thread = core.start_render_thread(Box::new(RecordingBackend::new()));

    tracing::info!("kairos-server running");

    let mut status_tick = tokio::time::interval(Duration::from_secs(30));
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                core.request_shutdown("termination signal");
                break;
            }
            _ = terminate_signal() => {
                core.request_shutdown("termination signal");
                break;
            }
            _ = status_tick.tick() => {
                tracing::info!(status = %core.status_line(), "periodic status");
            }
        }
    }

    for handle in listener_handles {
        handle.abort();
    }
    if render_thread.join().is_err() {
        tracing::error!("render thread panicked during shutdown");
        return ExitCode::FAILURE;
    }

    tracing::info!(metrics = %core.render_metrics(), "final metrics");
    tracing::info!("shutdown complete");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn terminate_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    // SIGPIPE is ignored by default in Rust; only SIGTERM needs wiring.
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            term.recv().await;
        }
        Err(_) => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn terminate_signal() {
    std::future::pending().await
}
