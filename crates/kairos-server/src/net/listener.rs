//! Transport listeners: accept connections and hand them to sessions.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use kairos_proto::{KairosError, Result};

use crate::server::ServerCore;

use super::registry::Transport;
use super::session::run_session;

/// Bind every enabled transport and spawn its accept loop. Bind failures
/// are fatal: the caller exits with status 1.
pub async fn spawn_listeners(core: &Arc<ServerCore>) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();
    let cfg = &core.config.network;

    if cfg.enable_tcp {
        let addr = format!("{}:{}", cfg.bind_address, cfg.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| KairosError::Fatal(format!("tcp bind {addr}: {e}")))?;
        tracing::info!(%addr, "tcp listener started");
        handles.push(tokio::spawn(tcp_accept_loop(Arc::clone(core), listener)));
    }

    if cfg.enable_local {
        match bind_local(core) {
            Ok(Some(handle)) => handles.push(handle),
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(handles)
}

#[cfg(unix)]
fn bind_local(core: &Arc<ServerCore>) -> Result<Option<JoinHandle<()>>> {
    use tokio::net::UnixListener;

    let cfg = &core.config.network;
    let path = cfg.local_socket_path.clone();

    if cfg.auto_remove_socket && std::path::Path::new(&path).exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            return Err(KairosError::Fatal(format!("unlink stale socket {path}: {e}")));
        }
    }

    let listener = UnixListener::bind(&path)
        .map_err(|e| KairosError::Fatal(format!("local bind {path}: {e}")))?;
    tracing::info!(%path, "local listener started");
    Ok(Some(tokio::spawn(unix_accept_loop(Arc::clone(core), listener, path))))
}

#[cfg(not(unix))]
fn bind_local(_core: &Arc<ServerCore>) -> Result<Option<JoinHandle<()>>> {
    tracing::warn!("local stream sockets unavailable on this platform, skipping");
    Ok(None)
}

async fn tcp_accept_loop(core: Arc<ServerCore>, listener: TcpListener) {
    let mut shutdown_rx = core.shutdown_rx();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let peer_key = addr.ip().to_string();
                        let peer_label = addr.to_string();
                        if core.config.network.enable_nodelay {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(error = %e, "set_nodelay failed");
                            }
                        }
                        admit_and_spawn(&core, stream, Transport::Tcp, peer_key, peer_label);
                    }
                    Err(e) => {
                        // Transient accept errors (EAGAIN/EINTR/EMFILE churn)
                        // are counted and the loop continues.
                        core.metrics.sessions_rejected.inc(&[("reason", "error")]);
                        tracing::debug!(error = %e, "tcp accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("tcp accept loop stopping");
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn unix_accept_loop(core: Arc<ServerCore>, listener: tokio::net::UnixListener, path: String) {
    let mut shutdown_rx = core.shutdown_rx();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        admit_and_spawn(
                            &core,
                            stream,
                            Transport::Local,
                            path.clone(),
                            path.clone(),
                        );
                    }
                    Err(e) => {
                        core.metrics.sessions_rejected.inc(&[("reason", "error")]);
                        tracing::debug!(error = %e, "local accept failed");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::info!("local accept loop stopping");
                let _ = std::fs::remove_file(&path);
                return;
            }
        }
    }
}

fn admit_and_spawn<S>(
    core: &Arc<ServerCore>,
    stream: S,
    transport: Transport,
    peer_key: String,
    peer_label: String,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let cfg = &core.config.network;
    match core
        .registry
        .admit(&peer_key, cfg.max_clients, cfg.max_per_peer)
    {
        Ok(admission) => {
            let core = Arc::clone(core);
            tokio::spawn(async move {
                run_session(core, stream, transport, peer_key, peer_label, admission).await;
            });
        }
        Err(e) => {
            // Reject immediately: dropping the stream closes it. The peer
            // is not authenticated yet, so no ERROR_RESPONSE goes out.
            let reason = if e.to_string().contains("per-peer") {
                "peer_capacity"
            } else {
                "capacity"
            };
            core.metrics.sessions_rejected.inc(&[("reason", reason)]);
            tracing::info!(peer = %peer_label, reason, "connection rejected");
        }
    }
}
