//! Per-connection session: handshake, frame pump, keep-alive, rate limit.
//!
//! One task per accepted transport; the task owns the socket exclusively.
//! All outbound traffic funnels through the session's mpsc channel so the
//! writer has a single owner, and broadcasts from other threads use the
//! same channel lossily.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::interval_at;
use tracing::Instrument;

use kairos_proto::payload::{
    ClientHello, ErrorResponseData, FontTextureData, PingData, PongData, ServerHello,
    SetColorData, SetFontSizeData,
};
use kairos_proto::types::{caps, limits};
use kairos_proto::wire::{self, Frame, MessageHeader, MessageType};
use kairos_proto::{ErrorCode, KairosError, Result};

use crate::command::{self, GcRegistry, Priority};
use crate::render::resources::PendingUpload;
use crate::server::ServerCore;

use super::rate::SlidingWindow;
use super::registry::{AdmissionGuard, SessionEntry, Transport};

/// Hard send failures tolerated before the session moves to Error.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
/// Outbound channel depth, frames. Broadcast producers drop on overflow.
const OUTBOUND_DEPTH: usize = 256;
/// Largest atlas dimension a client may upload.
const MAX_ATLAS_DIM: u32 = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshake,
    Connected,
    Disconnecting,
    Disconnected,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Handshake => "handshake",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

/// RAII guard tearing down registry entries when the task exits, however
/// it exits.
struct SessionCleanup {
    core: Arc<ServerCore>,
    client_id: u32,
    transport: Transport,
    _admission: AdmissionGuard,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        self.core.registry.unregister(self.client_id);
        self.core
            .metrics
            .sessions_active
            .dec(&[("transport", self.transport.as_str())]);
        tracing::debug!(client_id = self.client_id, "session cleanup done");
    }
}

struct Session {
    core: Arc<ServerCore>,
    client_id: u32,
    state: SessionState,
    gc: GcRegistry,
    rate: SlidingWindow,
    out_tx: mpsc::Sender<Bytes>,
    last_activity: Instant,
    last_ping_sent: Option<Instant>,
    ping_sequence: u32,
    latency_ms: f64,
    consecutive_errors: u32,
    last_rate_report: Option<Instant>,
    last_sequence: u32,
}

pub async fn run_session<S>(
    core: Arc<ServerCore>,
    stream: S,
    transport: Transport,
    peer_key: String,
    peer_label: String,
    admission: AdmissionGuard,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let client_id = core.registry.next_client_id();
    let span = tracing::info_span!("session", client_id, peer = %peer_label);

    let (out_tx, out_rx) = mpsc::channel::<Bytes>(OUTBOUND_DEPTH);
    let entry = Arc::new(SessionEntry {
        client_id,
        transport,
        peer_key,
        outbound: out_tx.clone(),
        capabilities: Default::default(),
    });
    core.registry.register(Arc::clone(&entry));
    core.metrics
        .sessions_active
        .inc(&[("transport", transport.as_str())]);
    core.metrics
        .sessions_total
        .inc(&[("transport", transport.as_str())]);
    let _cleanup = SessionCleanup {
        core: Arc::clone(&core),
        client_id,
        transport,
        _admission: admission,
    };

    let rate_ceiling = core
        .config
        .network
        .rate_limit_per_second
        .min(limits::MAX_COMMANDS_PER_SECOND);
    let mut session = Session {
        core: Arc::clone(&core),
        client_id,
        state: SessionState::Connecting,
        gc: GcRegistry::default(),
        rate: SlidingWindow::new(rate_ceiling),
        out_tx,
        last_activity: Instant::now(),
        last_ping_sent: None,
        ping_sequence: 0,
        latency_ms: 0.0,
        consecutive_errors: 0,
        last_rate_report: None,
        last_sequence: 0,
    };

    let reason = session.drive(stream, out_rx, &entry).instrument(span.clone()).await;
    session.state = SessionState::Disconnected;
    let _enter = span.enter();
    tracing::info!(reason = %reason, "session closed");
}

impl Session {
    /// Full session lifecycle; returns the disconnect reason.
    async fn drive<S>(
        &mut self,
        stream: S,
        mut out_rx: mpsc::Receiver<Bytes>,
        entry: &SessionEntry,
    ) -> String
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let cfg = self.core.config.network.clone();
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut recv_buf = BytesMut::with_capacity(cfg.receive_buffer_size.min(64 * 1024));

        self.state = SessionState::Handshake;
        let handshake = tokio::time::timeout(
            Duration::from_millis(cfg.handshake_timeout_ms),
            self.await_hello(&mut reader, &mut recv_buf),
        )
        .await;
        let hello = match handshake {
            Ok(Ok(hello)) => hello,
            Ok(Err(e)) => {
                self.core
                    .metrics
                    .decode_errors
                    .inc(&[("kind", e.kind())]);
                self.state = SessionState::Error;
                return format!("handshake failed: {e}");
            }
            Err(_) => {
                self.core
                    .metrics
                    .sessions_rejected
                    .inc(&[("reason", "timeout")]);
                return "handshake timeout".into();
            }
        };

        let negotiated = hello.capabilities & caps::SERVER_DEFAULT;
        entry.capabilities.store(negotiated, Ordering::Relaxed);
        let server_hello = ServerHello {
            server_version: wire::PROTOCOL_VERSION,
            max_clients: cfg.max_clients,
            assigned_client_id: self.client_id,
            server_capabilities: caps::SERVER_DEFAULT,
            max_layers: self.core.config.renderer.max_layers,
        };
        let payload = server_hello.encode();
        let header = MessageHeader::new(
            MessageType::ServerHello,
            self.client_id,
            0,
            payload.len() as u32,
        );
        if let Err(e) = writer.write_all(&wire::encode(&header, &payload)).await {
            self.state = SessionState::Error;
            return format!("server hello write failed: {e}");
        }
        self.state = SessionState::Connected;
        tracing::info!(
            name = %hello.client_name,
            version = hello.client_version,
            capabilities = format_args!("{negotiated:#06x}"),
            "handshake complete"
        );

        let ping_period = Duration::from_millis(cfg.ping_interval_ms);
        let mut ping_tick = interval_at(tokio::time::Instant::now() + ping_period, ping_period);
        let mut idle_tick = interval_at(
            tokio::time::Instant::now() + Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let client_timeout = Duration::from_millis(cfg.client_timeout_ms);
        let recv_cap = cfg.receive_buffer_size * 2;
        let mut shutdown_rx = self.core.shutdown_rx();

        loop {
            tokio::select! {
                read = reader.read_buf(&mut recv_buf) => {
                    match read {
                        Ok(0) => {
                            return "peer closed".into();
                        }
                        Ok(n) => {
                            self.core.metrics.add_bytes_received(n as u64);
                            self.last_activity = Instant::now();
                            if recv_buf.len() > recv_cap {
                                self.state = SessionState::Error;
                                return "receive buffer overflow".into();
                            }
                            match self.pump_frames(&mut recv_buf) {
                                Ok(None) => {}
                                Ok(Some(reason)) => return reason,
                                Err(e) => {
                                    self.core.metrics.decode_errors.inc(&[("kind", e.kind())]);
                                    self.state = SessionState::Error;
                                    return format!("receive error: {e}");
                                }
                            }
                        }
                        Err(e) => {
                            self.state = SessionState::Error;
                            return format!("read failed: {e}");
                        }
                    }
                }
                maybe_frame = out_rx.recv() => {
                    let Some(frame) = maybe_frame else {
                        return "outbound channel closed".into();
                    };
                    match writer.write_all(&frame).await {
                        Ok(()) => {
                            self.consecutive_errors = 0;
                            self.core.metrics.add_bytes_sent(frame.len() as u64);
                            self.core.metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            self.consecutive_errors += 1;
                            tracing::debug!(error = %e, errors = self.consecutive_errors, "send failed");
                            if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                self.state = SessionState::Error;
                                return "too many consecutive send errors".into();
                            }
                        }
                    }
                }
                _ = ping_tick.tick() => {
                    if cfg.enable_keep_alive {
                        self.send_ping();
                    }
                }
                _ = idle_tick.tick() => {
                    if self.last_activity.elapsed() > client_timeout {
                        self.state = SessionState::Disconnecting;
                        return "client timeout".into();
                    }
                }
                _ = shutdown_rx.changed() => {
                    self.state = SessionState::Disconnecting;
                    return "Server shutdown".into();
                }
            }
        }
    }

    /// Read frames until the first `CLIENT_HELLO`; anything else this early
    /// is a protocol violation.
    async fn await_hello<R>(&mut self, reader: &mut R, buf: &mut BytesMut) -> Result<ClientHello>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = wire::try_decode(buf)? {
                if frame.header.msg_type != MessageType::ClientHello {
                    return Err(KairosError::Protocol(format!(
                        "expected CLIENT_HELLO, got {:?}",
                        frame.header.msg_type
                    )));
                }
                return ClientHello::decode(&frame.payload);
            }
            let n = reader
                .read_buf(buf)
                .await
                .map_err(|e| KairosError::Transport(e.to_string()))?;
            if n == 0 {
                return Err(KairosError::Transport("peer closed during handshake".into()));
            }
        }
    }

    /// Decode and dispatch every whole frame in the buffer. Returns a
    /// disconnect reason when the peer asked to leave.
    fn pump_frames(&mut self, buf: &mut BytesMut) -> Result<Option<String>> {
        while let Some(frame) = wire::try_decode(buf)? {
            self.core.metrics.messages_received.fetch_add(1, Ordering::Relaxed);
            if frame.header.sequence < self.last_sequence {
                tracing::debug!(
                    sequence = frame.header.sequence,
                    last = self.last_sequence,
                    "sequence regression from client"
                );
            }
            self.last_sequence = frame.header.sequence;

            if let Some(reason) = self.handle_frame(frame) {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }

    fn handle_frame(&mut self, frame: Frame) -> Option<String> {
        let header = frame.header;
        match header.msg_type {
            MessageType::ClientHello => {
                // Duplicate hello after the handshake; harmless.
                tracing::debug!("duplicate CLIENT_HELLO ignored");
                None
            }
            MessageType::Ping => {
                match PingData::decode(&frame.payload) {
                    Ok(ping) => self.send_pong(ping),
                    Err(e) => self.report_error(&e, header.sequence),
                }
                None
            }
            MessageType::Pong => {
                if let Ok(pong) = PongData::decode(&frame.payload) {
                    self.handle_pong(pong);
                }
                None
            }
            MessageType::Disconnect => {
                self.state = SessionState::Disconnecting;
                Some("client requested disconnect".into())
            }
            MessageType::CreateGc => {
                if frame.payload.len() >= 4 {
                    let gc_id = u32::from_be_bytes([
                        frame.payload[0],
                        frame.payload[1],
                        frame.payload[2],
                        frame.payload[3],
                    ]);
                    self.gc.create(gc_id);
                }
                None
            }
            MessageType::FreeGc => {
                if frame.payload.len() >= 4 {
                    let gc_id = u32::from_be_bytes([
                        frame.payload[0],
                        frame.payload[1],
                        frame.payload[2],
                        frame.payload[3],
                    ]);
                    self.gc.free(gc_id);
                }
                None
            }
            MessageType::SetForeground => {
                match SetColorData::decode(&frame.payload) {
                    Ok(data) => self.gc.set_foreground(data),
                    Err(e) => self.report_error(&e, header.sequence),
                }
                None
            }
            MessageType::SetBackground => {
                match SetColorData::decode(&frame.payload) {
                    Ok(data) => self.gc.set_background(data),
                    Err(e) => self.report_error(&e, header.sequence),
                }
                None
            }
            MessageType::SetFontSize => {
                match SetFontSizeData::decode(&frame.payload) {
                    Ok(data) => self.gc.set_font(data),
                    Err(e) => self.report_error(&e, header.sequence),
                }
                None
            }
            MessageType::UploadFontTexture => {
                match FontTextureData::decode(&frame.payload) {
                    Ok(data) if data.width == 0
                        || data.height == 0
                        || data.width > MAX_ATLAS_DIM
                        || data.height > MAX_ATLAS_DIM =>
                    {
                        let e = KairosError::Protocol(format!(
                            "atlas dimensions {}x{} out of range",
                            data.width, data.height
                        ));
                        self.report_error(&e, header.sequence);
                    }
                    Ok(data) => {
                        self.core.uploads.push(PendingUpload {
                            texture_id: data.texture_id,
                            width: data.width,
                            height: data.height,
                            format: data.format,
                            pixels: data.pixels,
                        });
                    }
                    Err(e) => self.report_error(&e, header.sequence),
                }
                None
            }
            MessageType::BatchBegin | MessageType::BatchEnd => {
                // Client-side batch delimiters; ordering is already
                // preserved per client, nothing to do server-side.
                None
            }
            MessageType::DrawPoint
            | MessageType::DrawLine
            | MessageType::DrawRectangle
            | MessageType::FillRectangle
            | MessageType::DrawArc
            | MessageType::FillArc
            | MessageType::DrawPolygon
            | MessageType::FillPolygon
            | MessageType::DrawText
            | MessageType::DrawTexturedQuads
            | MessageType::ClearLayer
            | MessageType::ClearAllLayers
            | MessageType::SetLayerVisibility => {
                self.ingest_command(&frame);
                None
            }
            MessageType::SetLineAttributes
            | MessageType::SetFillStyle
            | MessageType::SetFunction
            | MessageType::CreatePixmap
            | MessageType::FreePixmap
            | MessageType::DrawImageString => {
                let e = KairosError::InvalidResource(format!(
                    "unsupported operation {:?}",
                    header.msg_type
                ));
                self.report_error(&e, header.sequence);
                None
            }
            MessageType::ServerHello
            | MessageType::InputEvent
            | MessageType::FrameCallback
            | MessageType::ErrorResponse => {
                // Server-to-client tags arriving inbound.
                let e = KairosError::Protocol(format!(
                    "client sent server-only tag {:?}",
                    header.msg_type
                ));
                self.report_error(&e, header.sequence);
                None
            }
        }
    }

    /// Rate-limit, validate, convert, enqueue.
    fn ingest_command(&mut self, frame: &Frame) {
        let header = &frame.header;

        if !self.rate.allow() {
            self.core
                .metrics
                .commands_rate_limited
                .fetch_add(1, Ordering::Relaxed);
            // Report sparsely to avoid amplifying a flood.
            let due = self
                .last_rate_report
                .map(|t| t.elapsed() >= Duration::from_secs(1))
                .unwrap_or(true);
            if due {
                self.last_rate_report = Some(Instant::now());
                self.report_error(&KairosError::RateLimited, header.sequence);
            }
            return;
        }

        if header.layer_id as u32 >= self.core.config.renderer.max_layers {
            let e = KairosError::InvalidResource(format!("layer {} out of range", header.layer_id));
            self.core
                .metrics
                .error_responses
                .inc(&[("code", ErrorCode::InvalidLayer.as_str())]);
            self.send_error_response(ErrorCode::InvalidLayer, header.sequence, &e.to_string());
            return;
        }

        match command::from_frame(header, &frame.payload, &self.gc) {
            Ok(cmd) => {
                if cmd.priority == Priority::Critical {
                    self.core.sideband.push(cmd);
                } else if !self.core.queue.enqueue(cmd) {
                    // Queue full: drop is already counted by the queue; the
                    // client learns through PONG queue depth, not errors.
                    tracing::trace!(sequence = header.sequence, "command dropped, queue full");
                }
            }
            Err(e) => self.report_error(&e, header.sequence),
        }
    }

    fn send_ping(&mut self) {
        let due = self
            .last_ping_sent
            .map(|t| t.elapsed() >= Duration::from_millis(self.core.config.network.ping_interval_ms))
            .unwrap_or(true);
        if !due {
            return;
        }
        let ping = PingData { client_timestamp: wire::timestamp_micros() };
        let payload = ping.encode();
        let header = MessageHeader::new(
            MessageType::Ping,
            self.client_id,
            self.ping_sequence,
            payload.len() as u32,
        );
        self.ping_sequence += 1;
        if self.out_tx.try_send(wire::encode(&header, &payload)).is_ok() {
            self.last_ping_sent = Some(Instant::now());
        }
    }

    fn send_pong(&mut self, ping: PingData) {
        let pong = PongData {
            client_timestamp: ping.client_timestamp,
            server_timestamp: wire::timestamp_micros(),
            server_load: 0,
            queue_depth: self.core.queue.size() as u32,
        };
        let payload = pong.encode();
        let header = MessageHeader::new(
            MessageType::Pong,
            self.client_id,
            0,
            payload.len() as u32,
        );
        let _ = self.out_tx.try_send(wire::encode(&header, &payload));
    }

    fn handle_pong(&mut self, pong: PongData) {
        let now = wire::timestamp_micros();
        if now > pong.client_timestamp {
            let sample_ms = (now - pong.client_timestamp) as f64 / 1000.0;
            self.latency_ms = if self.latency_ms == 0.0 {
                sample_ms
            } else {
                self.latency_ms * 0.9 + sample_ms * 0.1
            };
            tracing::debug!(latency_ms = self.latency_ms, "pong received");
        }
    }

    /// Map an error to an `ERROR_RESPONSE` when the session is authenticated
    /// and writable; count it either way.
    fn report_error(&mut self, error: &KairosError, original_sequence: u32) {
        let code = error.wire_code();
        self.core
            .metrics
            .error_responses
            .inc(&[("code", code.as_str())]);
        if self.state == SessionState::Connected {
            self.send_error_response(code, original_sequence, &error.to_string());
        }
    }

    fn send_error_response(&mut self, code: ErrorCode, original_sequence: u32, message: &str) {
        let response = ErrorResponseData::new(code, original_sequence, message);
        let payload = response.encode();
        let header = MessageHeader::new(
            MessageType::ErrorResponse,
            self.client_id,
            0,
            payload.len() as u32,
        );
        let _ = self.out_tx.try_send(wire::encode(&header, &payload));
    }
}
