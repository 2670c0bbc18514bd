use serde::Deserialize;

use kairos_proto::types::limits;
use kairos_proto::{KairosError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub version: u32,

    #[serde(default)]
    pub network: NetworkSection,

    #[serde(default)]
    pub renderer: RendererSection,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            network: NetworkSection::default(),
            renderer: RendererSection::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(KairosError::Protocol(format!(
                "config version {} not supported",
                self.version
            )));
        }
        self.network.validate()?;
        self.renderer.validate()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub enable_tcp: bool,

    #[serde(default = "default_local_socket_path")]
    pub local_socket_path: String,

    #[serde(default = "default_true")]
    pub enable_local: bool,

    /// Unlink a stale socket file before binding the local endpoint.
    #[serde(default = "default_true")]
    pub auto_remove_socket: bool,

    #[serde(default = "default_max_clients")]
    pub max_clients: u32,

    #[serde(default = "default_max_per_peer")]
    pub max_per_peer: u32,

    #[serde(default = "default_buffer_size")]
    pub receive_buffer_size: usize,

    #[serde(default = "default_buffer_size")]
    pub send_buffer_size: usize,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    #[serde(default = "default_true")]
    pub enable_keep_alive: bool,

    #[serde(default = "default_true")]
    pub enable_nodelay: bool,

    /// Per-session commands per second before rejection.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_second: u32,

    /// Codec rejection threshold; never above the protocol's 10 MiB.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: u32,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            enable_tcp: true,
            local_socket_path: default_local_socket_path(),
            enable_local: true,
            auto_remove_socket: true,
            max_clients: default_max_clients(),
            max_per_peer: default_max_per_peer(),
            receive_buffer_size: default_buffer_size(),
            send_buffer_size: default_buffer_size(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            client_timeout_ms: default_client_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            enable_keep_alive: true,
            enable_nodelay: true,
            rate_limit_per_second: default_rate_limit(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl NetworkSection {
    pub fn validate(&self) -> Result<()> {
        if !self.enable_tcp && !self.enable_local {
            return Err(KairosError::Protocol(
                "network: at least one of enable_tcp/enable_local must be set".into(),
            ));
        }
        if self.max_clients == 0 || self.max_clients > limits::MAX_CLIENTS {
            return Err(KairosError::Protocol(format!(
                "network.max_clients must be within 1..={}",
                limits::MAX_CLIENTS
            )));
        }
        if self.max_message_size > limits::MAX_MESSAGE_SIZE {
            return Err(KairosError::Protocol(format!(
                "network.max_message_size must not exceed {}",
                limits::MAX_MESSAGE_SIZE
            )));
        }
        if self.receive_buffer_size < 4096 || self.send_buffer_size < 4096 {
            return Err(KairosError::Protocol(
                "network: buffer sizes below 4096 bytes are not usable".into(),
            ));
        }
        if self.client_timeout_ms <= self.ping_interval_ms {
            return Err(KairosError::Protocol(
                "network.client_timeout_ms must be greater than ping_interval_ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RendererSection {
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,

    #[serde(default = "default_max_frame_time_ms")]
    pub max_frame_time_ms: u32,

    #[serde(default = "default_true")]
    pub enable_frame_pacing: bool,

    /// Commands drained from the queue per frame.
    #[serde(default = "default_command_batch_size")]
    pub command_batch_size: usize,

    #[serde(default = "default_queue_capacity")]
    pub command_queue_capacity: usize,

    #[serde(default = "default_max_layers")]
    pub max_layers: u32,

    #[serde(default = "default_true")]
    pub enable_layer_caching: bool,

    #[serde(default = "default_true")]
    pub enable_batching: bool,

    #[serde(default = "default_true")]
    pub enable_batch_merging: bool,

    #[serde(default = "default_true")]
    pub enable_layer_sorting: bool,

    #[serde(default = "default_max_batch_vertices")]
    pub max_batch_vertices: usize,

    /// Soft cap that triggers font/layer cache reaping.
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u32,
}

impl Default for RendererSection {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            max_frame_time_ms: default_max_frame_time_ms(),
            enable_frame_pacing: true,
            command_batch_size: default_command_batch_size(),
            command_queue_capacity: default_queue_capacity(),
            max_layers: default_max_layers(),
            enable_layer_caching: true,
            enable_batching: true,
            enable_batch_merging: true,
            enable_layer_sorting: true,
            max_batch_vertices: default_max_batch_vertices(),
            memory_limit_mb: default_memory_limit_mb(),
        }
    }
}

impl RendererSection {
    pub fn validate(&self) -> Result<()> {
        if !(10..=300).contains(&self.target_fps) {
            return Err(KairosError::Protocol(
                "renderer.target_fps must be between 10 and 300".into(),
            ));
        }
        if self.max_layers == 0 || self.max_layers > limits::MAX_LAYERS {
            return Err(KairosError::Protocol(format!(
                "renderer.max_layers must be within 1..={}",
                limits::MAX_LAYERS
            )));
        }
        if self.command_batch_size == 0 {
            return Err(KairosError::Protocol(
                "renderer.command_batch_size must be non-zero".into(),
            ));
        }
        if self.command_queue_capacity < self.command_batch_size {
            return Err(KairosError::Protocol(
                "renderer.command_queue_capacity must hold at least one batch".into(),
            ));
        }
        if self.max_batch_vertices < 64 {
            return Err(KairosError::Protocol(
                "renderer.max_batch_vertices below 64 defeats batching".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_bind_address() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8080
}
fn default_local_socket_path() -> String {
    "/tmp/kairos_server.sock".into()
}
fn default_max_clients() -> u32 {
    32
}
fn default_max_per_peer() -> u32 {
    limits::MAX_CONNECTIONS_PER_PEER
}
fn default_buffer_size() -> usize {
    64 * 1024
}
fn default_handshake_timeout_ms() -> u64 {
    5000
}
fn default_client_timeout_ms() -> u64 {
    30_000
}
fn default_ping_interval_ms() -> u64 {
    10_000
}
fn default_rate_limit() -> u32 {
    1000
}
fn default_max_message_size() -> u32 {
    limits::MAX_MESSAGE_SIZE
}
fn default_target_fps() -> u32 {
    60
}
fn default_max_frame_time_ms() -> u32 {
    33
}
fn default_command_batch_size() -> usize {
    1000
}
fn default_queue_capacity() -> usize {
    10_000
}
fn default_max_layers() -> u32 {
    limits::MAX_LAYERS
}
fn default_max_batch_vertices() -> usize {
    limits::MAX_BATCH_VERTICES as usize
}
fn default_memory_limit_mb() -> u32 {
    512
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        ServerConfig::default().validate().unwrap();
    }

    #[test]
    fn effective_rate_limit_is_min_of_global_and_session() {
        let cfg = ServerConfig::default();
        let effective = cfg
            .network
            .rate_limit_per_second
            .min(limits::MAX_COMMANDS_PER_SECOND);
        assert_eq!(effective, 1000);
    }

    #[test]
    fn fps_out_of_range_rejected() {
        let mut cfg = ServerConfig::default();
        cfg.renderer.target_fps = 500;
        assert!(cfg.validate().is_err());
    }
}
