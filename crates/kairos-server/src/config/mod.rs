//! Server config loader (strict parsing).

pub mod schema;

use std::fs;

use kairos_proto::{KairosError, Result};

pub use schema::{NetworkSection, RendererSection, ServerConfig};

pub fn load_from_file(path: &str) -> Result<ServerConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| KairosError::Fatal(format!("read config {path}: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ServerConfig> {
    let cfg: ServerConfig = serde_yaml::from_str(s)
        .map_err(|e| KairosError::Protocol(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
