#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use kairos_server::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
network:
  port: 9000
  rate_limitz: 500 # typo should fail
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.network.port, 8080);
    assert_eq!(cfg.network.bind_address, "127.0.0.1");
    assert_eq!(cfg.renderer.target_fps, 60);
}

#[test]
fn wrong_version_rejected() {
    let bad = r#"
version: 3
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn both_transports_disabled_rejected() {
    let bad = r#"
version: 1
network:
  enable_tcp: false
  enable_local: false
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn timeout_must_exceed_ping_interval() {
    let bad = r#"
version: 1
network:
  ping_interval_ms: 30000
  client_timeout_ms: 10000
"#;
    assert!(config::load_from_str(bad).is_err());
}

#[test]
fn full_config_round_trips() {
    let ok = r#"
version: 1
network:
  bind_address: "0.0.0.0"
  port: 7000
  enable_tcp: true
  local_socket_path: "/run/kairos.sock"
  enable_local: true
  max_clients: 64
  max_per_peer: 4
  rate_limit_per_second: 500
renderer:
  target_fps: 120
  command_batch_size: 2000
  command_queue_capacity: 20000
  max_batch_vertices: 8000
  enable_layer_caching: false
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.network.max_clients, 64);
    assert_eq!(cfg.renderer.target_fps, 120);
    assert!(!cfg.renderer.enable_layer_caching);
}
