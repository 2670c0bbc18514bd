//! Kairos graphics server library.
//!
//! This crate assembles the production server stack:
//! - Transport: TCP and Unix-domain stream listeners, one task per accepted
//!   session, strict frame decoding with disconnect-on-malformed.
//! - Sessions: handshake, keep-alive, sliding-window rate limiting,
//!   per-session graphics-context state, bounded send/receive buffers.
//! - Command pipeline: wire frames convert into typed render commands and
//!   flow through a bounded multi-priority queue to the render thread.
//! - Rendering: layer registry with z-order and raster caches, a batcher
//!   that groups geometry by (texture, layer, blend, tint), primitive and
//!   text tessellation, and a frame scheduler that paces the pipeline.
//! - Observability: labeled counters/gauges rendered to the log, tracing
//!   spans per session and per frame.
//!
//! The server is designed for panic-free operation: hostile input surfaces
//! as structured `KairosError` values and, at worst, costs the offending
//! session its connection. This crate is consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod command;
pub mod config;
pub mod layer;
pub mod net;
pub mod obs;
pub mod render;
pub mod server;
