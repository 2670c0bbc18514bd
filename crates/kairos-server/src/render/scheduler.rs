//! The frame scheduler: drains the command queue, feeds the batcher, and
//! paces the loop to the target frame rate.
//!
//! Runs on a dedicated thread. Only this thread touches the GPU backend,
//! layer raster caches, and the batcher's per-frame state; everything it
//! shares with the network side is behind the queue, the registries, and
//! atomics.

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kairos_proto::payload::FrameCallbackData;
use kairos_proto::types::{Color, Rect};
use kairos_proto::wire::{self, MessageHeader, MessageType};

use crate::command::{CommandKind, CommandQueue, RenderCommand};
use crate::layer::LayerRegistry;
use crate::net::SessionRegistry;
use crate::obs::ServerMetrics;

use super::batch::{BatchKey, Batcher};
use super::fonts::FontRegistry;
use super::gpu::GpuBackend;
use super::primitives::{self, Mesh};
use super::resources::{TextureRegistry, UploadQueue};
use super::text;

/// Rolling FPS window length, frames.
const FPS_WINDOW: usize = 60;
/// EMA smoothing for the average frame time.
const FRAME_TIME_ALPHA: f64 = 0.1;
/// Sustained-low-FPS period before the overload warning fires.
const OVERLOAD_GRACE: Duration = Duration::from_secs(10);
/// Idle-layer reaping cadence, frames.
const REAP_INTERVAL: u64 = 600;

/// High-priority sideband: commands the ingress side wants applied ahead
/// of the regular queue drain (shutdown clears, admin operations).
#[derive(Default)]
pub struct Sideband {
    commands: Mutex<Vec<RenderCommand>>,
}

impl Sideband {
    pub fn push(&self, cmd: RenderCommand) {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(cmd);
        }
    }

    pub fn drain(&self) -> Vec<RenderCommand> {
        self.commands.lock().map(|mut c| std::mem::take(&mut *c)).unwrap_or_default()
    }
}

/// Everything the scheduler shares with the rest of the server.
pub struct SchedulerDeps {
    pub queue: Arc<CommandQueue>,
    pub sideband: Arc<Sideband>,
    pub layers: Arc<LayerRegistry>,
    pub textures: Arc<TextureRegistry>,
    pub fonts: Arc<FontRegistry>,
    pub uploads: Arc<UploadQueue>,
    pub sessions: Arc<SessionRegistry>,
    pub metrics: Arc<ServerMetrics>,
    pub shutdown: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub target_fps: u32,
    pub max_frame_time_ms: u32,
    pub enable_frame_pacing: bool,
    pub command_batch_size: usize,
    pub enable_layer_caching: bool,
    pub memory_limit_mb: u32,
    pub pixel_perfect_text: bool,
}

impl From<&crate::config::RendererSection> for SchedulerConfig {
    fn from(cfg: &crate::config::RendererSection) -> Self {
        Self {
            target_fps: cfg.target_fps,
            max_frame_time_ms: cfg.max_frame_time_ms,
            enable_frame_pacing: cfg.enable_frame_pacing,
            command_batch_size: cfg.command_batch_size,
            enable_layer_caching: cfg.enable_layer_caching,
            memory_limit_mb: cfg.memory_limit_mb,
            pixel_perfect_text: false,
        }
    }
}

pub struct FrameScheduler {
    gpu: Box<dyn GpuBackend>,
    batcher: Batcher,
    deps: SchedulerDeps,
    cfg: SchedulerConfig,

    frame_number: u64,
    frame_times: VecDeque<Instant>,
    current_fps: f64,
    avg_frame_time_ms: f64,
    low_fps_since: Option<Instant>,
    last_overload_warn: Option<Instant>,
}

impl FrameScheduler {
    pub fn new(
        gpu: Box<dyn GpuBackend>,
        batcher: Batcher,
        cfg: SchedulerConfig,
        deps: SchedulerDeps,
    ) -> Self {
        Self {
            gpu,
            batcher,
            deps,
            cfg,
            frame_number: 0,
            frame_times: VecDeque::with_capacity(FPS_WINDOW + 1),
            current_fps: 0.0,
            avg_frame_time_ms: 0.0,
            low_fps_since: None,
            last_overload_warn: None,
        }
    }

    pub fn target_frame_time(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.cfg.target_fps.max(1) as u64)
    }

    pub fn current_fps(&self) -> f64 {
        self.current_fps
    }

    pub fn avg_frame_time_ms(&self) -> f64 {
        self.avg_frame_time_ms
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Drive frames until the shutdown flag rises. The current frame
    /// always completes before the loop exits.
    pub fn run(mut self) {
        tracing::info!(fps = self.cfg.target_fps, "render loop started");
        while !self.deps.shutdown.load(Ordering::Acquire) {
            let frame_start = Instant::now();
            self.run_frame();

            if self.gpu.should_close() {
                tracing::info!("window close requested, initiating shutdown");
                self.deps.shutdown.store(true, Ordering::Release);
            }

            if self.cfg.enable_frame_pacing {
                let elapsed = frame_start.elapsed();
                let target = self.target_frame_time();
                if elapsed < target {
                    std::thread::sleep(target - elapsed);
                }
            }
            self.measure_frame(frame_start);
        }
        tracing::info!(frames = self.frame_number, "render loop stopped");
    }

    /// One full frame: uploads → drain → sort → apply → flush → composite.
    /// Public so tests can step the pipeline headlessly.
    pub fn run_frame(&mut self) {
        self.gpu.begin_frame();
        self.deps.uploads.apply(self.gpu.as_mut(), &self.deps.textures);

        let mut commands = self.deps.sideband.drain();
        commands.extend(self.deps.queue.dequeue_batch(self.cfg.command_batch_size));

        // Stable sort: priority first (the intra-frame guarantee), then
        // layer/tag affinity to maximize batch sharing. FIFO survives
        // within equal keys.
        commands.sort_by_key(|c| (Reverse(c.priority), c.layer_id, c.kind.tag()));

        self.batcher.begin_frame();
        for cmd in commands {
            self.apply(cmd);
        }
        self.batcher.end_frame(self.gpu.as_mut(), &self.deps.textures);

        if self.cfg.enable_layer_caching {
            self.composite_caches();
        }

        // Periodic reap, accelerated when cache memory crosses the soft cap.
        let over_cap = self.deps.layers.cache_memory_bytes()
            > self.cfg.memory_limit_mb as u64 * 1024 * 1024;
        if over_cap || self.frame_number % REAP_INTERVAL == REAP_INTERVAL - 1 {
            let freed = self.deps.layers.reap_idle();
            if over_cap && !freed.0.is_empty() {
                tracing::warn!(freed = freed.0.len(), "cache memory over limit, reaped");
            }
            for target in freed.0 {
                self.gpu.free_render_target(target);
            }
        }

        self.gpu.end_frame();
        self.frame_number += 1;
        self.deps.metrics.frames_rendered.fetch_add(1, Ordering::Relaxed);

        let stats = self.batcher.stats();
        self.deps.metrics.draw_calls.store(stats.draw_calls, Ordering::Relaxed);
        self.deps
            .metrics
            .vertices_flushed
            .store(stats.vertices_flushed, Ordering::Relaxed);

        self.broadcast_frame_callback();
    }

    fn apply(&mut self, cmd: RenderCommand) {
        let layer_id = cmd.layer_id;
        // Out-of-range layer ids were already rejected at the session.
        if cmd.kind.is_draw() && !self.deps.layers.get_or_create(layer_id) {
            return;
        }
        let blend = self
            .deps
            .layers
            .snapshot(layer_id)
            .map(|l| l.blend_mode)
            .unwrap_or_default();

        match cmd.kind {
            CommandKind::DrawPoint { position, color } => {
                let mesh = primitives::tessellate_point(position, 1.0, color);
                self.submit_plain(layer_id, blend, mesh);
            }
            CommandKind::DrawLine { start, end, color, thickness } => {
                let mesh = primitives::tessellate_line(start, end, thickness, color);
                self.submit_plain(layer_id, blend, mesh);
            }
            CommandKind::DrawRectangle { position, width, height, color, filled } => {
                let mesh = primitives::tessellate_rectangle(position, width, height, color, filled);
                self.submit_plain(layer_id, blend, mesh);
            }
            CommandKind::DrawCircle { center, radius, color, filled } => {
                let mesh = primitives::tessellate_circle(center, radius, color, filled);
                self.submit_plain(layer_id, blend, mesh);
            }
            CommandKind::DrawArc {
                center,
                radius_x,
                radius_y,
                start_angle_deg,
                end_angle_deg,
                color,
                filled,
            } => {
                let mesh = primitives::tessellate_arc(
                    center,
                    radius_x,
                    radius_y,
                    start_angle_deg,
                    end_angle_deg,
                    color,
                    filled,
                );
                self.submit_plain(layer_id, blend, mesh);
            }
            CommandKind::DrawPolygon { points, color, filled } => {
                let mesh = primitives::tessellate_polygon(&points, color, filled);
                self.submit_plain(layer_id, blend, mesh);
            }
            CommandKind::DrawText { position, font_id, font_size, color, text: string } => {
                let font = self.deps.fonts.resolve(font_id);
                let mesh = text::shape_text(
                    &font,
                    &string,
                    position,
                    font_size,
                    color,
                    self.cfg.pixel_perfect_text,
                );
                let key = BatchKey {
                    texture_id: font.atlas_texture,
                    layer_id,
                    blend,
                    tint: Color::WHITE.packed(),
                };
                self.submit(layer_id, key, mesh);
            }
            CommandKind::DrawTexturedQuads { texture_id, vertices } => {
                let mut mesh = Mesh { vertices, indices: Vec::new() };
                mesh.indices.reserve(mesh.vertices.len() / 4 * 6);
                for quad in 0..mesh.vertices.len() / 4 {
                    let base = (quad * 4) as u16;
                    mesh.indices.extend_from_slice(&[
                        base,
                        base + 1,
                        base + 2,
                        base,
                        base + 2,
                        base + 3,
                    ]);
                }
                let key = BatchKey {
                    texture_id,
                    layer_id,
                    blend,
                    tint: Color::WHITE.packed(),
                };
                self.submit(layer_id, key, mesh);
            }
            CommandKind::ClearLayer => {
                let had_cache = self.deps.layers.clear(layer_id);
                if had_cache {
                    self.clear_layer_cache(layer_id);
                }
            }
            CommandKind::ClearAllLayers => {
                self.deps.layers.clear_all();
                for layer in self.deps.layers.visible_in_render_order() {
                    if layer.cache.is_some() {
                        self.clear_layer_cache(layer.id);
                    }
                }
            }
            CommandKind::SetLayerVisibility { visible } => {
                self.deps.layers.set_visibility(layer_id, visible);
            }
            CommandKind::SetViewport { x, y, width, height } => {
                let rect = Rect::new(x as f32, y as f32, width as f32, height as f32);
                self.batcher.set_clip(Some(rect));
                self.gpu.set_scissor(rect);
            }
            CommandKind::SetCamera { target, offset, rotation, zoom } => {
                self.gpu.set_camera((target.x, target.y), (offset.x, offset.y), rotation, zoom);
            }
        }
    }

    fn submit_plain(&mut self, layer_id: u8, blend: kairos_proto::types::BlendMode, mesh: Mesh) {
        let key = BatchKey::plain(layer_id, blend);
        self.submit(layer_id, key, mesh);
    }

    fn submit(&mut self, layer_id: u8, key: BatchKey, mesh: Mesh) {
        if mesh.vertices.is_empty() {
            return;
        }
        self.deps.layers.add_content(layer_id, 1, mesh.vertices.len() as u32);
        self.batcher
            .draw_mesh(self.gpu.as_mut(), &self.deps.textures, key, &mesh);
    }

    fn clear_layer_cache(&mut self, layer_id: u8) {
        if let Some(layer) = self.deps.layers.snapshot(layer_id) {
            if let Some(cache) = layer.cache {
                self.gpu.bind_render_target(Some(cache.target));
                self.gpu.clear_target(Color::TRANSPARENT);
                self.gpu.bind_render_target(None);
            }
        }
    }

    /// Composite cached layers onto the backbuffer in ascending z-order.
    fn composite_caches(&mut self) {
        for layer in self.deps.layers.visible_in_render_order() {
            if let Some(cache) = layer.cache {
                self.gpu.composite_target(cache.target, layer.opacity, layer.blend_mode);
            }
            if layer.dirty {
                self.deps.layers.mark_clean(layer.id);
            }
        }
    }

    fn broadcast_frame_callback(&self) {
        let callback = FrameCallbackData {
            frame_number: self.frame_number as u32,
            frame_time_us: wire::timestamp_micros(),
            frame_rate: self.current_fps as f32,
            dropped_frames: self
                .deps
                .metrics
                .frames_dropped
                .load(Ordering::Relaxed) as u32,
        };
        let payload = callback.encode();
        let header = MessageHeader::new(
            MessageType::FrameCallback,
            0,
            self.frame_number as u32,
            payload.len() as u32,
        );
        let frame = wire::encode(&header, &payload);
        self.deps.sessions.broadcast_frame_callback(&frame);
    }

    fn measure_frame(&mut self, frame_start: Instant) {
        let now = Instant::now();
        let frame_ms = now.duration_since(frame_start).as_secs_f64() * 1000.0;
        self.avg_frame_time_ms = if self.avg_frame_time_ms == 0.0 {
            frame_ms
        } else {
            self.avg_frame_time_ms * (1.0 - FRAME_TIME_ALPHA) + frame_ms * FRAME_TIME_ALPHA
        };

        self.frame_times.push_back(now);
        if self.frame_times.len() > FPS_WINDOW {
            self.frame_times.pop_front();
        }
        if self.frame_times.len() >= 2 {
            let span = now
                .duration_since(*self.frame_times.front().unwrap_or(&now))
                .as_secs_f64();
            if span > 0.0 {
                self.current_fps = (self.frame_times.len() - 1) as f64 / span;
            }
        }

        self.detect_overload(now);
    }

    fn detect_overload(&mut self, now: Instant) {
        let threshold = self.cfg.target_fps as f64 * 0.8;
        if self.frame_times.len() >= FPS_WINDOW && self.current_fps < threshold {
            let since = *self.low_fps_since.get_or_insert(now);
            let warn_due = self
                .last_overload_warn
                .map(|t| now.duration_since(t) >= OVERLOAD_GRACE)
                .unwrap_or(true);
            if now.duration_since(since) >= OVERLOAD_GRACE && warn_due {
                tracing::warn!(
                    fps = self.current_fps,
                    target = self.cfg.target_fps,
                    "sustained low frame rate"
                );
                self.last_overload_warn = Some(now);
            }
        } else {
            self.low_fps_since = None;
        }

        if self.avg_frame_time_ms > self.cfg.max_frame_time_ms as f64 {
            // Adaptive-quality hooks are reserved; nothing to do yet beyond
            // the measurement itself.
            tracing::debug!(
                avg_frame_time_ms = self.avg_frame_time_ms,
                "frame time above budget"
            );
        }
    }
}
