//! Server assembly: shared core, render thread, lifecycle.
//!
//! The network side never calls into the render side directly. Sessions
//! feed the command queue, the upload queue, and the sideband; the render
//! thread consumes them. Shutdown is one atomic flag plus a watch channel,
//! observed by every loop — no global mutable server reference anywhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use kairos_proto::payload::InputEventData;
use kairos_proto::types::caps;
use kairos_proto::wire::{self, MessageHeader, MessageType};
use kairos_proto::Result;

use crate::command::CommandQueue;
use crate::config::ServerConfig;
use crate::layer::LayerRegistry;
use crate::net::{self, SessionRegistry};
use crate::obs::ServerMetrics;
use crate::render::{
    Batcher, FontRegistry, FrameScheduler, GpuBackend, SchedulerConfig, SchedulerDeps, Sideband,
    TextureRegistry, UploadQueue,
};

/// Everything shared between the accept loops, session tasks, and the
/// render thread. Constructed once, shared via `Arc`.
pub struct ServerCore {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub queue: Arc<CommandQueue>,
    pub sideband: Arc<Sideband>,
    pub layers: Arc<LayerRegistry>,
    pub textures: Arc<TextureRegistry>,
    pub fonts: Arc<FontRegistry>,
    pub uploads: Arc<UploadQueue>,
    pub metrics: Arc<ServerMetrics>,

    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl ServerCore {
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Arc::new(Self {
            queue: Arc::new(CommandQueue::new(config.renderer.command_queue_capacity)),
            sideband: Arc::new(Sideband::default()),
            layers: Arc::new(LayerRegistry::new(config.renderer.max_layers)),
            textures: Arc::new(TextureRegistry::new()),
            fonts: Arc::new(FontRegistry::new()),
            uploads: Arc::new(UploadQueue::default()),
            registry: Arc::new(SessionRegistry::new()),
            metrics: Arc::new(ServerMetrics::default()),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            config,
        }))
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Acquire)
    }

    /// Raise the shutdown flag once; every loop drains and exits.
    pub fn request_shutdown(&self, reason: &str) {
        if !self.shutdown_flag.swap(true, Ordering::AcqRel) {
            tracing::info!(reason, "shutdown requested");
            let _ = self.shutdown_tx.send(true);
        }
    }

    /// Start the accept loops for every enabled transport.
    pub async fn start_listeners(self: &Arc<Self>) -> Result<Vec<tokio::task::JoinHandle<()>>> {
        net::spawn_listeners(self).await
    }

    /// Start the render thread owning `gpu`. Joins at shutdown.
    pub fn start_render_thread(
        self: &Arc<Self>,
        gpu: Box<dyn GpuBackend>,
    ) -> std::thread::JoinHandle<()> {
        let scheduler = self.build_scheduler(gpu);
        std::thread::Builder::new()
            .name("kairos-render".into())
            .spawn(move || scheduler.run())
            .unwrap_or_else(|e| {
                // Thread spawn failing at boot is unrecoverable and happens
                // before any client connects.
                panic!("failed to spawn render thread: {e}")
            })
    }

    /// Assemble a scheduler bound to this core. Split out so tests can
    /// step frames without a thread.
    pub fn build_scheduler(self: &Arc<Self>, gpu: Box<dyn GpuBackend>) -> FrameScheduler {
        let renderer = &self.config.renderer;
        let mut batcher = Batcher::new(
            renderer.max_batch_vertices,
            renderer.enable_batch_merging,
            renderer.enable_layer_sorting,
        );
        if !renderer.enable_batching {
            // Flush after every submission: one draw call per primitive.
            batcher.set_auto_flush_threshold(1);
        }
        FrameScheduler::new(
            gpu,
            batcher,
            SchedulerConfig::from(renderer),
            SchedulerDeps {
                queue: Arc::clone(&self.queue),
                sideband: Arc::clone(&self.sideband),
                layers: Arc::clone(&self.layers),
                textures: Arc::clone(&self.textures),
                fonts: Arc::clone(&self.fonts),
                uploads: Arc::clone(&self.uploads),
                sessions: Arc::clone(&self.registry),
                metrics: Arc::clone(&self.metrics),
                shutdown: Arc::clone(&self.shutdown_flag),
            },
        )
    }

    /// Forward a platform input event to every client that negotiated the
    /// capability. The windowed backend's event loop calls this.
    pub fn broadcast_input_event(&self, event: &InputEventData) -> usize {
        let payload = event.encode();
        let header =
            MessageHeader::new(MessageType::InputEvent, 0, 0, payload.len() as u32);
        let frame = wire::encode(&header, &payload);
        self.registry.broadcast_capable(&frame, caps::INPUT_EVENTS)
    }

    /// One-line status summary for the periodic report.
    pub fn status_line(&self) -> String {
        let queue = self.queue.stats();
        let layers = self.layers.stats();
        format!(
            "sessions={} queue={}/{} dropped={} layers={}({} dirty) frames={}",
            self.registry.session_count(),
            queue.resident,
            self.queue.capacity(),
            queue.total_dropped,
            layers.total,
            layers.dirty,
            self.metrics.frames_rendered.load(Ordering::Relaxed),
        )
    }

    /// Full metric exposition, including queue-side extras.
    pub fn render_metrics(&self) -> String {
        let queue = self.queue.stats();
        self.metrics.render(&[
            ("kairos_queue_resident", queue.resident as u64),
            ("kairos_queue_enqueued_total", queue.total_enqueued),
            ("kairos_queue_dropped_total", queue.total_dropped),
            ("kairos_queue_peak", queue.peak_size as u64),
            ("kairos_texture_missing_total", self.textures.missing_lookups()),
            ("kairos_font_missing_total", self.fonts.missing_lookups()),
        ])
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::render::RecordingBackend;

    #[test]
    fn core_constructs_with_defaults() {
        let core = ServerCore::new(ServerConfig::default()).unwrap();
        assert!(!core.is_shutting_down());
        assert!(core.layers.contains(0));
        assert_eq!(core.queue.size(), 0);
    }

    #[test]
    fn shutdown_is_idempotent_and_observable() {
        let core = ServerCore::new(ServerConfig::default()).unwrap();
        let rx = core.shutdown_rx();
        core.request_shutdown("test");
        core.request_shutdown("again");
        assert!(core.is_shutting_down());
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn scheduler_steps_headlessly() {
        let core = ServerCore::new(ServerConfig::default()).unwrap();
        let mut scheduler = core.build_scheduler(Box::new(RecordingBackend::new()));
        scheduler.run_frame();
        assert_eq!(scheduler.frame_number(), 1);
    }
}
