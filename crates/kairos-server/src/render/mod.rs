//! The render half of the pipeline: GPU interface, resource registries,
//! tessellation, batching, text shaping, and the frame scheduler.
//!
//! Everything here executes on the render thread only, except the upload
//! queue (fed by session tasks, drained at frame start) and the registries'
//! metadata reads.

pub mod batch;
pub mod fonts;
pub mod gpu;
pub mod primitives;
pub mod resources;
pub mod scheduler;
pub mod text;

pub use batch::{BatchKey, Batcher};
pub use fonts::{FontRegistry, Glyph};
pub use gpu::{GpuBackend, RecordingBackend};
pub use resources::{TextureRegistry, UploadQueue, WHITE_TEXTURE_ID};
pub use scheduler::{FrameScheduler, SchedulerConfig, SchedulerDeps, Sideband};
