//! The GPU backend interface.
//!
//! The real backend (window + device) lives outside this crate; the server
//! only depends on this trait. Every method takes `&mut self` and is only
//! called from the render thread.

use kairos_proto::types::{BlendMode, Color, Rect, TexturedVertex};
use kairos_proto::Result;

/// Opaque GPU texture handle. 0 is the built-in 1×1 white texture.
pub type TextureHandle = u32;

pub trait GpuBackend: Send {
    fn begin_frame(&mut self);
    fn end_frame(&mut self);

    fn set_blend_mode(&mut self, mode: BlendMode);
    fn set_scissor(&mut self, rect: Rect);
    fn clear_scissor(&mut self);
    fn set_camera(&mut self, target: (f32, f32), offset: (f32, f32), rotation: f32, zoom: f32);

    /// Upload RGBA8 (or compatible) pixels; returns the device handle.
    fn upload_texture(&mut self, width: u32, height: u32, format: u32, pixels: &[u8])
        -> Result<TextureHandle>;
    fn free_texture(&mut self, handle: TextureHandle);

    /// Create an off-screen raster target used for layer caching.
    fn create_render_target(&mut self, width: u32, height: u32) -> Result<TextureHandle>;
    fn free_render_target(&mut self, handle: TextureHandle);
    /// Route subsequent draws into a target (`None` = the backbuffer).
    fn bind_render_target(&mut self, target: Option<TextureHandle>);
    fn clear_target(&mut self, color: Color);
    /// Composite a cached layer target onto the backbuffer.
    fn composite_target(&mut self, handle: TextureHandle, opacity: f32, mode: BlendMode);

    /// Submit indexed triangles sampled from `texture`.
    fn draw_triangles(
        &mut self,
        texture: TextureHandle,
        vertices: &[TexturedVertex],
        indices: &[u16],
    );

    /// True when the platform asked the window to close.
    fn should_close(&self) -> bool {
        false
    }
}

/// A draw call as observed by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDraw {
    pub texture: TextureHandle,
    pub blend: BlendMode,
    pub vertex_count: usize,
    pub index_count: usize,
    pub vertices: Vec<TexturedVertex>,
}

/// Headless backend that records calls instead of touching a device.
/// Backs the pipeline tests and `--headless` operation.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub frames_begun: u64,
    pub frames_ended: u64,
    pub draws: Vec<RecordedDraw>,
    pub uploads: u32,
    pub blend: BlendMode,
    pub scissor: Option<Rect>,
    /// Cached-layer composites in submission order.
    pub composites: Vec<TextureHandle>,
    next_handle: TextureHandle,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self { next_handle: 1, ..Self::default() }
    }

    pub fn draw_calls(&self) -> usize {
        self.draws.len()
    }

    pub fn total_vertices(&self) -> usize {
        self.draws.iter().map(|d| d.vertex_count).sum()
    }
}

impl GpuBackend for RecordingBackend {
    fn begin_frame(&mut self) {
        self.frames_begun += 1;
    }

    fn end_frame(&mut self) {
        self.frames_ended += 1;
    }

    fn set_blend_mode(&mut self, mode: BlendMode) {
        self.blend = mode;
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.scissor = Some(rect);
    }

    fn clear_scissor(&mut self) {
        self.scissor = None;
    }

    fn set_camera(&mut self, _target: (f32, f32), _offset: (f32, f32), _rot: f32, _zoom: f32) {}

    fn upload_texture(
        &mut self,
        _width: u32,
        _height: u32,
        _format: u32,
        _pixels: &[u8],
    ) -> Result<TextureHandle> {
        self.uploads += 1;
        self.next_handle += 1;
        Ok(self.next_handle)
    }

    fn free_texture(&mut self, _handle: TextureHandle) {}

    fn create_render_target(&mut self, _width: u32, _height: u32) -> Result<TextureHandle> {
        self.next_handle += 1;
        Ok(self.next_handle)
    }

    fn free_render_target(&mut self, _handle: TextureHandle) {}

    fn bind_render_target(&mut self, _target: Option<TextureHandle>) {}

    fn clear_target(&mut self, _color: Color) {}

    fn composite_target(&mut self, handle: TextureHandle, _opacity: f32, _mode: BlendMode) {
        self.composites.push(handle);
    }

    fn draw_triangles(
        &mut self,
        texture: TextureHandle,
        vertices: &[TexturedVertex],
        indices: &[u16],
    ) {
        self.draws.push(RecordedDraw {
            texture,
            blend: self.blend,
            vertex_count: vertices.len(),
            index_count: indices.len(),
            vertices: vertices.to_vec(),
        });
    }
}
