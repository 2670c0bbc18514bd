//! Texture registry and the deferred-upload queue.
//!
//! Sessions may receive texture uploads on any task, but GPU handle
//! creation is render-thread-only. Uploads park in [`UploadQueue`] and the
//! scheduler realizes them at the start of the next frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::Bytes;
use dashmap::DashMap;

use super::gpu::{GpuBackend, TextureHandle};

/// Client-visible id of the server-owned 1×1 white texture. Plain
/// primitives batch under it so they can share draws with each other.
pub const WHITE_TEXTURE_ID: u32 = 0;

#[derive(Debug, Clone, Copy)]
pub struct TextureInfo {
    pub handle: TextureHandle,
    pub width: u32,
    pub height: u32,
    pub format: u32,
}

/// Client texture id → device handle mapping.
#[derive(Default)]
pub struct TextureRegistry {
    textures: DashMap<u32, TextureInfo>,
    missing_lookups: AtomicU64,
}

impl TextureRegistry {
    pub fn new() -> Self {
        let reg = Self::default();
        // The white texture exists from frame zero; handle 0 is the
        // backend's built-in.
        reg.textures.insert(
            WHITE_TEXTURE_ID,
            TextureInfo { handle: 0, width: 1, height: 1, format: 0 },
        );
        reg
    }

    pub fn insert(&self, id: u32, info: TextureInfo) {
        self.textures.insert(id, info);
    }

    pub fn remove(&self, id: u32) -> Option<TextureInfo> {
        if id == WHITE_TEXTURE_ID {
            return None;
        }
        self.textures.remove(&id).map(|(_, info)| info)
    }

    /// Resolve a client texture id, substituting the white texture for
    /// unknown ids (counted, not fatal).
    pub fn resolve(&self, id: u32) -> TextureHandle {
        match self.textures.get(&id) {
            Some(info) => info.handle,
            None => {
                self.missing_lookups.fetch_add(1, Ordering::Relaxed);
                0
            }
        }
    }

    pub fn contains(&self, id: u32) -> bool {
        self.textures.contains_key(&id)
    }

    pub fn missing_lookups(&self) -> u64 {
        self.missing_lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// One parked texture upload.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    pub texture_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub pixels: Bytes,
}

/// Session-to-render-thread handoff for texture pixel data.
#[derive(Default)]
pub struct UploadQueue {
    pending: Mutex<Vec<PendingUpload>>,
}

impl UploadQueue {
    pub fn push(&self, upload: PendingUpload) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(upload);
        }
    }

    pub fn drain(&self) -> Vec<PendingUpload> {
        self.pending.lock().map(|mut p| std::mem::take(&mut *p)).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Realize every parked upload on the render thread.
    pub fn apply(&self, gpu: &mut dyn GpuBackend, textures: &TextureRegistry) {
        for upload in self.drain() {
            match gpu.upload_texture(upload.width, upload.height, upload.format, &upload.pixels) {
                Ok(handle) => {
                    // Re-upload to an existing id replaces the old handle.
                    if let Some(old) = textures.remove(upload.texture_id) {
                        gpu.free_texture(old.handle);
                    }
                    textures.insert(
                        upload.texture_id,
                        TextureInfo {
                            handle,
                            width: upload.width,
                            height: upload.height,
                            format: upload.format,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(texture_id = upload.texture_id, error = %e, "texture upload failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::gpu::RecordingBackend;

    #[test]
    fn white_texture_always_present() {
        let reg = TextureRegistry::new();
        assert!(reg.contains(WHITE_TEXTURE_ID));
        assert!(reg.remove(WHITE_TEXTURE_ID).is_none());
        assert!(reg.contains(WHITE_TEXTURE_ID));
    }

    #[test]
    fn unknown_id_substitutes_white_and_counts() {
        let reg = TextureRegistry::new();
        assert_eq!(reg.resolve(42), 0);
        assert_eq!(reg.missing_lookups(), 1);
    }

    #[test]
    fn uploads_apply_on_render_thread() {
        let queue = UploadQueue::default();
        let reg = TextureRegistry::new();
        let mut gpu = RecordingBackend::new();

        queue.push(PendingUpload {
            texture_id: 7,
            width: 4,
            height: 4,
            format: 0,
            pixels: Bytes::from_static(&[0u8; 64]),
        });
        assert_eq!(queue.len(), 1);

        queue.apply(&mut gpu, &reg);
        assert!(queue.is_empty());
        assert!(reg.contains(7));
        assert_ne!(reg.resolve(7), 0);
        assert_eq!(gpu.uploads, 1);
    }
}
