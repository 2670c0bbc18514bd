//! Layer registry: metadata, visibility, dirty tracking, z-order.
//!
//! Layers are compositing slots, not scene graphs — contents live in the
//! per-frame batches (or a cached raster target). The registry tracks the
//! attributes the scheduler needs to decide what composites, in what
//! order, and what can be reaped.
//!
//! Locking: one mutex over the table. Mutations arrive from the command
//! path on the render thread; visibility/opacity/blend may also be set
//! from session tasks, which is why this is not render-thread-private.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use kairos_proto::types::BlendMode;

use crate::render::gpu::TextureHandle;

/// Empty non-zero layers older than this are deleted.
const REAP_IDLE: Duration = Duration::from_secs(5 * 60);
/// Idle raster caches are freed earlier than their layers.
const CACHE_IDLE: Duration = Duration::from_secs(2 * 60);

#[derive(Debug, Clone)]
pub struct Layer {
    pub id: u8,
    pub visible: bool,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    pub z_order: f32,
    pub dirty: bool,
    pub object_count: u32,
    pub vertex_count: u32,
    /// Off-screen raster target, when caching is enabled for this layer.
    pub cache: Option<LayerCache>,
    pub created_at: Instant,
    pub last_modified: Instant,
}

#[derive(Debug, Clone, Copy)]
pub struct LayerCache {
    pub target: TextureHandle,
    pub width: u32,
    pub height: u32,
}

impl Layer {
    fn new(id: u8) -> Self {
        let now = Instant::now();
        Self {
            id,
            visible: true,
            opacity: 1.0,
            blend_mode: BlendMode::Alpha,
            z_order: id as f32,
            dirty: true,
            object_count: 0,
            vertex_count: 0,
            cache: None,
            created_at: now,
            last_modified: now,
        }
    }
}

/// Targets freed by a registry operation; the caller releases them on the
/// render thread (the registry itself never talks to the GPU).
#[derive(Debug, Default)]
pub struct FreedTargets(pub Vec<TextureHandle>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerStats {
    pub total: usize,
    pub visible: usize,
    pub dirty: usize,
    pub cached: usize,
    pub total_objects: u64,
    pub total_vertices: u64,
}

pub struct LayerRegistry {
    inner: Mutex<Inner>,
    max_layers: u32,
}

struct Inner {
    layers: HashMap<u8, Layer>,
    needs_sort: bool,
}

impl LayerRegistry {
    pub fn new(max_layers: u32) -> Self {
        let mut layers = HashMap::new();
        // Layer 0 exists for the lifetime of the registry.
        layers.insert(0, Layer::new(0));
        Self {
            inner: Mutex::new(Inner { layers, needs_sort: false }),
            max_layers,
        }
    }

    pub fn max_layers(&self) -> u32 {
        self.max_layers
    }

    fn with<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        match self.inner.lock() {
            Ok(mut inner) => f(&mut inner),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn contains(&self, id: u8) -> bool {
        self.with(|inner| inner.layers.contains_key(&id))
    }

    /// Lazily instantiate layer metadata. Returns `false` when the id is
    /// outside the configured range.
    pub fn get_or_create(&self, id: u8) -> bool {
        if id as u32 >= self.max_layers {
            return false;
        }
        self.with(|inner| {
            inner.layers.entry(id).or_insert_with(|| Layer::new(id));
        });
        true
    }

    pub fn snapshot(&self, id: u8) -> Option<Layer> {
        self.with(|inner| inner.layers.get(&id).cloned())
    }

    pub fn set_visibility(&self, id: u8, visible: bool) {
        self.get_or_create(id);
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                if layer.visible != visible {
                    layer.visible = visible;
                    layer.dirty = true;
                    layer.last_modified = Instant::now();
                }
            }
        });
    }

    pub fn set_opacity(&self, id: u8, opacity: f32) {
        self.get_or_create(id);
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                let clamped = opacity.clamp(0.0, 1.0);
                if (layer.opacity - clamped).abs() > f32::EPSILON {
                    layer.opacity = clamped;
                    layer.dirty = true;
                    layer.last_modified = Instant::now();
                }
            }
        });
    }

    pub fn set_blend_mode(&self, id: u8, mode: BlendMode) {
        self.get_or_create(id);
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                if layer.blend_mode != mode {
                    layer.blend_mode = mode;
                    layer.dirty = true;
                    layer.last_modified = Instant::now();
                }
            }
        });
    }

    pub fn set_z_order(&self, id: u8, z: f32) {
        self.get_or_create(id);
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                if (layer.z_order - z).abs() > f32::EPSILON {
                    layer.z_order = z;
                    layer.dirty = true;
                    layer.last_modified = Instant::now();
                    inner.needs_sort = true;
                }
            }
        });
    }

    pub fn mark_dirty(&self, id: u8) {
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                layer.dirty = true;
                layer.last_modified = Instant::now();
            }
        });
    }

    pub fn mark_clean(&self, id: u8) {
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                layer.dirty = false;
            }
        });
    }

    pub fn is_dirty(&self, id: u8) -> bool {
        self.with(|inner| inner.layers.get(&id).map(|l| l.dirty).unwrap_or(false))
    }

    /// Reset a layer's contents. The cached target (if any) stays attached
    /// but must be cleared by the render thread; the returned flag tells
    /// the caller whether a cache is present.
    pub fn clear(&self, id: u8) -> bool {
        self.with(|inner| match inner.layers.get_mut(&id) {
            Some(layer) => {
                layer.object_count = 0;
                layer.vertex_count = 0;
                layer.dirty = true;
                layer.last_modified = Instant::now();
                layer.cache.is_some()
            }
            None => false,
        })
    }

    pub fn clear_all(&self) {
        self.with(|inner| {
            let now = Instant::now();
            for layer in inner.layers.values_mut() {
                layer.object_count = 0;
                layer.vertex_count = 0;
                layer.dirty = true;
                layer.last_modified = now;
            }
        });
    }

    /// Account geometry applied to a layer this frame.
    pub fn add_content(&self, id: u8, objects: u32, vertices: u32) {
        self.get_or_create(id);
        self.with(|inner| {
            if let Some(layer) = inner.layers.get_mut(&id) {
                layer.object_count += objects;
                layer.vertex_count += vertices;
                layer.dirty = true;
                layer.last_modified = Instant::now();
            }
        });
    }

    /// Visible layers sorted ascending by z-order, id as tiebreaker.
    pub fn visible_in_render_order(&self) -> Vec<Layer> {
        self.with(|inner| {
            let mut layers: Vec<Layer> =
                inner.layers.values().filter(|l| l.visible).cloned().collect();
            layers.sort_by(|a, b| {
                a.z_order
                    .partial_cmp(&b.z_order)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });
            inner.needs_sort = false;
            layers
        })
    }

    /// Attach an off-screen raster target to a layer.
    pub fn enable_cache(&self, id: u8, cache: LayerCache) -> Option<TextureHandle> {
        self.get_or_create(id);
        self.with(|inner| {
            let layer = inner.layers.get_mut(&id)?;
            let old = layer.cache.replace(cache).map(|c| c.target);
            layer.dirty = true;
            old
        })
    }

    pub fn disable_cache(&self, id: u8) -> Option<TextureHandle> {
        self.with(|inner| {
            let layer = inner.layers.get_mut(&id)?;
            layer.cache.take().map(|c| c.target)
        })
    }

    /// Delete idle empty layers and free idle caches. Layer 0 is exempt
    /// from deletion (its cache is still reapable).
    pub fn reap_idle(&self) -> FreedTargets {
        let now = Instant::now();
        self.with(|inner| {
            let mut freed = FreedTargets::default();

            for layer in inner.layers.values_mut() {
                if layer.cache.is_some()
                    && layer.object_count == 0
                    && now.duration_since(layer.last_modified) > CACHE_IDLE
                {
                    if let Some(cache) = layer.cache.take() {
                        freed.0.push(cache.target);
                        tracing::debug!(layer = layer.id, "freed idle layer cache");
                    }
                }
            }

            let dead: Vec<u8> = inner
                .layers
                .values()
                .filter(|l| {
                    l.id != 0
                        && l.object_count == 0
                        && now.duration_since(l.last_modified) > REAP_IDLE
                })
                .map(|l| l.id)
                .collect();
            for id in dead {
                if let Some(layer) = inner.layers.remove(&id) {
                    if let Some(cache) = layer.cache {
                        freed.0.push(cache.target);
                    }
                    tracing::debug!(layer = id, "reaped idle layer");
                }
            }

            freed
        })
    }

    /// Estimated bytes held by raster caches (RGBA8).
    pub fn cache_memory_bytes(&self) -> u64 {
        self.with(|inner| {
            inner
                .layers
                .values()
                .filter_map(|l| l.cache.as_ref())
                .map(|c| c.width as u64 * c.height as u64 * 4)
                .sum()
        })
    }

    pub fn stats(&self) -> LayerStats {
        self.with(|inner| {
            let mut stats = LayerStats { total: inner.layers.len(), ..Default::default() };
            for layer in inner.layers.values() {
                if layer.visible {
                    stats.visible += 1;
                }
                if layer.dirty {
                    stats.dirty += 1;
                }
                if layer.cache.is_some() {
                    stats.cached += 1;
                }
                stats.total_objects += layer.object_count as u64;
                stats.total_vertices += layer.vertex_count as u64;
            }
            stats
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn layer_zero_always_exists() {
        let reg = LayerRegistry::new(255);
        assert!(reg.contains(0));
        let freed = reg.reap_idle();
        assert!(freed.0.is_empty());
        assert!(reg.contains(0));
    }

    #[test]
    fn lazy_creation_with_defaults() {
        let reg = LayerRegistry::new(255);
        assert!(reg.get_or_create(7));
        let layer = reg.snapshot(7).unwrap();
        assert!(layer.visible);
        assert_eq!(layer.opacity, 1.0);
        assert_eq!(layer.blend_mode, BlendMode::Alpha);
        assert_eq!(layer.z_order, 7.0);
        assert!(layer.dirty);
    }

    #[test]
    fn out_of_range_rejected() {
        let reg = LayerRegistry::new(16);
        assert!(!reg.get_or_create(16));
        assert!(!reg.contains(16));
    }

    #[test]
    fn opacity_clamped() {
        let reg = LayerRegistry::new(255);
        reg.set_opacity(1, 2.5);
        assert_eq!(reg.snapshot(1).unwrap().opacity, 1.0);
        reg.set_opacity(1, -3.0);
        assert_eq!(reg.snapshot(1).unwrap().opacity, 0.0);
    }

    #[test]
    fn render_order_sorts_by_z_then_id() {
        let reg = LayerRegistry::new(255);
        reg.get_or_create(1);
        reg.get_or_create(2);
        reg.set_z_order(1, 1.0);
        reg.set_z_order(2, 0.5);
        reg.set_visibility(0, false);

        let order: Vec<u8> = reg.visible_in_render_order().iter().map(|l| l.id).collect();
        assert_eq!(order, vec![2, 1]);
    }

    #[test]
    fn equal_z_breaks_ties_by_id() {
        let reg = LayerRegistry::new(255);
        reg.get_or_create(5);
        reg.get_or_create(3);
        reg.set_z_order(5, 1.0);
        reg.set_z_order(3, 1.0);
        reg.set_visibility(0, false);

        let order: Vec<u8> = reg.visible_in_render_order().iter().map(|l| l.id).collect();
        assert_eq!(order, vec![3, 5]);
    }

    #[test]
    fn clear_resets_counts_and_marks_dirty() {
        let reg = LayerRegistry::new(255);
        reg.add_content(2, 3, 120);
        reg.mark_clean(2);
        reg.clear(2);
        let layer = reg.snapshot(2).unwrap();
        assert_eq!(layer.object_count, 0);
        assert_eq!(layer.vertex_count, 0);
        assert!(layer.dirty);
    }

    #[test]
    fn invisible_layers_excluded_from_render_order() {
        let reg = LayerRegistry::new(255);
        reg.get_or_create(1);
        reg.set_visibility(1, false);
        let ids: Vec<u8> = reg.visible_in_render_order().iter().map(|l| l.id).collect();
        assert_eq!(ids, vec![0]);
    }
}
