//! Font registry: glyph metrics and atlas bookkeeping.
//!
//! The server does not rasterize. Clients upload pre-rendered atlases
//! (`UPLOAD_FONT_TEXTURE`) and the registry serves the metrics the text
//! shaper needs: source rectangle in the atlas, bearing, and advance.
//! Font id 0 is a built-in monospace metric set bound to the white
//! texture, used whenever a command references an unknown font.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use kairos_proto::types::{Point, Rect};

/// Metrics for one glyph, in atlas pixel units at the font's base size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    /// Source rectangle inside the atlas texture.
    pub source: Rect,
    /// Pen-relative draw offset.
    pub bearing: Point,
    /// Pen advance after this glyph.
    pub advance: f32,
}

#[derive(Debug)]
pub struct FontData {
    pub font_id: u32,
    /// Size the atlas was rasterized at; draw size scales against this.
    pub base_size: f32,
    /// Atlas texture id (client id, resolved through the texture registry).
    pub atlas_texture: u32,
    pub atlas_width: u32,
    pub atlas_height: u32,
    glyphs: DashMap<u32, Glyph>,
    /// Metric used for codepoints the atlas does not cover.
    fallback: Glyph,
}

impl FontData {
    pub fn glyph(&self, codepoint: u32) -> Glyph {
        self.glyphs.get(&codepoint).map(|g| *g).unwrap_or(self.fallback)
    }

    pub fn insert_glyph(&self, codepoint: u32, glyph: Glyph) {
        self.glyphs.insert(codepoint, glyph);
    }

    /// Kerning adjustment between two codepoints. Atlas uploads carry no
    /// kerning tables yet, so this is zero for every pair.
    pub fn kerning(&self, _left: u32, _right: u32) -> f32 {
        0.0
    }

    pub fn glyph_count(&self) -> usize {
        self.glyphs.len()
    }
}

pub const DEFAULT_FONT_ID: u32 = 0;

#[derive(Default)]
pub struct FontRegistry {
    fonts: DashMap<u32, Arc<FontData>>,
    missing_lookups: AtomicU64,
}

impl FontRegistry {
    pub fn new() -> Self {
        let reg = Self::default();
        // Built-in monospace metrics: 8×16 cells at base size 16, advance 10.
        let default = FontData {
            font_id: DEFAULT_FONT_ID,
            base_size: 16.0,
            atlas_texture: crate::render::resources::WHITE_TEXTURE_ID,
            atlas_width: 1,
            atlas_height: 1,
            glyphs: DashMap::new(),
            fallback: Glyph {
                source: Rect::new(0.0, 0.0, 8.0, 16.0),
                bearing: Point::new(0.0, 0.0),
                advance: 10.0,
            },
        };
        reg.fonts.insert(DEFAULT_FONT_ID, Arc::new(default));
        reg
    }

    /// Register a client-supplied font whose glyphs arrive via
    /// [`FontData::insert_glyph`]. `advance` seeds the fallback metric.
    pub fn register(
        &self,
        font_id: u32,
        base_size: f32,
        atlas_texture: u32,
        atlas_width: u32,
        atlas_height: u32,
        advance: f32,
    ) -> Arc<FontData> {
        let font = Arc::new(FontData {
            font_id,
            base_size,
            atlas_texture,
            atlas_width,
            atlas_height,
            glyphs: DashMap::new(),
            fallback: Glyph {
                source: Rect::new(0.0, 0.0, advance.max(1.0), base_size),
                bearing: Point::new(0.0, 0.0),
                advance,
            },
        });
        self.fonts.insert(font_id, Arc::clone(&font));
        font
    }

    /// Load a font from raw file bytes.
    ///
    /// Not implemented: the server carries no rasterizer, so there is no
    /// way to build an atlas from font data yet. Returns `None` until one
    /// exists; callers fall back to uploaded atlases or the default font.
    pub fn load_from_memory(&self, _data: &[u8], _base_size: f32) -> Option<u32> {
        None
    }

    pub fn unload(&self, font_id: u32) -> bool {
        if font_id == DEFAULT_FONT_ID {
            return false;
        }
        self.fonts.remove(&font_id).is_some()
    }

    /// Resolve a font id, substituting the default font for unknown ids
    /// (counted, not fatal).
    pub fn resolve(&self, font_id: u32) -> Arc<FontData> {
        if let Some(font) = self.fonts.get(&font_id) {
            return Arc::clone(font.value());
        }
        self.missing_lookups.fetch_add(1, Ordering::Relaxed);
        // The default font is inserted in new() and never removed.
        match self.fonts.get(&DEFAULT_FONT_ID) {
            Some(font) => Arc::clone(font.value()),
            None => unreachable!("default font is never unloaded"),
        }
    }

    pub fn missing_lookups(&self) -> u64 {
        self.missing_lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.fonts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_font_exists_and_is_permanent() {
        let reg = FontRegistry::new();
        assert!(!reg.unload(DEFAULT_FONT_ID));
        let font = reg.resolve(DEFAULT_FONT_ID);
        assert_eq!(font.base_size, 16.0);
        assert_eq!(font.glyph('A' as u32).advance, 10.0);
    }

    #[test]
    fn unknown_font_substitutes_default_and_counts() {
        let reg = FontRegistry::new();
        let font = reg.resolve(99);
        assert_eq!(font.font_id, DEFAULT_FONT_ID);
        assert_eq!(reg.missing_lookups(), 1);
    }

    #[test]
    fn memory_loading_reports_unimplemented() {
        let reg = FontRegistry::new();
        assert!(reg.load_from_memory(&[0u8; 16], 16.0).is_none());
    }

    #[test]
    fn registered_glyphs_override_fallback() {
        let reg = FontRegistry::new();
        let font = reg.register(5, 32.0, 3, 256, 256, 12.0);
        font.insert_glyph(
            'A' as u32,
            Glyph {
                source: Rect::new(10.0, 20.0, 14.0, 28.0),
                bearing: Point::new(1.0, 2.0),
                advance: 15.0,
            },
        );
        assert_eq!(reg.resolve(5).glyph('A' as u32).advance, 15.0);
        assert_eq!(reg.resolve(5).glyph('B' as u32).advance, 12.0);
    }
}
