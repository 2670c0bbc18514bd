//! Text shaping: UTF-8 strings into atlas-textured glyph quads.
//!
//! No rasterization happens here — glyphs are rectangles in a client- or
//! server-provided atlas. The pen starts at the requested position and
//! advances by each glyph's scaled advance plus kerning; pixel-perfect
//! mode rounds the pen after every glyph to keep small text crisp.

use kairos_proto::types::{Color, Point, TexturedVertex};

use super::fonts::FontData;
use super::primitives::Mesh;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextMetrics {
    pub width: f32,
    pub height: f32,
}

/// Shape `text` into one glyph quad per codepoint.
pub fn shape_text(
    font: &FontData,
    text: &str,
    position: Point,
    requested_size: f32,
    color: Color,
    pixel_perfect: bool,
) -> Mesh {
    let scale = if font.base_size > 0.0 { requested_size / font.base_size } else { 1.0 };
    let packed = color.packed();
    let atlas_w = font.atlas_width.max(1) as f32;
    let atlas_h = font.atlas_height.max(1) as f32;

    let mut mesh = Mesh { vertices: Vec::new(), indices: Vec::new() };
    mesh.vertices.reserve(text.chars().count() * 4);
    mesh.indices.reserve(text.chars().count() * 6);

    let mut pen_x = position.x;
    let pen_y = position.y;

    let mut prev: Option<u32> = None;
    for ch in text.chars() {
        let cp = ch as u32;
        if let Some(left) = prev {
            pen_x += font.kerning(left, cp) * scale;
        }

        let glyph = font.glyph(cp);
        if glyph.source.width > 0.0 && glyph.source.height > 0.0 {
            let x = pen_x + glyph.bearing.x * scale;
            let y = pen_y + glyph.bearing.y * scale;
            let w = glyph.source.width * scale;
            let h = glyph.source.height * scale;

            let u1 = glyph.source.x / atlas_w;
            let v1 = glyph.source.y / atlas_h;
            let u2 = (glyph.source.x + glyph.source.width) / atlas_w;
            let v2 = (glyph.source.y + glyph.source.height) / atlas_h;

            let base = mesh.vertices.len() as u16;
            mesh.vertices.push(TexturedVertex::new(x, y, u1, v1, packed));
            mesh.vertices.push(TexturedVertex::new(x + w, y, u2, v1, packed));
            mesh.vertices.push(TexturedVertex::new(x + w, y + h, u2, v2, packed));
            mesh.vertices.push(TexturedVertex::new(x, y + h, u1, v2, packed));
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        pen_x += glyph.advance * scale;
        if pixel_perfect {
            pen_x = pen_x.round();
        }
        prev = Some(cp);
    }

    mesh
}

/// Measure without emitting geometry.
pub fn measure_text(font: &FontData, text: &str, requested_size: f32) -> TextMetrics {
    let scale = if font.base_size > 0.0 { requested_size / font.base_size } else { 1.0 };
    let mut width = 0.0f32;
    let mut height = 0.0f32;

    let mut prev: Option<u32> = None;
    for ch in text.chars() {
        let cp = ch as u32;
        if let Some(left) = prev {
            width += font.kerning(left, cp) * scale;
        }
        let glyph = font.glyph(cp);
        width += glyph.advance * scale;
        height = height.max(glyph.source.height * scale);
        prev = Some(cp);
    }

    TextMetrics { width, height }
}
