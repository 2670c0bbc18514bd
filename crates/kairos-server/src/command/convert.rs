//! Wire frame → render command conversion.
//!
//! The converter reads a validated (header, payload) pair, resolves the
//! graphics-context tint, and produces a self-contained [`RenderCommand`].
//! Size disagreements between a payload's declared extent and its actual
//! bytes surface as `KairosError::Protocol` — the session answers with an
//! `ERROR_RESPONSE` and drops the command, keeping the connection alive.

use std::collections::HashMap;

use kairos_proto::payload::{
    DrawArcData, DrawLineData, DrawPointData, DrawPolygonData, DrawRectangleData, DrawTextData,
    DrawTexturedQuadsData, LayerVisibilityData, SetColorData, SetFontSizeData,
};
use kairos_proto::types::Color;
use kairos_proto::wire::{MessageHeader, MessageType};
use kairos_proto::{KairosError, Result};

use super::{CommandKind, Priority, RenderCommand};

/// Per-session graphics-context attribute table.
///
/// Draw payloads reference a `gc_id`; the wire carries no color of its own,
/// so the tint comes from the most recent `SET_FOREGROUND` for that gc
/// (opaque white until a client sets one).
#[derive(Debug, Default)]
pub struct GcRegistry {
    table: HashMap<u32, GcAttrs>,
}

#[derive(Debug, Clone, Copy)]
pub struct GcAttrs {
    pub foreground: Color,
    pub background: Color,
    pub font_id: u32,
    pub font_size: f32,
}

impl Default for GcAttrs {
    fn default() -> Self {
        Self {
            foreground: Color::WHITE,
            background: Color::BLACK,
            font_id: 0,
            font_size: 16.0,
        }
    }
}

impl GcRegistry {
    pub fn create(&mut self, gc_id: u32) {
        self.table.entry(gc_id).or_default();
    }

    pub fn free(&mut self, gc_id: u32) {
        self.table.remove(&gc_id);
    }

    pub fn set_foreground(&mut self, data: SetColorData) {
        self.table.entry(data.gc_id).or_default().foreground = data.color;
    }

    pub fn set_background(&mut self, data: SetColorData) {
        self.table.entry(data.gc_id).or_default().background = data.color;
    }

    pub fn set_font(&mut self, data: SetFontSizeData) {
        let attrs = self.table.entry(data.gc_id).or_default();
        attrs.font_id = data.font_id;
        attrs.font_size = data.font_size;
    }

    pub fn foreground(&self, gc_id: u32) -> Color {
        self.table.get(&gc_id).map(|a| a.foreground).unwrap_or(Color::WHITE)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Priority policy: layer 0 is the UI/HUD convention and always urgent;
/// clears must not queue behind the geometry they are meant to erase.
pub fn assign_priority(msg_type: MessageType, layer_id: u8) -> Priority {
    if layer_id == 0 {
        return Priority::High;
    }
    match msg_type {
        MessageType::ClearLayer | MessageType::ClearAllLayers => Priority::High,
        _ => Priority::Normal,
    }
}

/// Convert a draw/layer frame into a render command.
///
/// Only call this for tags the session routes to the renderer; handshake,
/// keep-alive, GC-state, and resource tags are handled upstream.
pub fn from_frame(header: &MessageHeader, payload: &[u8], gc: &GcRegistry) -> Result<RenderCommand> {
    let kind = match header.msg_type {
        MessageType::DrawPoint => {
            let data = DrawPointData::decode(payload)?;
            CommandKind::DrawPoint {
                position: data.position,
                color: gc.foreground(data.gc_id),
            }
        }
        MessageType::DrawLine => {
            let data = DrawLineData::decode(payload)?;
            CommandKind::DrawLine {
                start: data.start,
                end: data.end,
                color: gc.foreground(data.gc_id),
                thickness: 1.0,
            }
        }
        MessageType::DrawRectangle | MessageType::FillRectangle => {
            let data = DrawRectangleData::decode(payload)?;
            if data.width < 0.0 || data.height < 0.0 {
                return Err(KairosError::Protocol("rectangle with negative extent".into()));
            }
            CommandKind::DrawRectangle {
                position: data.position,
                width: data.width,
                height: data.height,
                color: gc.foreground(data.gc_id),
                filled: header.msg_type == MessageType::FillRectangle,
            }
        }
        MessageType::DrawArc | MessageType::FillArc => {
            let data = DrawArcData::decode(payload)?;
            if data.width < 0.0 || data.height < 0.0 {
                return Err(KairosError::Protocol("arc with negative extent".into()));
            }
            let filled = header.msg_type == MessageType::FillArc;
            let sweep = (data.angle2 as i32 - data.angle1 as i32).unsigned_abs();
            // A full-turn arc over a circular bound is just a circle.
            if sweep >= 360 && (data.width - data.height).abs() < f32::EPSILON {
                CommandKind::DrawCircle {
                    center: data.center,
                    radius: data.width * 0.5,
                    color: gc.foreground(data.gc_id),
                    filled,
                }
            } else {
                CommandKind::DrawArc {
                    center: data.center,
                    radius_x: data.width * 0.5,
                    radius_y: data.height * 0.5,
                    start_angle_deg: data.angle1 as f32,
                    end_angle_deg: data.angle2 as f32,
                    color: gc.foreground(data.gc_id),
                    filled,
                }
            }
        }
        MessageType::DrawPolygon | MessageType::FillPolygon => {
            let data = DrawPolygonData::decode(payload)?;
            if data.points.len() < 3 {
                return Err(KairosError::Protocol("polygon with fewer than 3 points".into()));
            }
            CommandKind::DrawPolygon {
                points: data.points,
                color: gc.foreground(data.gc_id),
                filled: header.msg_type == MessageType::FillPolygon,
            }
        }
        MessageType::DrawText => {
            let data = DrawTextData::decode(payload)?;
            CommandKind::DrawText {
                position: data.position,
                font_id: data.font_id,
                font_size: data.font_size,
                color: gc.foreground(data.gc_id),
                text: data.text,
            }
        }
        MessageType::DrawTexturedQuads => {
            let data = DrawTexturedQuadsData::decode(payload)?;
            CommandKind::DrawTexturedQuads {
                texture_id: data.texture_id,
                vertices: data.vertices,
            }
        }
        MessageType::ClearLayer => CommandKind::ClearLayer,
        MessageType::ClearAllLayers => CommandKind::ClearAllLayers,
        MessageType::SetLayerVisibility => {
            let data = LayerVisibilityData::decode(payload)?;
            CommandKind::SetLayerVisibility { visible: data.visible }
        }
        other => {
            return Err(KairosError::Protocol(format!(
                "tag {:#04x} is not a render command",
                other as u8
            )));
        }
    };

    Ok(RenderCommand {
        kind,
        priority: assign_priority(header.msg_type, header.layer_id),
        layer_id: header.layer_id,
        client_id: header.client_id,
        sequence: header.sequence,
        timestamp_us: header.timestamp_us,
        enqueued_at: std::time::Instant::now(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use kairos_proto::types::Point;

    fn header(msg_type: MessageType, layer_id: u8) -> MessageHeader {
        MessageHeader {
            msg_type,
            layer_id,
            client_id: 1,
            sequence: 1,
            data_size: 0,
            timestamp_us: 0,
        }
    }

    #[test]
    fn layer_zero_promotes_to_high() {
        assert_eq!(assign_priority(MessageType::DrawPoint, 0), Priority::High);
        assert_eq!(assign_priority(MessageType::DrawPoint, 5), Priority::Normal);
        assert_eq!(assign_priority(MessageType::ClearLayer, 5), Priority::High);
        assert_eq!(assign_priority(MessageType::DrawText, 5), Priority::Normal);
    }

    #[test]
    fn fill_tag_sets_filled_flag() {
        let data = DrawRectangleData {
            gc_id: 0,
            position: Point::new(1.0, 2.0),
            width: 3.0,
            height: 4.0,
        };
        let gc = GcRegistry::default();

        let outline =
            from_frame(&header(MessageType::DrawRectangle, 1), &data.encode(), &gc).unwrap();
        let filled =
            from_frame(&header(MessageType::FillRectangle, 1), &data.encode(), &gc).unwrap();

        assert!(matches!(outline.kind, CommandKind::DrawRectangle { filled: false, .. }));
        assert!(matches!(filled.kind, CommandKind::DrawRectangle { filled: true, .. }));
    }

    #[test]
    fn color_defaults_to_white_and_tracks_foreground() {
        let point = DrawPointData { gc_id: 7, position: Point::new(0.0, 0.0) };
        let mut gc = GcRegistry::default();

        let cmd = from_frame(&header(MessageType::DrawPoint, 1), &point.encode(), &gc).unwrap();
        assert!(matches!(cmd.kind, CommandKind::DrawPoint { color: Color::WHITE, .. }));

        gc.set_foreground(SetColorData { gc_id: 7, color: Color::rgba(9, 8, 7, 255) });
        let cmd = from_frame(&header(MessageType::DrawPoint, 1), &point.encode(), &gc).unwrap();
        assert!(
            matches!(cmd.kind, CommandKind::DrawPoint { color, .. } if color == Color::rgba(9, 8, 7, 255))
        );
    }

    #[test]
    fn full_circle_arc_becomes_circle() {
        let arc = DrawArcData {
            gc_id: 0,
            center: Point::new(10.0, 10.0),
            width: 8.0,
            height: 8.0,
            angle1: 0,
            angle2: 360,
        };
        let gc = GcRegistry::default();
        let cmd = from_frame(&header(MessageType::FillArc, 1), &arc.encode(), &gc).unwrap();
        assert!(matches!(
            cmd.kind,
            CommandKind::DrawCircle { radius, filled: true, .. } if radius == 4.0
        ));
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let gc = GcRegistry::default();
        let err = from_frame(&header(MessageType::DrawLine, 1), &[0u8; 7], &gc).unwrap_err();
        assert!(matches!(err, KairosError::Protocol(_)));
    }

    #[test]
    fn degenerate_polygon_rejected() {
        let poly = DrawPolygonData {
            gc_id: 0,
            shape: 2,
            coord_mode: 0,
            points: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
        };
        let gc = GcRegistry::default();
        assert!(from_frame(&header(MessageType::FillPolygon, 1), &poly.encode(), &gc).is_err());
    }
}
