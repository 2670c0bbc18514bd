//! The internal render command model.
//!
//! This is deliberately not the wire format: wire payloads are compact and
//! carry graphics-context ids, while these commands are self-contained so
//! the render thread never consults session state. Variable tails (text,
//! vertices, polygon points) are owned by the variant that needs them.

pub mod convert;
pub mod queue;

use std::time::Instant;

use kairos_proto::types::{Color, Point, TexturedVertex};

pub use convert::{GcRegistry, assign_priority, from_frame};
pub use queue::{CommandQueue, QueueStats};

/// Strict ordering across classes; FIFO within a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub const COUNT: usize = 4;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-variant payload of a render command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    DrawPoint {
        position: Point,
        color: Color,
    },
    DrawLine {
        start: Point,
        end: Point,
        color: Color,
        thickness: f32,
    },
    DrawRectangle {
        position: Point,
        width: f32,
        height: f32,
        color: Color,
        filled: bool,
    },
    DrawCircle {
        center: Point,
        radius: f32,
        color: Color,
        filled: bool,
    },
    DrawArc {
        center: Point,
        radius_x: f32,
        radius_y: f32,
        start_angle_deg: f32,
        end_angle_deg: f32,
        color: Color,
        filled: bool,
    },
    DrawPolygon {
        points: Vec<Point>,
        color: Color,
        filled: bool,
    },
    DrawText {
        position: Point,
        font_id: u32,
        font_size: f32,
        color: Color,
        text: String,
    },
    DrawTexturedQuads {
        texture_id: u32,
        vertices: Vec<TexturedVertex>,
    },
    ClearLayer,
    ClearAllLayers,
    SetLayerVisibility {
        visible: bool,
    },
    SetViewport {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    SetCamera {
        target: Point,
        offset: Point,
        rotation: f32,
        zoom: f32,
    },
}

impl CommandKind {
    /// Stable discriminant used for render-affinity sorting (layer, tag).
    pub fn tag(&self) -> u8 {
        match self {
            CommandKind::DrawPoint { .. } => 0,
            CommandKind::DrawLine { .. } => 1,
            CommandKind::DrawRectangle { .. } => 2,
            CommandKind::DrawCircle { .. } => 3,
            CommandKind::DrawArc { .. } => 4,
            CommandKind::DrawPolygon { .. } => 5,
            CommandKind::DrawText { .. } => 6,
            CommandKind::DrawTexturedQuads { .. } => 7,
            CommandKind::ClearLayer => 8,
            CommandKind::ClearAllLayers => 9,
            CommandKind::SetLayerVisibility { .. } => 10,
            CommandKind::SetViewport { .. } => 11,
            CommandKind::SetCamera { .. } => 12,
        }
    }

    pub fn is_draw(&self) -> bool {
        self.tag() <= 7
    }

    /// Rough vertex cost, used by layer statistics.
    pub fn estimated_vertices(&self) -> usize {
        match self {
            CommandKind::DrawPoint { .. } => 4,
            CommandKind::DrawLine { .. } => 4,
            CommandKind::DrawRectangle { filled, .. } => {
                if *filled {
                    4
                } else {
                    16
                }
            }
            CommandKind::DrawCircle { .. } | CommandKind::DrawArc { .. } => 34,
            CommandKind::DrawPolygon { points, .. } => points.len(),
            CommandKind::DrawText { text, .. } => text.chars().count() * 4,
            CommandKind::DrawTexturedQuads { vertices, .. } => vertices.len(),
            _ => 0,
        }
    }
}

/// A render command with provenance and scheduling metadata.
#[derive(Debug, Clone)]
pub struct RenderCommand {
    pub kind: CommandKind,
    pub priority: Priority,
    pub layer_id: u8,
    pub client_id: u32,
    pub sequence: u32,
    /// Sender's timestamp from the frame header, microseconds.
    pub timestamp_us: u64,
    /// When the server enqueued this command (wait-time accounting).
    pub enqueued_at: Instant,
}

impl RenderCommand {
    pub fn new(kind: CommandKind, layer_id: u8) -> Self {
        let priority = if layer_id == 0 { Priority::High } else { Priority::Normal };
        Self {
            kind,
            priority,
            layer_id,
            client_id: 0,
            sequence: 0,
            timestamp_us: 0,
            enqueued_at: Instant::now(),
        }
    }
}
