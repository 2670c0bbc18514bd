//! Per-tag payload schemas and their codecs.
//!
//! Layouts are fixed and packed; variable tails (text, vertex arrays,
//! polygon points) declare their extent in the fixed prefix and the decoder
//! rejects any disagreement with the actual payload size as a
//! [`KairosError::Protocol`] error (the frame itself was well-formed, so
//! the session survives and the command is dropped).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ErrorCode, KairosError, Result};
use crate::types::{Color, Point, TexturedVertex};

/// Wire size of the fixed client-name field in `CLIENT_HELLO`.
pub const CLIENT_NAME_LEN: usize = 64;
/// Wire size of the message field in `ERROR_RESPONSE`.
pub const ERROR_MESSAGE_LEN: usize = 128;
/// Wire size of one [`TexturedVertex`].
pub const VERTEX_LEN: usize = 20;

fn short(what: &str) -> KairosError {
    KairosError::Protocol(format!("{what}: payload too short"))
}

fn trailing(what: &str, extra: usize) -> KairosError {
    KairosError::Protocol(format!("{what}: {extra} trailing bytes"))
}

fn get_point(buf: &mut &[u8]) -> Point {
    Point::new(buf.get_f32(), buf.get_f32())
}

fn put_point(buf: &mut BytesMut, p: Point) {
    buf.put_f32(p.x);
    buf.put_f32(p.y);
}

/// Decode a NUL-terminated fixed-width string field.
fn get_fixed_str(buf: &mut &[u8], width: usize, what: &str) -> Result<String> {
    if buf.remaining() < width {
        return Err(short(what));
    }
    let raw = &buf[..width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    let s = std::str::from_utf8(&raw[..end])
        .map_err(|_| KairosError::Protocol(format!("{what}: invalid utf-8")))?
        .to_owned();
    buf.advance(width);
    Ok(s)
}

fn put_fixed_str(buf: &mut BytesMut, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width - 1);
    buf.put_slice(&bytes[..n]);
    buf.put_bytes(0, width - n);
}

/// `CLIENT_HELLO` — first message a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_name: String,
    pub client_version: u32,
    pub requested_layers: u32,
    pub capabilities: u32,
}

impl ClientHello {
    pub const WIRE_LEN: usize = CLIENT_NAME_LEN + 12;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        let client_name = get_fixed_str(&mut buf, CLIENT_NAME_LEN, "client_hello")?;
        if buf.remaining() < 12 {
            return Err(short("client_hello"));
        }
        let out = Self {
            client_name,
            client_version: buf.get_u32(),
            requested_layers: buf.get_u32(),
            capabilities: buf.get_u32(),
        };
        if buf.has_remaining() {
            return Err(trailing("client_hello", buf.remaining()));
        }
        Ok(out)
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        put_fixed_str(&mut buf, &self.client_name, CLIENT_NAME_LEN);
        buf.put_u32(self.client_version);
        buf.put_u32(self.requested_layers);
        buf.put_u32(self.capabilities);
        buf.freeze()
    }
}

/// `SERVER_HELLO` — the server's handshake reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: u32,
    pub max_clients: u32,
    pub assigned_client_id: u32,
    pub server_capabilities: u32,
    pub max_layers: u32,
}

impl ServerHello {
    pub const WIRE_LEN: usize = 20;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("server_hello"));
        }
        Ok(Self {
            server_version: buf.get_u32(),
            max_clients: buf.get_u32(),
            assigned_client_id: buf.get_u32(),
            server_capabilities: buf.get_u32(),
            max_layers: buf.get_u32(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.server_version);
        buf.put_u32(self.max_clients);
        buf.put_u32(self.assigned_client_id);
        buf.put_u32(self.server_capabilities);
        buf.put_u32(self.max_layers);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawPointData {
    pub gc_id: u32,
    pub position: Point,
}

impl DrawPointData {
    pub const WIRE_LEN: usize = 12;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("draw_point"));
        }
        Ok(Self { gc_id: buf.get_u32(), position: get_point(&mut buf) })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.gc_id);
        put_point(&mut buf, self.position);
        buf.freeze()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawLineData {
    pub gc_id: u32,
    pub start: Point,
    pub end: Point,
}

impl DrawLineData {
    pub const WIRE_LEN: usize = 20;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("draw_line"));
        }
        Ok(Self {
            gc_id: buf.get_u32(),
            start: get_point(&mut buf),
            end: get_point(&mut buf),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.gc_id);
        put_point(&mut buf, self.start);
        put_point(&mut buf, self.end);
        buf.freeze()
    }
}

/// Shared by `DRAW_RECTANGLE` and `FILL_RECTANGLE`; there is no filled flag
/// on the wire, the tag decides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRectangleData {
    pub gc_id: u32,
    pub position: Point,
    pub width: f32,
    pub height: f32,
}

impl DrawRectangleData {
    pub const WIRE_LEN: usize = 20;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("draw_rectangle"));
        }
        Ok(Self {
            gc_id: buf.get_u32(),
            position: get_point(&mut buf),
            width: buf.get_f32(),
            height: buf.get_f32(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.gc_id);
        put_point(&mut buf, self.position);
        buf.put_f32(self.width);
        buf.put_f32(self.height);
        buf.freeze()
    }
}

/// Shared by `DRAW_ARC` and `FILL_ARC`. Angles are in degrees, X11-style;
/// width/height describe the bounding ellipse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawArcData {
    pub gc_id: u32,
    pub center: Point,
    pub width: f32,
    pub height: f32,
    pub angle1: i16,
    pub angle2: i16,
}

impl DrawArcData {
    pub const WIRE_LEN: usize = 24;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("draw_arc"));
        }
        Ok(Self {
            gc_id: buf.get_u32(),
            center: get_point(&mut buf),
            width: buf.get_f32(),
            height: buf.get_f32(),
            angle1: buf.get_i16(),
            angle2: buf.get_i16(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.gc_id);
        put_point(&mut buf, self.center);
        buf.put_f32(self.width);
        buf.put_f32(self.height);
        buf.put_i16(self.angle1);
        buf.put_i16(self.angle2);
        buf.freeze()
    }
}

/// Shared by `DRAW_POLYGON` and `FILL_POLYGON`. The prefix declares the
/// point count; the tail must match exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawPolygonData {
    pub gc_id: u32,
    pub shape: u8,
    pub coord_mode: u8,
    pub points: Vec<Point>,
}

impl DrawPolygonData {
    pub const PREFIX_LEN: usize = 8;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::PREFIX_LEN {
            return Err(short("draw_polygon"));
        }
        let gc_id = buf.get_u32();
        let shape = buf.get_u8();
        let coord_mode = buf.get_u8();
        let point_count = buf.get_u16() as usize;

        let need = point_count * 8;
        if buf.remaining() != need {
            return Err(KairosError::Protocol(format!(
                "draw_polygon: declared {point_count} points, payload carries {} bytes",
                buf.remaining()
            )));
        }
        let mut points = Vec::with_capacity(point_count);
        for _ in 0..point_count {
            points.push(get_point(&mut buf));
        }
        Ok(Self { gc_id, shape, coord_mode, points })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::PREFIX_LEN + self.points.len() * 8);
        buf.put_u32(self.gc_id);
        buf.put_u8(self.shape);
        buf.put_u8(self.coord_mode);
        buf.put_u16(self.points.len() as u16);
        for p in &self.points {
            put_point(&mut buf, *p);
        }
        buf.freeze()
    }
}

/// `DRAW_TEXT` — fixed prefix followed by `text_length` UTF-8 bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTextData {
    pub gc_id: u32,
    pub font_id: u32,
    pub position: Point,
    pub font_size: f32,
    pub text: String,
}

impl DrawTextData {
    pub const PREFIX_LEN: usize = 24;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::PREFIX_LEN {
            return Err(short("draw_text"));
        }
        let gc_id = buf.get_u32();
        let font_id = buf.get_u32();
        let position = get_point(&mut buf);
        let font_size = buf.get_f32();
        let text_length = buf.get_u16() as usize;
        let _reserved = buf.get_u16();

        if buf.remaining() != text_length {
            return Err(KairosError::Protocol(format!(
                "draw_text: declared {text_length} bytes, payload carries {}",
                buf.remaining()
            )));
        }
        let text = std::str::from_utf8(buf)
            .map_err(|_| KairosError::Protocol("draw_text: invalid utf-8".into()))?
            .to_owned();
        Ok(Self { gc_id, font_id, position, font_size, text })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::PREFIX_LEN + self.text.len());
        buf.put_u32(self.gc_id);
        buf.put_u32(self.font_id);
        put_point(&mut buf, self.position);
        buf.put_f32(self.font_size);
        buf.put_u16(self.text.len() as u16);
        buf.put_u16(0);
        buf.put_slice(self.text.as_bytes());
        buf.freeze()
    }
}

/// `DRAW_TEXTURED_QUADS` — prefix declares the quad count, tail carries
/// `quad_count * 4` vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTexturedQuadsData {
    pub gc_id: u32,
    pub texture_id: u32,
    pub vertices: Vec<TexturedVertex>,
}

impl DrawTexturedQuadsData {
    pub const PREFIX_LEN: usize = 16;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::PREFIX_LEN {
            return Err(short("draw_textured_quads"));
        }
        let gc_id = buf.get_u32();
        let texture_id = buf.get_u32();
        let quad_count = buf.get_u32() as usize;
        let _reserved = buf.get_u32();

        let vertex_count = quad_count * 4;
        if buf.remaining() != vertex_count * VERTEX_LEN {
            return Err(KairosError::Protocol(format!(
                "draw_textured_quads: declared {quad_count} quads, payload carries {} bytes",
                buf.remaining()
            )));
        }
        let mut vertices = Vec::with_capacity(vertex_count);
        for _ in 0..vertex_count {
            vertices.push(TexturedVertex {
                x: buf.get_f32(),
                y: buf.get_f32(),
                u: buf.get_f32(),
                v: buf.get_f32(),
                color: buf.get_u32(),
            });
        }
        Ok(Self { gc_id, texture_id, vertices })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf =
            BytesMut::with_capacity(Self::PREFIX_LEN + self.vertices.len() * VERTEX_LEN);
        buf.put_u32(self.gc_id);
        buf.put_u32(self.texture_id);
        buf.put_u32((self.vertices.len() / 4) as u32);
        buf.put_u32(0);
        for v in &self.vertices {
            buf.put_f32(v.x);
            buf.put_f32(v.y);
            buf.put_f32(v.u);
            buf.put_f32(v.v);
            buf.put_u32(v.color);
        }
        buf.freeze()
    }
}

/// `UPLOAD_FONT_TEXTURE` — atlas pixel upload.
#[derive(Debug, Clone, PartialEq)]
pub struct FontTextureData {
    pub texture_id: u32,
    pub width: u32,
    pub height: u32,
    pub format: u32,
    pub pixels: Bytes,
}

impl FontTextureData {
    pub const PREFIX_LEN: usize = 20;

    pub fn decode(buf: &Bytes) -> Result<Self> {
        let mut prefix = &buf[..];
        if prefix.remaining() < Self::PREFIX_LEN {
            return Err(short("font_texture"));
        }
        let texture_id = prefix.get_u32();
        let width = prefix.get_u32();
        let height = prefix.get_u32();
        let format = prefix.get_u32();
        let data_size = prefix.get_u32() as usize;
        if prefix.remaining() != data_size {
            return Err(KairosError::Protocol(format!(
                "font_texture: declared {data_size} pixel bytes, payload carries {}",
                prefix.remaining()
            )));
        }
        Ok(Self {
            texture_id,
            width,
            height,
            format,
            pixels: buf.slice(Self::PREFIX_LEN..),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::PREFIX_LEN + self.pixels.len());
        buf.put_u32(self.texture_id);
        buf.put_u32(self.width);
        buf.put_u32(self.height);
        buf.put_u32(self.format);
        buf.put_u32(self.pixels.len() as u32);
        buf.put_slice(&self.pixels);
        buf.freeze()
    }
}

/// `SET_LAYER_VISIBILITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerVisibilityData {
    pub layer_id: u8,
    pub visible: bool,
}

impl LayerVisibilityData {
    pub const WIRE_LEN: usize = 4;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("layer_visibility"));
        }
        let layer_id = buf.get_u8();
        let visible = buf.get_u8() != 0;
        let _reserved = buf.get_u16();
        Ok(Self { layer_id, visible })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(self.layer_id);
        buf.put_u8(self.visible as u8);
        buf.put_u16(0);
        buf.freeze()
    }
}

/// `SET_FOREGROUND` / `SET_BACKGROUND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetColorData {
    pub gc_id: u32,
    pub color: Color,
}

impl SetColorData {
    pub const WIRE_LEN: usize = 8;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("set_color"));
        }
        Ok(Self { gc_id: buf.get_u32(), color: Color::from_packed(buf.get_u32()) })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.gc_id);
        buf.put_u32(self.color.packed());
        buf.freeze()
    }
}

/// `SET_FONT_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetFontSizeData {
    pub gc_id: u32,
    pub font_id: u32,
    pub font_size: f32,
}

impl SetFontSizeData {
    pub const WIRE_LEN: usize = 12;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("set_font_size"));
        }
        Ok(Self { gc_id: buf.get_u32(), font_id: buf.get_u32(), font_size: buf.get_f32() })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.gc_id);
        buf.put_u32(self.font_id);
        buf.put_f32(self.font_size);
        buf.freeze()
    }
}

/// `PING` — monotonic timestamp echoed back in `PONG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingData {
    pub client_timestamp: u64,
}

impl PingData {
    pub const WIRE_LEN: usize = 8;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("ping"));
        }
        Ok(Self { client_timestamp: buf.get_u64() })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u64(self.client_timestamp);
        buf.freeze()
    }
}

/// `PONG` — echo plus a snapshot of server load for client-side pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongData {
    pub client_timestamp: u64,
    pub server_timestamp: u64,
    pub server_load: u32,
    pub queue_depth: u32,
}

impl PongData {
    pub const WIRE_LEN: usize = 24;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("pong"));
        }
        Ok(Self {
            client_timestamp: buf.get_u64(),
            server_timestamp: buf.get_u64(),
            server_load: buf.get_u32(),
            queue_depth: buf.get_u32(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u64(self.client_timestamp);
        buf.put_u64(self.server_timestamp);
        buf.put_u32(self.server_load);
        buf.put_u32(self.queue_depth);
        buf.freeze()
    }
}

/// `ERROR_RESPONSE` — carries the failing command's sequence for
/// correlation on the client side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponseData {
    pub error_code: ErrorCode,
    pub original_sequence: u32,
    pub message: String,
}

impl ErrorResponseData {
    pub const WIRE_LEN: usize = 8 + ERROR_MESSAGE_LEN;

    pub fn new(error_code: ErrorCode, original_sequence: u32, message: impl Into<String>) -> Self {
        Self { error_code, original_sequence, message: message.into() }
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < 8 {
            return Err(short("error_response"));
        }
        let raw_code = buf.get_u32();
        let error_code = ErrorCode::from_u32(raw_code)
            .ok_or_else(|| KairosError::Protocol(format!("unknown error code {raw_code}")))?;
        let original_sequence = buf.get_u32();
        let message = get_fixed_str(&mut buf, ERROR_MESSAGE_LEN, "error_response")?;
        Ok(Self { error_code, original_sequence, message })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.error_code as u32);
        buf.put_u32(self.original_sequence);
        put_fixed_str(&mut buf, &self.message, ERROR_MESSAGE_LEN);
        buf.freeze()
    }
}

/// Input event categories carried by `INPUT_EVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputEventKind {
    KeyPress = 0x01,
    KeyRelease = 0x02,
    MouseMove = 0x03,
    MousePress = 0x04,
    MouseRelease = 0x05,
    MouseWheel = 0x06,
    TouchBegin = 0x07,
    TouchMove = 0x08,
    TouchEnd = 0x09,
}

impl InputEventKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => InputEventKind::KeyPress,
            0x02 => InputEventKind::KeyRelease,
            0x03 => InputEventKind::MouseMove,
            0x04 => InputEventKind::MousePress,
            0x05 => InputEventKind::MouseRelease,
            0x06 => InputEventKind::MouseWheel,
            0x07 => InputEventKind::TouchBegin,
            0x08 => InputEventKind::TouchMove,
            0x09 => InputEventKind::TouchEnd,
            _ => return None,
        })
    }
}

/// `INPUT_EVENT` — server-to-client input notification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEventData {
    pub kind: InputEventKind,
    /// Mouse button or key code.
    pub button: u8,
    /// Ctrl/Shift/Alt flags.
    pub modifiers: u16,
    pub position: Point,
    pub wheel_delta: f32,
    pub timestamp_us: u64,
}

impl InputEventData {
    pub const WIRE_LEN: usize = 24;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("input_event"));
        }
        let raw_kind = buf.get_u8();
        let kind = InputEventKind::from_u8(raw_kind)
            .ok_or_else(|| KairosError::Protocol(format!("unknown input kind {raw_kind:#04x}")))?;
        Ok(Self {
            kind,
            button: buf.get_u8(),
            modifiers: buf.get_u16(),
            position: get_point(&mut buf),
            wheel_delta: buf.get_f32(),
            timestamp_us: buf.get_u64(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.button);
        buf.put_u16(self.modifiers);
        put_point(&mut buf, self.position);
        buf.put_f32(self.wheel_delta);
        buf.put_u64(self.timestamp_us);
        buf.freeze()
    }
}

/// `FRAME_CALLBACK` — broadcast once per frame to clients that negotiated
/// the capability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameCallbackData {
    pub frame_number: u32,
    pub frame_time_us: u64,
    pub frame_rate: f32,
    pub dropped_frames: u32,
}

impl FrameCallbackData {
    pub const WIRE_LEN: usize = 20;

    pub fn decode(mut buf: &[u8]) -> Result<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(short("frame_callback"));
        }
        Ok(Self {
            frame_number: buf.get_u32(),
            frame_time_us: buf.get_u64(),
            frame_rate: buf.get_f32(),
            dropped_frames: buf.get_u32(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_LEN);
        buf.put_u32(self.frame_number);
        buf.put_u64(self.frame_time_us);
        buf.put_f32(self.frame_rate);
        buf.put_u32(self.dropped_frames);
        buf.freeze()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_hello_round_trip() {
        let hello = ClientHello {
            client_name: "probe".into(),
            client_version: 1,
            requested_layers: 4,
            capabilities: 0x0001,
        };
        let wire = hello.encode();
        assert_eq!(wire.len(), ClientHello::WIRE_LEN);
        assert_eq!(ClientHello::decode(&wire).unwrap(), hello);
    }

    #[test]
    fn client_hello_name_truncated_not_overflowed() {
        let hello = ClientHello {
            client_name: "x".repeat(200),
            client_version: 1,
            requested_layers: 1,
            capabilities: 0,
        };
        let wire = hello.encode();
        assert_eq!(wire.len(), ClientHello::WIRE_LEN);
        let back = ClientHello::decode(&wire).unwrap();
        assert_eq!(back.client_name.len(), CLIENT_NAME_LEN - 1);
    }

    #[test]
    fn text_size_mismatch_rejected() {
        let data = DrawTextData {
            gc_id: 1,
            font_id: 2,
            position: Point::new(0.0, 0.0),
            font_size: 16.0,
            text: "hello".into(),
        };
        let mut wire = BytesMut::from(&data.encode()[..]);
        // Lie about the declared length.
        wire[20] = 0;
        wire[21] = 3;
        assert!(matches!(
            DrawTextData::decode(&wire).unwrap_err(),
            KairosError::Protocol(_)
        ));
    }

    #[test]
    fn quads_round_trip_and_count_check() {
        let data = DrawTexturedQuadsData {
            gc_id: 0,
            texture_id: 9,
            vertices: (0..8)
                .map(|i| TexturedVertex::new(i as f32, 0.0, 0.0, 1.0, 0xFFFF_FFFF))
                .collect(),
        };
        let wire = data.encode();
        let back = DrawTexturedQuadsData::decode(&wire).unwrap();
        assert_eq!(back, data);

        // Truncated tail must be rejected, not partially parsed.
        assert!(DrawTexturedQuadsData::decode(&wire[..wire.len() - 4]).is_err());
    }

    #[test]
    fn polygon_round_trip() {
        let data = DrawPolygonData {
            gc_id: 3,
            shape: 2,
            coord_mode: 0,
            points: vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0), Point::new(5.0, 8.0)],
        };
        let wire = data.encode();
        assert_eq!(DrawPolygonData::decode(&wire).unwrap(), data);
    }

    #[test]
    fn error_response_message_fits_fixed_field() {
        let e = ErrorResponseData::new(ErrorCode::ProtocolError, 77, "m".repeat(500));
        let wire = e.encode();
        assert_eq!(wire.len(), ErrorResponseData::WIRE_LEN);
        let back = ErrorResponseData::decode(&wire).unwrap();
        assert_eq!(back.error_code, ErrorCode::ProtocolError);
        assert_eq!(back.original_sequence, 77);
        assert_eq!(back.message.len(), ERROR_MESSAGE_LEN - 1);
    }

    #[test]
    fn input_event_round_trip() {
        let e = InputEventData {
            kind: InputEventKind::MousePress,
            button: 1,
            modifiers: 0x0004,
            position: Point::new(320.0, 240.0),
            wheel_delta: 0.0,
            timestamp_us: 99,
        };
        let wire = e.encode();
        assert_eq!(wire.len(), InputEventData::WIRE_LEN);
        assert_eq!(InputEventData::decode(&wire).unwrap(), e);
    }

    #[test]
    fn unknown_input_kind_rejected() {
        let e = InputEventData {
            kind: InputEventKind::KeyPress,
            button: 0,
            modifiers: 0,
            position: Point::new(0.0, 0.0),
            wheel_delta: 0.0,
            timestamp_us: 0,
        };
        let mut wire = BytesMut::from(&e.encode()[..]);
        wire[0] = 0x7F;
        assert!(InputEventData::decode(&wire).is_err());
    }

    #[test]
    fn pong_round_trip() {
        let p = PongData {
            client_timestamp: 1,
            server_timestamp: 2,
            server_load: 3,
            queue_depth: 4,
        };
        assert_eq!(PongData::decode(&p.encode()).unwrap(), p);
    }
}
