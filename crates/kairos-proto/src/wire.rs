//! Frame codec: the fixed 32-byte message header and framing rules.
//!
//! Parsing rules:
//! - Never index (`buf[0]`) — always go through `Buf` with `remaining()`
//!   checks.
//! - A short buffer is *not* an error; [`try_decode`] reports it as
//!   `Ok(None)` and the caller retries once more bytes arrive.
//! - A header that fails validation (magic, version, size, tag) is a
//!   [`KairosError::MalformedFrame`]; the session must disconnect.
//!
//! All multi-byte integers are big-endian on the wire, including the
//! 64-bit timestamp.

use std::sync::OnceLock;
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{KairosError, Result};
use crate::types::limits;

/// `"KARO"` in big-endian ASCII.
pub const PROTOCOL_MAGIC: u32 = 0x4B41_524F;
pub const PROTOCOL_VERSION: u32 = 1;
/// Wire size of [`MessageHeader`].
pub const HEADER_LEN: usize = 32;

/// Every message tag in the protocol. Decoding rejects bytes outside this
/// set; whether the server *acts* on a tag is a separate question answered
/// by the command converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    // Handshake
    ClientHello = 0x01,
    ServerHello = 0x02,

    // Drawing
    DrawPoint = 0x10,
    DrawLine = 0x11,
    DrawRectangle = 0x12,
    FillRectangle = 0x13,
    DrawArc = 0x14,
    FillArc = 0x15,
    DrawPolygon = 0x16,
    FillPolygon = 0x17,
    DrawText = 0x18,
    DrawImageString = 0x19,
    DrawTexturedQuads = 0x1A,

    // Graphics-context state
    CreateGc = 0x20,
    FreeGc = 0x21,
    SetForeground = 0x22,
    SetBackground = 0x23,
    SetLineAttributes = 0x24,
    SetFillStyle = 0x25,
    SetFontSize = 0x26,
    SetFunction = 0x27,

    // Resources
    UploadFontTexture = 0x30,
    CreatePixmap = 0x31,
    FreePixmap = 0x32,

    // Layers
    ClearLayer = 0x40,
    ClearAllLayers = 0x41,
    SetLayerVisibility = 0x42,
    BatchBegin = 0x43,
    BatchEnd = 0x44,

    // Server-to-client events
    InputEvent = 0x50,
    FrameCallback = 0x51,

    // Keep-alive
    Ping = 0xF0,
    Pong = 0xF1,

    // Lifecycle
    ErrorResponse = 0xFE,
    Disconnect = 0xFF,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0x01 => MessageType::ClientHello,
            0x02 => MessageType::ServerHello,
            0x10 => MessageType::DrawPoint,
            0x11 => MessageType::DrawLine,
            0x12 => MessageType::DrawRectangle,
            0x13 => MessageType::FillRectangle,
            0x14 => MessageType::DrawArc,
            0x15 => MessageType::FillArc,
            0x16 => MessageType::DrawPolygon,
            0x17 => MessageType::FillPolygon,
            0x18 => MessageType::DrawText,
            0x19 => MessageType::DrawImageString,
            0x1A => MessageType::DrawTexturedQuads,
            0x20 => MessageType::CreateGc,
            0x21 => MessageType::FreeGc,
            0x22 => MessageType::SetForeground,
            0x23 => MessageType::SetBackground,
            0x24 => MessageType::SetLineAttributes,
            0x25 => MessageType::SetFillStyle,
            0x26 => MessageType::SetFontSize,
            0x27 => MessageType::SetFunction,
            0x30 => MessageType::UploadFontTexture,
            0x31 => MessageType::CreatePixmap,
            0x32 => MessageType::FreePixmap,
            0x40 => MessageType::ClearLayer,
            0x41 => MessageType::ClearAllLayers,
            0x42 => MessageType::SetLayerVisibility,
            0x43 => MessageType::BatchBegin,
            0x44 => MessageType::BatchEnd,
            0x50 => MessageType::InputEvent,
            0x51 => MessageType::FrameCallback,
            0xF0 => MessageType::Ping,
            0xF1 => MessageType::Pong,
            0xFE => MessageType::ErrorResponse,
            0xFF => MessageType::Disconnect,
            _ => return None,
        })
    }

    /// Draw-range tags (0x10–0x1A).
    pub fn is_draw(self) -> bool {
        (0x10..=0x1A).contains(&(self as u8))
    }
}

/// Parsed message header, host byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: MessageType,
    pub layer_id: u8,
    pub client_id: u32,
    pub sequence: u32,
    pub data_size: u32,
    /// Microseconds since the sender's monotonic epoch.
    pub timestamp_us: u64,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, client_id: u32, sequence: u32, data_size: u32) -> Self {
        Self {
            msg_type,
            layer_id: 0,
            client_id,
            sequence,
            data_size,
            timestamp_us: timestamp_micros(),
        }
    }

    pub fn with_layer(mut self, layer_id: u8) -> Self {
        self.layer_id = layer_id;
        self
    }
}

/// One decoded frame: validated header plus its payload bytes (zero-copy
/// slice of the receive buffer).
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: MessageHeader,
    pub payload: Bytes,
}

/// Current timestamp in microseconds since the process monotonic epoch.
pub fn timestamp_micros() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_micros() as u64
}

/// Encode a frame. The output length is exactly `HEADER_LEN + payload.len()`;
/// `header.data_size` is overwritten with the actual payload length so the
/// two can never disagree on the wire.
pub fn encode(header: &MessageHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u32(PROTOCOL_MAGIC);
    buf.put_u32(PROTOCOL_VERSION);
    buf.put_u8(header.msg_type as u8);
    buf.put_u8(header.layer_id);
    buf.put_u16(0); // reserved
    buf.put_u32(header.client_id);
    buf.put_u32(header.sequence);
    buf.put_u32(payload.len() as u32);
    buf.put_u64(header.timestamp_us);
    buf.put_slice(payload);
    buf.freeze()
}

/// Try to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when fewer than [`HEADER_LEN`] bytes are buffered, or
/// when the header parsed but the payload has not fully arrived. On success
/// the consumed bytes are removed from `buf`.
pub fn try_decode(buf: &mut BytesMut) -> Result<Option<Frame>> {
    if buf.len() < HEADER_LEN {
        return Ok(None);
    }

    let header = parse_header(&buf[..HEADER_LEN])?;

    let total = HEADER_LEN + header.data_size as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let mut frame = buf.split_to(total);
    frame.advance(HEADER_LEN);
    Ok(Some(Frame { header, payload: frame.freeze() }))
}

/// Parse and validate a header from exactly [`HEADER_LEN`] bytes.
pub fn parse_header(mut raw: &[u8]) -> Result<MessageHeader> {
    if raw.remaining() < HEADER_LEN {
        return Err(KairosError::MalformedFrame("short header".into()));
    }

    let magic = raw.get_u32();
    if magic != PROTOCOL_MAGIC {
        return Err(KairosError::MalformedFrame(format!("bad magic {magic:#010x}")));
    }

    let version = raw.get_u32();
    if version != PROTOCOL_VERSION {
        return Err(KairosError::MalformedFrame(format!("unsupported version {version}")));
    }

    let type_byte = raw.get_u8();
    let msg_type = MessageType::from_u8(type_byte)
        .ok_or_else(|| KairosError::MalformedFrame(format!("unknown tag {type_byte:#04x}")))?;

    let layer_id = raw.get_u8();
    let _reserved = raw.get_u16();
    let client_id = raw.get_u32();
    let sequence = raw.get_u32();
    let data_size = raw.get_u32();
    if data_size > limits::MAX_MESSAGE_SIZE {
        return Err(KairosError::MalformedFrame(format!("data_size {data_size} exceeds limit")));
    }
    let timestamp_us = raw.get_u64();

    Ok(MessageHeader { msg_type, layer_id, client_id, sequence, data_size, timestamp_us })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_header() -> MessageHeader {
        MessageHeader {
            msg_type: MessageType::DrawLine,
            layer_id: 3,
            client_id: 7,
            sequence: 42,
            data_size: 0,
            timestamp_us: 123_456_789,
        }
    }

    #[test]
    fn encode_length_invariant() {
        let payload = [0u8; 20];
        let bytes = encode(&sample_header(), &payload);
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
    }

    #[test]
    fn decode_round_trips_header() {
        let payload = b"hello world";
        let wire = encode(&sample_header(), payload);
        let mut buf = BytesMut::from(&wire[..]);

        let frame = try_decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.header.msg_type, MessageType::DrawLine);
        assert_eq!(frame.header.layer_id, 3);
        assert_eq!(frame.header.client_id, 7);
        assert_eq!(frame.header.sequence, 42);
        assert_eq!(frame.header.data_size, payload.len() as u32);
        assert_eq!(frame.header.timestamp_us, 123_456_789);
        assert_eq!(&frame.payload[..], payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_header_is_not_an_error() {
        let mut buf = BytesMut::from(&[0u8; 16][..]);
        assert!(try_decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 16);
    }

    #[test]
    fn partial_payload_is_not_an_error() {
        let wire = encode(&sample_header(), &[0u8; 100]);
        let mut buf = BytesMut::from(&wire[..HEADER_LEN + 50]);
        assert!(try_decode(&mut buf).unwrap().is_none());
        // Nothing consumed until the whole frame arrives.
        assert_eq!(buf.len(), HEADER_LEN + 50);
    }

    #[test]
    fn bad_magic_rejected() {
        let wire = encode(&sample_header(), &[]);
        let mut bytes = BytesMut::from(&wire[..]);
        bytes[0] = 0xDE;
        bytes[1] = 0xAD;
        bytes[2] = 0xBE;
        bytes[3] = 0xEF;
        let err = try_decode(&mut bytes).unwrap_err();
        assert!(matches!(err, KairosError::MalformedFrame(_)));
    }

    #[test]
    fn wrong_version_rejected() {
        let wire = encode(&sample_header(), &[]);
        let mut bytes = BytesMut::from(&wire[..]);
        bytes[7] = 9;
        assert!(try_decode(&mut bytes).is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        let wire = encode(&sample_header(), &[]);
        let mut bytes = BytesMut::from(&wire[..]);
        bytes[8] = 0x77;
        assert!(try_decode(&mut bytes).is_err());
    }

    #[test]
    fn oversize_rejected() {
        let wire = encode(&sample_header(), &[]);
        let mut bytes = BytesMut::from(&wire[..]);
        // data_size field at offset 20
        bytes[20] = 0xFF;
        bytes[21] = 0xFF;
        bytes[22] = 0xFF;
        bytes[23] = 0xFF;
        assert!(try_decode(&mut bytes).is_err());
    }

    #[test]
    fn consecutive_frames_decode_in_order() {
        let mut buf = BytesMut::new();
        for seq in 0..3u32 {
            let h = MessageHeader {
                sequence: seq,
                ..sample_header()
            };
            buf.extend_from_slice(&encode(&h, &[seq as u8]));
        }

        for seq in 0..3u32 {
            let frame = try_decode(&mut buf).unwrap().unwrap();
            assert_eq!(frame.header.sequence, seq);
            assert_eq!(frame.payload[0], seq as u8);
        }
        assert!(try_decode(&mut buf).unwrap().is_none());
    }
}
