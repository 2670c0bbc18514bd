//! Shared error taxonomy across the Kairos crates.

use thiserror::Error;

/// Wire-level error codes carried inside `ERROR_RESPONSE` payloads
/// (stable API — clients match on the numeric value).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    UnknownCommand = 1,
    InvalidGc = 2,
    InvalidFont = 3,
    InvalidTexture = 4,
    InvalidLayer = 5,
    OutOfMemory = 6,
    ProtocolError = 7,
    ClientLimitExceeded = 8,
    PermissionDenied = 9,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => ErrorCode::Success,
            1 => ErrorCode::UnknownCommand,
            2 => ErrorCode::InvalidGc,
            3 => ErrorCode::InvalidFont,
            4 => ErrorCode::InvalidTexture,
            5 => ErrorCode::InvalidLayer,
            6 => ErrorCode::OutOfMemory,
            7 => ErrorCode::ProtocolError,
            8 => ErrorCode::ClientLimitExceeded,
            9 => ErrorCode::PermissionDenied,
            _ => return None,
        })
    }

    /// String representation used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::UnknownCommand => "UNKNOWN_COMMAND",
            ErrorCode::InvalidGc => "INVALID_GC",
            ErrorCode::InvalidFont => "INVALID_FONT",
            ErrorCode::InvalidTexture => "INVALID_TEXTURE",
            ErrorCode::InvalidLayer => "INVALID_LAYER",
            ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::ClientLimitExceeded => "CLIENT_LIMIT_EXCEEDED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, KairosError>;

/// Unified error type used by the protocol core and the server.
///
/// The variants mirror the server's handling policy: `MalformedFrame`
/// disconnects the session, `Protocol` answers with an `ERROR_RESPONSE`
/// and drops the command, `Fatal` initiates shutdown. The rest are
/// counted and degrade gracefully.
#[derive(Debug, Error)]
pub enum KairosError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("rate limited")]
    RateLimited,
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out")]
    TimedOut,
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl KairosError {
    /// Map to the stable wire code reported back to clients.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            KairosError::MalformedFrame(_) | KairosError::Protocol(_) => ErrorCode::ProtocolError,
            KairosError::RateLimited => ErrorCode::PermissionDenied,
            KairosError::ResourceExhausted(_) => ErrorCode::OutOfMemory,
            KairosError::Transport(_) | KairosError::TimedOut => ErrorCode::ProtocolError,
            KairosError::InvalidResource(_) => ErrorCode::UnknownCommand,
            KairosError::Fatal(_) => ErrorCode::ProtocolError,
        }
    }

    /// Stable label for metrics (no payload text, bounded cardinality).
    pub fn kind(&self) -> &'static str {
        match self {
            KairosError::MalformedFrame(_) => "malformed_frame",
            KairosError::Protocol(_) => "protocol",
            KairosError::RateLimited => "rate_limited",
            KairosError::ResourceExhausted(_) => "resource_exhausted",
            KairosError::Transport(_) => "transport",
            KairosError::TimedOut => "timed_out",
            KairosError::InvalidResource(_) => "invalid_resource",
            KairosError::Fatal(_) => "fatal",
        }
    }

    /// True when the session owning the connection must be torn down.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            KairosError::MalformedFrame(_)
                | KairosError::Transport(_)
                | KairosError::TimedOut
                | KairosError::Fatal(_)
        )
    }
}
