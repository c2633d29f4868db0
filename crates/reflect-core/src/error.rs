//! Error types for the reflection bridge.
//!
//! Queue backpressure is not an error (push/pull return `false`).
//! Host-side failures of a requested operation travel back as a status
//! field inside the reply and never show up here.

use std::fmt;

use crate::message::HandlerId;

/// The two sides disagree about the frame format.
///
/// Always fatal for the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Handler identifier outside the closed set.
    UnknownHandler(u32),
    /// Valid identifier, but nothing registered for it.
    UnregisteredHandler(HandlerId),
    /// Delivery mode is `Invalid` or not a known value.
    InvalidMessageType(u32),
    /// Header length exceeds what the handler's payload type allows.
    BadPayloadLength { handler: HandlerId, len: u32 },
    /// Payload bytes do not decode as the handler's payload type.
    MalformedPayload(HandlerId),
    /// Header was present but the rest of the frame was not.
    TruncatedFrame,
    /// Synchronous frame carries a return address no sender is waiting on.
    BadReturnAddress(u64),
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownHandler(raw) => write!(f, "unknown handler id {}", raw),
            Self::UnregisteredHandler(id) => write!(f, "no handler registered for {:?}", id),
            Self::InvalidMessageType(raw) => write!(f, "invalid message type {}", raw),
            Self::BadPayloadLength { handler, len } => {
                write!(f, "payload length {} invalid for {:?}", len, handler)
            }
            Self::MalformedPayload(id) => write!(f, "malformed {:?} payload", id),
            Self::TruncatedFrame => write!(f, "truncated frame"),
            Self::BadReturnAddress(addr) => write!(f, "unissued return address {:#x}", addr),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectError {
    /// Encoded payload exceeds `MAX_MESSAGE_SIZE`.
    FrameTooLarge { size: usize, limit: usize },
    /// Path does not fit the fixed-size open payload.
    PathTooLong(usize),
    /// Path contains a NUL byte.
    InvalidPath,
    /// Region cannot hold the queue header plus one maximal frame.
    RegionTooSmall { len: usize, required: usize },
    /// Region is misaligned or not a formatted queue.
    BadRegion(&'static str),
    /// Protocol corruption detected while decoding a frame.
    Corruption(Corruption),
    /// A handler is already registered for this identifier.
    DuplicateHandler(HandlerId),
    /// Bounded wait elapsed before the queue accepted the frame or the reply landed.
    Timeout,
    /// Reply payload does not match the request's handler.
    UnexpectedReply(HandlerId),
    /// Only request variants travel through the queue.
    NotRequest(HandlerId),
    /// Dispatcher thread panicked.
    DispatcherPanicked,
    /// Shared region allocation failed (errno).
    RegionAlloc(i32),
    /// OS error with errno.
    Os(i32),
    /// Configuration value out of range.
    InvalidConfig(&'static str),
}

impl fmt::Display for ReflectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit {}", size, limit)
            }
            Self::PathTooLong(len) => write!(f, "path of {} bytes too long", len),
            Self::InvalidPath => write!(f, "path contains a NUL byte"),
            Self::RegionTooSmall { len, required } => {
                write!(f, "region of {} bytes too small, need {}", len, required)
            }
            Self::BadRegion(why) => write!(f, "bad region: {}", why),
            Self::Corruption(c) => write!(f, "protocol corruption: {}", c),
            Self::DuplicateHandler(id) => write!(f, "handler {:?} already registered", id),
            Self::Timeout => write!(f, "timed out"),
            Self::UnexpectedReply(id) => write!(f, "unexpected reply for {:?}", id),
            Self::NotRequest(id) => write!(f, "{:?} reply cannot be sent as a request", id),
            Self::DispatcherPanicked => write!(f, "dispatcher thread panicked"),
            Self::RegionAlloc(e) => write!(f, "region allocation failed: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
            Self::InvalidConfig(why) => write!(f, "invalid config: {}", why),
        }
    }
}

impl std::error::Error for ReflectError {}

impl From<Corruption> for ReflectError {
    fn from(c: Corruption) -> Self {
        ReflectError::Corruption(c)
    }
}

pub type Result<T> = std::result::Result<T, ReflectError>;
