//! Frame headers and thread identifiers.
//!
//! ```text
//! Header             kind:u32 thread_id:u32 handler:u32 payload_len:u32   (16 bytes)
//! SynchronousHeader  Header + return_address:u64                          (24 bytes)
//! ```
//!
//! The return address only means something in the sender's address space.
//! The dispatcher writes the reply there exactly once.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::Corruption;
use crate::message::{HandlerId, MAX_MESSAGE_SIZE};

pub const HEADER_SIZE: usize = 16;
pub const SYNC_HEADER_SIZE: usize = HEADER_SIZE + 8;

/// Largest frame any message can produce.
pub const MAX_FRAME_SIZE: usize = SYNC_HEADER_SIZE + MAX_MESSAGE_SIZE;

/// Delivery mode of a frame.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Sender blocks until the reply lands at the return address.
    Synchronous = 0,
    /// Fire and forget.
    Asynchronous = 1,
    Invalid = 2,
}

impl MessageType {
    #[inline]
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => MessageType::Synchronous,
            1 => MessageType::Asynchronous,
            _ => MessageType::Invalid,
        }
    }

    /// Header bytes for this delivery mode.
    #[inline]
    pub const fn header_size(self) -> usize {
        match self {
            MessageType::Synchronous => SYNC_HEADER_SIZE,
            _ => HEADER_SIZE,
        }
    }
}

/// Identifier of the thread that sent a frame.
///
/// Assigned lazily per OS thread from a process-wide counter; the value is
/// only used for diagnostics and never for routing.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(u32);

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(0);

thread_local! {
    static CURRENT: ThreadId = ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
}

impl ThreadId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        ThreadId(id)
    }

    /// Identifier of the calling thread.
    #[inline]
    pub fn current() -> Self {
        CURRENT.with(|id| *id)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Common frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: MessageType,
    pub thread_id: ThreadId,
    pub handler: HandlerId,
    pub payload_len: u32,
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut b = [0u8; HEADER_SIZE];
        b[0..4].copy_from_slice(&(self.kind as u32).to_le_bytes());
        b[4..8].copy_from_slice(&self.thread_id.as_u32().to_le_bytes());
        b[8..12].copy_from_slice(&self.handler.as_u32().to_le_bytes());
        b[12..16].copy_from_slice(&self.payload_len.to_le_bytes());
        b
    }

    /// Decode and validate a header pulled from the queue.
    ///
    /// Rejects invalid delivery modes, handler ids outside the closed set,
    /// and lengths beyond what the handler's payload type can encode to.
    pub fn decode(b: &[u8; HEADER_SIZE]) -> Result<Self, Corruption> {
        let word = |i: usize| u32::from_le_bytes([b[i], b[i + 1], b[i + 2], b[i + 3]]);

        let raw_kind = word(0);
        let kind = MessageType::from_u32(raw_kind);
        if kind == MessageType::Invalid {
            return Err(Corruption::InvalidMessageType(raw_kind));
        }

        let raw_handler = word(8);
        let handler = HandlerId::from_u32(raw_handler)
            .ok_or(Corruption::UnknownHandler(raw_handler))?;

        let payload_len = word(12);
        let (lo, hi) = handler.request_len();
        let len = payload_len as usize;
        if len < lo || len > hi {
            return Err(Corruption::BadPayloadLength { handler, len: payload_len });
        }

        Ok(Header {
            kind,
            thread_id: ThreadId(word(4)),
            handler,
            payload_len,
        })
    }
}

/// Header of a synchronous frame: where to put the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronousHeader {
    pub header: Header,
    pub address: u64,
}

impl SynchronousHeader {
    pub fn encode(&self) -> [u8; SYNC_HEADER_SIZE] {
        let mut b = [0u8; SYNC_HEADER_SIZE];
        b[..HEADER_SIZE].copy_from_slice(&self.header.encode());
        b[HEADER_SIZE..].copy_from_slice(&self.address.to_le_bytes());
        b
    }

    #[inline]
    pub fn decode_address(b: &[u8; 8]) -> u64 {
        u64::from_le_bytes(*b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(handler: HandlerId, len: u32) -> Header {
        Header {
            kind: MessageType::Asynchronous,
            thread_id: ThreadId::new(3),
            handler,
            payload_len: len,
        }
    }

    #[test]
    fn test_header_encode_decode() {
        let h = header(HandlerId::FileRead, 24);
        assert_eq!(Header::decode(&h.encode()), Ok(h));
    }

    #[test]
    fn test_sync_header_carries_address() {
        let s = SynchronousHeader {
            header: Header { kind: MessageType::Synchronous, ..header(HandlerId::OpenFile, 256) },
            address: 0xdead_beef_0000,
        };
        let b = s.encode();
        let mut addr = [0u8; 8];
        addr.copy_from_slice(&b[HEADER_SIZE..]);
        assert_eq!(SynchronousHeader::decode_address(&addr), 0xdead_beef_0000);
        let mut base = [0u8; HEADER_SIZE];
        base.copy_from_slice(&b[..HEADER_SIZE]);
        assert_eq!(Header::decode(&base).unwrap().kind, MessageType::Synchronous);
    }

    #[test]
    fn test_unknown_handler_rejected() {
        let mut b = header(HandlerId::FileRead, 24).encode();
        b[8..12].copy_from_slice(&77u32.to_le_bytes());
        assert_eq!(Header::decode(&b), Err(Corruption::UnknownHandler(77)));
    }

    #[test]
    fn test_invalid_kind_rejected() {
        let mut b = header(HandlerId::FileRead, 24).encode();
        b[0..4].copy_from_slice(&(MessageType::Invalid as u32).to_le_bytes());
        assert_eq!(Header::decode(&b), Err(Corruption::InvalidMessageType(2)));
    }

    #[test]
    fn test_payload_len_checked_against_handler() {
        let b = header(HandlerId::DeleteFile, 8).encode();
        assert_eq!(
            Header::decode(&b),
            Err(Corruption::BadPayloadLength { handler: HandlerId::DeleteFile, len: 8 })
        );
        let b = header(HandlerId::FileWrite, (MAX_MESSAGE_SIZE + 1) as u32).encode();
        assert!(Header::decode(&b).is_err());
    }

    #[test]
    fn test_thread_ids_distinct() {
        let here = ThreadId::current();
        assert_eq!(here, ThreadId::current());
        let there = std::thread::spawn(ThreadId::current).join().unwrap();
        assert_ne!(here, there);
    }
}
