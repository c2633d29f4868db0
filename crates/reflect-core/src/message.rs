//! The closed message set and its payload codec.
//!
//! Every message is a fixed-layout struct. A request travels through the
//! queue behind a frame header; a reply is written straight into the
//! sender's `ReplySlot` and never enters the queue.
//!
//! # Payload layouts (little-endian)
//!
//! ```text
//! Open        path[256]                               (NUL padded)
//! OpenReply   handle:u32 status:i32 size:u64
//! Delete      handle:u32
//! Teardown    handle:u32
//! Write       handle:u32 len:u32 pointer:u64 data[len]
//! WriteReply  status:i32 _pad:u32 transferred:u64 file_size:u64
//! Read        handle:u32 _pad:u32 size:u64 pointer:u64
//! ReadReply   status:i32 len:u32 data[len]
//! Status      status:i32
//! ```
//!
//! `status` is 0 on success, otherwise a positive host errno.

use crate::error::{Corruption, ReflectError, Result};

/// Largest payload any message may encode to.
pub const MAX_MESSAGE_SIZE: usize = 4096;

/// Fixed size of the path field in an open request.
pub const MAX_PATH_LEN: usize = 256;

const WRITE_FIXED: usize = 16;
const READ_REPLY_FIXED: usize = 8;

/// Largest data block carried by one write request or read reply.
pub const MAX_INLINE_DATA: usize = MAX_MESSAGE_SIZE - WRITE_FIXED;

/// Host-assigned file handle.
pub type Handle = u32;

/// Never assigned by the host.
pub const INVALID_HANDLE: Handle = u32::MAX;

/// Selects the host routine that processes a frame.
///
/// The set is closed and known to both sides at build time.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerId {
    OpenFile = 0,
    TeardownFile = 1,
    FileWrite = 2,
    FileRead = 3,
    DeleteFile = 4,
}

impl HandlerId {
    pub const COUNT: usize = 5;

    pub const ALL: [HandlerId; HandlerId::COUNT] = [
        HandlerId::OpenFile,
        HandlerId::TeardownFile,
        HandlerId::FileWrite,
        HandlerId::FileRead,
        HandlerId::DeleteFile,
    ];

    #[inline]
    pub fn from_u32(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Inclusive bounds on the request payload length for this handler.
    pub const fn request_len(self) -> (usize, usize) {
        match self {
            HandlerId::OpenFile => (MAX_PATH_LEN, MAX_PATH_LEN),
            HandlerId::TeardownFile | HandlerId::DeleteFile => (4, 4),
            HandlerId::FileWrite => (WRITE_FIXED, MAX_MESSAGE_SIZE),
            HandlerId::FileRead => (24, 24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    path: String,
}

impl OpenRequest {
    /// Fails if `path` (plus its terminator) does not fit `MAX_PATH_LEN`
    /// or contains a NUL byte.
    pub fn new(path: &str) -> Result<Self> {
        if path.len() >= MAX_PATH_LEN {
            return Err(ReflectError::PathTooLong(path.len()));
        }
        if path.as_bytes().contains(&0) {
            return Err(ReflectError::InvalidPath);
        }
        Ok(Self { path: path.to_owned() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReply {
    pub handle: Handle,
    pub status: i32,
    pub size: u64,
}

/// Delete and teardown carry only the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRequest {
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub handle: Handle,
    /// Byte offset in the file (the client's put cursor).
    pub pointer: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReply {
    pub status: i32,
    pub transferred: u64,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub handle: Handle,
    pub size: u64,
    /// Byte offset in the file (the client's get cursor).
    pub pointer: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReply {
    pub status: i32,
    pub data: Vec<u8>,
}

/// Acknowledgement for delete and teardown.
///
/// `handler` is not serialized; the receiver knows which request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReply {
    pub handler: HandlerId,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Open(OpenRequest),
    OpenReply(OpenReply),
    Delete(HandleRequest),
    Teardown(HandleRequest),
    Write(WriteRequest),
    WriteReply(WriteReply),
    Read(ReadRequest),
    ReadReply(ReadReply),
    Status(StatusReply),
}

impl Message {
    /// The handler that processes this request (or that produced this reply).
    pub fn handler(&self) -> HandlerId {
        match self {
            Message::Open(_) | Message::OpenReply(_) => HandlerId::OpenFile,
            Message::Delete(_) => HandlerId::DeleteFile,
            Message::Teardown(_) => HandlerId::TeardownFile,
            Message::Write(_) | Message::WriteReply(_) => HandlerId::FileWrite,
            Message::Read(_) | Message::ReadReply(_) => HandlerId::FileRead,
            Message::Status(s) => s.handler,
        }
    }

    /// Encoded payload length in bytes.
    pub fn payload_size(&self) -> usize {
        match self {
            Message::Open(_) => MAX_PATH_LEN,
            Message::OpenReply(_) => 16,
            Message::Delete(_) | Message::Teardown(_) => 4,
            Message::Write(w) => WRITE_FIXED + w.data.len(),
            Message::WriteReply(_) => 24,
            Message::Read(_) => 24,
            Message::ReadReply(r) => READ_REPLY_FIXED + r.data.len(),
            Message::Status(_) => 4,
        }
    }

    /// True for the variants that travel through the queue.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::Open(_)
                | Message::Delete(_)
                | Message::Teardown(_)
                | Message::Write(_)
                | Message::Read(_)
        )
    }

    /// Serialized payload bytes.
    pub fn payload(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.payload_size());
        encode_payload(self, &mut out)?;
        Ok(out)
    }
}

/// Append the payload of `msg` to `out`.
pub fn encode_payload(msg: &Message, out: &mut Vec<u8>) -> Result<()> {
    let size = msg.payload_size();
    if size > MAX_MESSAGE_SIZE {
        return Err(ReflectError::FrameTooLarge { size, limit: MAX_MESSAGE_SIZE });
    }
    let start = out.len();
    match msg {
        Message::Open(o) => {
            out.extend_from_slice(o.path.as_bytes());
            out.resize(start + MAX_PATH_LEN, 0);
        }
        Message::OpenReply(r) => {
            out.extend_from_slice(&r.handle.to_le_bytes());
            out.extend_from_slice(&r.status.to_le_bytes());
            out.extend_from_slice(&r.size.to_le_bytes());
        }
        Message::Delete(h) | Message::Teardown(h) => {
            out.extend_from_slice(&h.handle.to_le_bytes());
        }
        Message::Write(w) => {
            out.extend_from_slice(&w.handle.to_le_bytes());
            out.extend_from_slice(&(w.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&w.pointer.to_le_bytes());
            out.extend_from_slice(&w.data);
        }
        Message::WriteReply(r) => {
            out.extend_from_slice(&r.status.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&r.transferred.to_le_bytes());
            out.extend_from_slice(&r.file_size.to_le_bytes());
        }
        Message::Read(r) => {
            out.extend_from_slice(&r.handle.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&r.size.to_le_bytes());
            out.extend_from_slice(&r.pointer.to_le_bytes());
        }
        Message::ReadReply(r) => {
            out.extend_from_slice(&r.status.to_le_bytes());
            out.extend_from_slice(&(r.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&r.data);
        }
        Message::Status(s) => {
            out.extend_from_slice(&s.status.to_le_bytes());
        }
    }
    debug_assert_eq!(out.len() - start, size);
    Ok(())
}

/// Decode a request payload pulled from the queue.
pub fn decode_request(handler: HandlerId, bytes: &[u8]) -> std::result::Result<Message, Corruption> {
    let bad = Corruption::MalformedPayload(handler);
    let mut r = Reader::new(bytes, bad);
    let msg = match handler {
        HandlerId::OpenFile => {
            let raw = r.take(MAX_PATH_LEN)?;
            let end = raw.iter().position(|&b| b == 0).ok_or(bad)?;
            let path = std::str::from_utf8(&raw[..end]).map_err(|_| bad)?;
            Message::Open(OpenRequest { path: path.to_owned() })
        }
        HandlerId::DeleteFile => Message::Delete(HandleRequest { handle: r.u32()? }),
        HandlerId::TeardownFile => Message::Teardown(HandleRequest { handle: r.u32()? }),
        HandlerId::FileWrite => {
            let handle = r.u32()?;
            let len = r.u32()? as usize;
            let pointer = r.u64()?;
            let data = r.take(len)?.to_vec();
            Message::Write(WriteRequest { handle, pointer, data })
        }
        HandlerId::FileRead => {
            let handle = r.u32()?;
            let _pad = r.u32()?;
            let size = r.u64()?;
            let pointer = r.u64()?;
            Message::Read(ReadRequest { handle, size, pointer })
        }
    };
    r.finish()?;
    Ok(msg)
}

/// Decode the reply the dispatcher wrote for a request to `handler`.
pub fn decode_reply(handler: HandlerId, bytes: &[u8]) -> std::result::Result<Message, Corruption> {
    let bad = Corruption::MalformedPayload(handler);
    let mut r = Reader::new(bytes, bad);
    let msg = match handler {
        HandlerId::OpenFile => Message::OpenReply(OpenReply {
            handle: r.u32()?,
            status: r.i32()?,
            size: r.u64()?,
        }),
        HandlerId::FileWrite => {
            let status = r.i32()?;
            let _pad = r.u32()?;
            Message::WriteReply(WriteReply {
                status,
                transferred: r.u64()?,
                file_size: r.u64()?,
            })
        }
        HandlerId::FileRead => {
            let status = r.i32()?;
            let len = r.u32()? as usize;
            let data = r.take(len)?.to_vec();
            Message::ReadReply(ReadReply { status, data })
        }
        HandlerId::DeleteFile | HandlerId::TeardownFile => Message::Status(StatusReply {
            handler,
            status: r.i32()?,
        }),
    };
    r.finish()?;
    Ok(msg)
}

/// Little-endian cursor that fails with a fixed corruption value.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    err: Corruption,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], err: Corruption) -> Self {
        Self { bytes, pos: 0, err }
    }

    fn take(&mut self, n: usize) -> std::result::Result<&'a [u8], Corruption> {
        let end = self.pos.checked_add(n).ok_or(self.err)?;
        let out = self.bytes.get(self.pos..end).ok_or(self.err)?;
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> std::result::Result<u32, Corruption> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }

    fn i32(&mut self) -> std::result::Result<i32, Corruption> {
        self.u32().map(|v| v as i32)
    }

    fn u64(&mut self) -> std::result::Result<u64, Corruption> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(b))
    }

    /// Trailing bytes mean the lengths disagree.
    fn finish(self) -> std::result::Result<(), Corruption> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(self.err)
        }
    }
}
