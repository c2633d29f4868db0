//! # File client for accelerator threads
//!
//! Each operation is one or more synchronous message exchanges through a
//! `HostReflection`; cursors and the cached size are local state, so
//! seeking and telling never leave the thread.
//!
//! ```ignore
//! let mut f = File::open(&reflection, "notes.txt")?;
//! let mut buf = [0u8; 5];
//! let n = f.read(&mut buf)?;          // "01234", tellg() == 5
//! f.seekp(f.size());
//! f.write(b"XYZ")?;                    // size() == 13
//! f.remove()?;                         // Delete + Teardown
//! ```

use reflect_core::message::{
    Handle, HandleRequest, HandlerId, OpenRequest, ReadRequest, WriteRequest, MAX_INLINE_DATA,
};
use reflect_core::{kdebug, kwarn, HostReflection, Message, ReflectError};

use crate::error::{FileError, Result};

/// An open host file.
///
/// Dropping a `File` tears its handle down without waiting for the host.
#[derive(Debug)]
pub struct File {
    reflection: HostReflection,
    handle: Handle,
    size: u64,
    get: u64,
    put: u64,
    live: bool,
}

impl File {
    /// Open (creating if missing) `path` on the host.
    pub fn open(reflection: &HostReflection, path: &str) -> Result<Self> {
        let request = Message::Open(OpenRequest::new(path)?);
        let reply = match reflection.send_synchronous(&request)? {
            Message::OpenReply(r) => r,
            _ => return Err(ReflectError::UnexpectedReply(HandlerId::OpenFile).into()),
        };
        FileError::check(reply.status)?;
        kdebug!("opened {} as handle {} ({} bytes)", path, reply.handle, reply.size);

        Ok(Self {
            reflection: reflection.clone(),
            handle: reply.handle,
            size: reply.size,
            get: 0,
            put: 0,
            live: true,
        })
    }

    /// Read up to `buf.len()` bytes at the get cursor.
    ///
    /// Returns the bytes actually transferred; fewer than requested means
    /// end of file. The get cursor advances by the same amount.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        for chunk in buf.chunks_mut(MAX_INLINE_DATA) {
            let request = Message::Read(ReadRequest {
                handle: self.handle,
                size: chunk.len() as u64,
                pointer: self.get,
            });
            let reply = match self.reflection.send_synchronous(&request)? {
                Message::ReadReply(r) => r,
                _ => return Err(ReflectError::UnexpectedReply(HandlerId::FileRead).into()),
            };
            FileError::check(reply.status)?;

            let n = reply.data.len().min(chunk.len());
            chunk[..n].copy_from_slice(&reply.data[..n]);
            self.get += n as u64;
            total += n;
            if n < chunk.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Write `data` at the put cursor.
    ///
    /// Returns the bytes the host reports written; the put cursor advances
    /// by that count and the cached size grows to cover it.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut total = 0;
        for chunk in data.chunks(MAX_INLINE_DATA) {
            let request = Message::Write(WriteRequest {
                handle: self.handle,
                pointer: self.put,
                data: chunk.to_vec(),
            });
            let reply = match self.reflection.send_synchronous(&request)? {
                Message::WriteReply(r) => r,
                _ => return Err(ReflectError::UnexpectedReply(HandlerId::FileWrite).into()),
            };
            FileError::check(reply.status)?;

            let n = (reply.transferred as usize).min(chunk.len());
            self.put += n as u64;
            self.size = self.size.max(self.put);
            total += n;
            if n < chunk.len() {
                break;
            }
        }
        Ok(total)
    }

    /// Delete the file on the host, then release the handle.
    ///
    /// The handle is released even when the delete fails; the first error
    /// is returned.
    pub fn remove(mut self) -> Result<()> {
        let deleted = self.status_call(Message::Delete(HandleRequest { handle: self.handle }));
        let released = self.teardown();
        deleted.and(released)
    }

    /// Release the handle and wait for the host to confirm.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    /// Host-assigned handle.
    #[inline]
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Cached size: the size at open, grown by local writes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get (read) cursor.
    #[inline]
    pub fn tellg(&self) -> u64 {
        self.get
    }

    /// Put (write) cursor.
    #[inline]
    pub fn tellp(&self) -> u64 {
        self.put
    }

    #[inline]
    pub fn seekg(&mut self, pos: u64) {
        self.get = pos;
    }

    #[inline]
    pub fn seekp(&mut self, pos: u64) {
        self.put = pos;
    }

    fn teardown(&mut self) -> Result<()> {
        self.live = false;
        self.status_call(Message::Teardown(HandleRequest { handle: self.handle }))
    }

    fn status_call(&self, request: Message) -> Result<()> {
        let handler = request.handler();
        match self.reflection.send_synchronous(&request)? {
            Message::Status(s) => FileError::check(s.status),
            _ => Err(ReflectError::UnexpectedReply(handler).into()),
        }
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if !self.live {
            return;
        }
        let teardown = Message::Teardown(HandleRequest { handle: self.handle });
        if let Err(e) = self.reflection.send_asynchronous(&teardown) {
            kwarn!("teardown of handle {} not sent: {}", self.handle, e);
        }
    }
}
