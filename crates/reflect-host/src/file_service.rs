//! Host file service: the handlers behind the five file requests.
//!
//! One `FileTable` maps host-assigned handles to open files. All five
//! handlers share it behind a `SpinLock`; they already run one at a time on
//! the dispatcher thread, so the lock is never contended there and only
//! matters for host-side inspection.
//!
//! Every failure becomes a positive errno in the reply's status field.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::errno::Errno;
use reflect_core::message::{
    Handle, HandleRequest, HandlerId, OpenReply, ReadReply, ReadRequest, StatusReply, WriteReply,
    WriteRequest, INVALID_HANDLE, MAX_INLINE_DATA,
};
use reflect_core::{kdebug, ktrace, Message, Result, SpinLock};

use crate::bootup::BootUpBuilder;

struct OpenFile {
    path: PathBuf,
    file: File,
}

/// Handle → open file.
pub struct FileTable {
    root: PathBuf,
    next_handle: Handle,
    files: HashMap<Handle, OpenFile>,
}

impl FileTable {
    pub fn new(root: impl Into<PathBuf>, first_handle: Handle) -> Self {
        Self {
            root: root.into(),
            next_handle: first_handle,
            files: HashMap::new(),
        }
    }

    /// Live handles.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.files.contains_key(&handle)
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }

    /// Open read/write, creating the file if missing.
    pub fn open(&mut self, path: &str) -> OpenReply {
        let failed = |status| OpenReply { handle: INVALID_HANDLE, status, size: 0 };

        if self.next_handle == INVALID_HANDLE {
            return failed(Errno::EMFILE as i32);
        }
        let full = self.resolve(path);
        let file = match OpenOptions::new().read(true).write(true).create(true).open(&full) {
            Ok(f) => f,
            Err(e) => return failed(errno_of(&e)),
        };
        let size = match file.metadata() {
            Ok(m) => m.len(),
            Err(e) => return failed(errno_of(&e)),
        };

        let handle = self.next_handle;
        self.next_handle += 1;
        kdebug!("open {} -> handle {} ({} bytes)", full.display(), handle, size);
        self.files.insert(handle, OpenFile { path: full, file });
        OpenReply { handle, status: 0, size }
    }

    /// Positional read of up to `size` bytes, stopping early only at EOF.
    pub fn read(&mut self, req: &ReadRequest) -> ReadReply {
        let Some(open) = self.files.get(&req.handle) else {
            return ReadReply { status: Errno::EBADF as i32, data: Vec::new() };
        };

        let want = (req.size as usize).min(MAX_INLINE_DATA);
        let mut data = vec![0u8; want];
        let mut got = 0;
        while got < want {
            match open.file.read_at(&mut data[got..], req.pointer + got as u64) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return ReadReply { status: errno_of(&e), data: Vec::new() },
            }
        }
        data.truncate(got);
        ktrace!("read handle {} @{}: {}/{} bytes", req.handle, req.pointer, got, req.size);
        ReadReply { status: 0, data }
    }

    /// Positional write of the whole block.
    pub fn write(&mut self, req: &WriteRequest) -> WriteReply {
        let failed = |status| WriteReply { status, transferred: 0, file_size: 0 };
        let Some(open) = self.files.get(&req.handle) else {
            return failed(Errno::EBADF as i32);
        };

        if let Err(e) = open.file.write_all_at(&req.data, req.pointer) {
            return failed(errno_of(&e));
        }
        let file_size = match open.file.metadata() {
            Ok(m) => m.len(),
            Err(e) => return failed(errno_of(&e)),
        };
        ktrace!("write handle {} @{}: {} bytes", req.handle, req.pointer, req.data.len());
        WriteReply {
            status: 0,
            transferred: req.data.len() as u64,
            file_size,
        }
    }

    /// Unlink the file behind `handle`; the handle stays open until teardown.
    pub fn delete(&mut self, req: &HandleRequest) -> StatusReply {
        let status = match self.files.get(&req.handle) {
            None => Errno::EBADF as i32,
            Some(open) => match nix::unistd::unlink(open.path.as_path()) {
                Ok(()) => 0,
                Err(errno) => errno as i32,
            },
        };
        kdebug!("delete handle {}: status {}", req.handle, status);
        StatusReply { handler: HandlerId::DeleteFile, status }
    }

    /// Forget `handle`, closing the OS file.
    pub fn teardown(&mut self, req: &HandleRequest) -> StatusReply {
        let status = match self.files.remove(&req.handle) {
            Some(_) => 0,
            None => Errno::EBADF as i32,
        };
        kdebug!("teardown handle {}: status {}", req.handle, status);
        StatusReply { handler: HandlerId::TeardownFile, status }
    }

    /// Run the request against the table; `None` for non-file messages.
    pub fn handle(&mut self, message: &Message) -> Option<Message> {
        let reply = match message {
            Message::Open(o) => Message::OpenReply(self.open(o.path())),
            Message::Read(r) => Message::ReadReply(self.read(r)),
            Message::Write(w) => Message::WriteReply(self.write(w)),
            Message::Delete(h) => Message::Status(self.delete(h)),
            Message::Teardown(h) => Message::Status(self.teardown(h)),
            _ => return None,
        };
        Some(reply)
    }
}

fn errno_of(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(Errno::EIO as i32)
}

/// The file table shared by the registered handlers.
#[derive(Clone)]
pub struct FileService {
    table: Arc<SpinLock<FileTable>>,
}

impl FileService {
    pub fn new(root: impl Into<PathBuf>, first_handle: Handle) -> Self {
        Self {
            table: Arc::new(SpinLock::new(FileTable::new(root, first_handle))),
        }
    }

    /// Register handlers for all five file requests.
    pub fn register(&self, builder: &mut BootUpBuilder) -> Result<()> {
        for id in HandlerId::ALL {
            let table = Arc::clone(&self.table);
            builder.add_handler(id, move |m: &Message| table.lock().handle(m))?;
        }
        Ok(())
    }

    /// Register handlers for the file requests nobody else claimed.
    pub fn register_missing(&self, builder: &mut BootUpBuilder) -> Result<()> {
        for id in HandlerId::ALL {
            if builder.is_registered(id) {
                continue;
            }
            let table = Arc::clone(&self.table);
            builder.add_handler(id, move |m: &Message| table.lock().handle(m))?;
        }
        Ok(())
    }

    /// Live handles.
    pub fn open_handles(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_open(&self, handle: Handle) -> bool {
        self.table.lock().contains(handle)
    }
}

impl std::fmt::Debug for FileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileService").field("open_handles", &self.open_handles()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    static SEQ: AtomicU32 = AtomicU32::new(0);

    /// Fresh scratch directory under the system temp dir.
    fn scratch() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "reflect-fs-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_open_assigns_monotonic_handles() {
        let dir = scratch();
        std::fs::write(dir.join("a"), b"0123456789").unwrap();
        let mut t = FileTable::new(&dir, 7);

        let a = t.open("a");
        assert_eq!((a.handle, a.status, a.size), (7, 0, 10));
        let b = t.open("b");
        assert_eq!((b.handle, b.status, b.size), (8, 0, 0));
        assert!(dir.join("b").exists());
        assert_eq!(t.len(), 2);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_open_failure_reports_errno() {
        let dir = scratch();
        let mut t = FileTable::new(&dir, 1);
        let r = t.open("missing-dir/file");
        assert_eq!(r.status, Errno::ENOENT as i32);
        assert_eq!(r.handle, INVALID_HANDLE);
        assert!(t.is_empty());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_read_write_positional() {
        let dir = scratch();
        std::fs::write(dir.join("n"), b"0123456789").unwrap();
        let mut t = FileTable::new(&dir, 1);
        let h = t.open("n").handle;

        let r = t.read(&ReadRequest { handle: h, size: 5, pointer: 3 });
        assert_eq!((r.status, r.data.as_slice()), (0, &b"34567"[..]));

        // Short read at EOF.
        let r = t.read(&ReadRequest { handle: h, size: 100, pointer: 8 });
        assert_eq!(r.data, b"89");

        let w = t.write(&WriteRequest { handle: h, pointer: 10, data: b"XYZ".to_vec() });
        assert_eq!((w.status, w.transferred, w.file_size), (0, 3, 13));
        assert_eq!(std::fs::read(dir.join("n")).unwrap(), b"0123456789XYZ");
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_delete_then_teardown() {
        let dir = scratch();
        let mut t = FileTable::new(&dir, 1);
        let h = t.open("gone").handle;

        assert_eq!(t.delete(&HandleRequest { handle: h }).status, 0);
        assert!(!dir.join("gone").exists());
        // Still readable until teardown.
        assert_eq!(t.read(&ReadRequest { handle: h, size: 1, pointer: 0 }).status, 0);

        assert_eq!(t.teardown(&HandleRequest { handle: h }).status, 0);
        let ebadf = Errno::EBADF as i32;
        assert_eq!(t.read(&ReadRequest { handle: h, size: 1, pointer: 0 }).status, ebadf);
        assert_eq!(t.teardown(&HandleRequest { handle: h }).status, ebadf);
        assert_eq!(t.delete(&HandleRequest { handle: h }).status, ebadf);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_unknown_handle_is_ebadf() {
        let mut t = FileTable::new(scratch(), 1);
        let w = t.write(&WriteRequest { handle: 99, pointer: 0, data: vec![1] });
        assert_eq!(w.status, Errno::EBADF as i32);
    }

    #[test]
    fn test_register_all_handlers() {
        let svc = FileService::new(scratch(), 1);
        let mut b = BootUpBuilder::new();
        svc.register(&mut b).unwrap();
        for id in HandlerId::ALL {
            assert!(b.is_registered(id));
        }
        // A second registration collides.
        assert!(svc.register(&mut b).is_err());
    }

    #[test]
    fn test_register_missing_keeps_existing() {
        let svc = FileService::new(scratch(), 1);
        let mut b = BootUpBuilder::new();
        b.add_handler(HandlerId::DeleteFile, |_m| None).unwrap();
        svc.register_missing(&mut b).unwrap();
        for id in HandlerId::ALL {
            assert!(b.is_registered(id));
        }
    }
}
