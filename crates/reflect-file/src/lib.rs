//! # reflect-file
//!
//! Blocking file I/O for threads that cannot make system calls.
//!
//! Every call on a [`File`] is a synchronous exchange with the host through
//! a `HostReflection`; the host side is `reflect_host::FileService`.

pub mod error;
pub mod file;

pub use error::{FileError, Result};
pub use file::File;
