//! File client errors.

use std::fmt;

use nix::errno::Errno;
use reflect_core::ReflectError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    /// The host carried out the request and reported this errno.
    Host(Errno),
    /// The request never completed a clean round trip.
    Transport(ReflectError),
}

impl FileError {
    /// Errno of a host-reported failure.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            FileError::Host(e) => Some(*e),
            FileError::Transport(_) => None,
        }
    }

    /// Map a reply status field: 0 is success, anything else an errno.
    pub(crate) fn check(status: i32) -> Result<()> {
        if status == 0 {
            Ok(())
        } else {
            Err(FileError::Host(Errno::from_raw(status)))
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::Host(e) => write!(f, "host: {}", e.desc()),
            FileError::Transport(e) => write!(f, "transport: {}", e),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FileError::Host(e) => Some(e),
            FileError::Transport(e) => Some(e),
        }
    }
}

impl From<ReflectError> for FileError {
    fn from(e: ReflectError) -> Self {
        FileError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, FileError>;
