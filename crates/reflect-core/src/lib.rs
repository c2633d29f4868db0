//! # reflect-core
//!
//! The producer-visible half of the host reflection bridge.
//!
//! Accelerator threads have no system calls of their own. They reach host
//! services by framing a [`Message`] into a shared [`Queue`] and, for
//! synchronous calls, spinning on a [`ReplySlot`] until the host dispatcher
//! writes the answer back.
//!
//! This crate contains no OS-specific code and has no external dependencies.
//! Region allocation, the dispatcher thread and the host handlers live in
//! `reflect-host`.
//!
//! ## Modules
//!
//! - `spinlock` - Ticket lock word (in-place) and `SpinLock<T>`
//! - `backoff` - Tunable spin policy used by every waiter
//! - `region` - Shared memory descriptor trait + heap arena
//! - `queue` - Framed circular byte queue
//! - `header` - Frame headers and thread identifiers
//! - `message` - Closed message set and payload codec
//! - `reply` - Return slot written by the dispatcher
//! - `reflection` - `HostReflection` coordinator (send/receive)
//! - `error` - Error types
//! - `kprint` - Kernel-style leveled logging macros
//! - `env` - Environment variable helpers

pub mod spinlock;
pub mod backoff;
pub mod region;
pub mod queue;
pub mod header;
pub mod message;
pub mod reply;
pub mod reflection;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use backoff::{Backoff, SpinPolicy};
pub use error::{Corruption, ReflectError, Result};
pub use header::{Header, MessageType, ThreadId};
pub use message::{HandlerId, Message, MAX_MESSAGE_SIZE};
pub use queue::Queue;
pub use reflection::{Envelope, HostReflection};
pub use region::{HeapRegion, Region};
pub use reply::{PendingReplies, ReplySlot};
pub use spinlock::{SpinLock, TicketLock};
