//! # reflect-host
//!
//! Host side of the reflection bridge.
//!
//! ```text
//!  producers (any thread)             host
//!  ──────────────────────             ─────────────────────────────────
//!  HostReflection::send_*  ──push──►  Queue (MmapRegion)
//!                                        │ receive()
//!                                        ▼
//!                                     dispatcher thread (BootUp)
//!                                        │ handlers[id](&message)
//!                                        ▼
//!  ReplySlot (done=1)      ◄─write──  FileService / custom handler
//! ```
//!
//! ## Modules
//!
//! - `region` - Shared region allocation (mmap on unix)
//! - `dispatcher` - Dispatcher loop, state machine, handler table
//! - `bootup` - Handler registry and dispatcher thread owner
//! - `file_service` - Host handlers for the file requests
//! - `bridge` - Composition root wiring all of the above
//! - `config` - `BridgeConfig` with env overrides

pub mod region;
pub mod dispatcher;
pub mod bootup;
pub mod file_service;
pub mod bridge;
pub mod config;

pub use bootup::{BootUp, BootUpBuilder};
pub use bridge::{Bridge, BridgeBuilder};
pub use config::BridgeConfig;
pub use dispatcher::{DispatcherConfig, DispatcherState, Handler};
pub use file_service::{FileService, FileTable};
