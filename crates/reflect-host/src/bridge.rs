//! `Bridge`: one-call setup of region, queue, coordinator, file service
//! and dispatcher.
//!
//! Teardown order matters: the dispatcher is joined before the region
//! mapping can go away, because the `HostReflection` clones it holds keep
//! the region alive until it exits.

use reflect_core::message::HandlerId;
use reflect_core::{kinfo, HostReflection, Message, Queue, ReflectError, Result};

use crate::bootup::{BootUp, BootUpBuilder};
use crate::config::{BridgeConfig, ConfigError};
use crate::dispatcher::DispatcherState;
use crate::file_service::FileService;
use crate::region;

/// Registers extra handlers before the bridge starts.
pub struct BridgeBuilder {
    config: BridgeConfig,
    boot: BootUpBuilder,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        let boot = BootUpBuilder::new().config(config.dispatcher_config());
        Self { config, boot }
    }

    /// Handle `id` with a custom routine instead of the file service.
    pub fn handler<F>(mut self, id: HandlerId, handler: F) -> Result<Self>
    where
        F: FnMut(&Message) -> Option<Message> + Send + 'static,
    {
        self.boot.add_handler(id, handler)?;
        Ok(self)
    }

    /// Allocate, format, register remaining file handlers and start.
    pub fn start(mut self) -> Result<Bridge> {
        let config = self.config;
        config.validate().map_err(|ConfigError::InvalidValue(why)| ReflectError::InvalidConfig(why))?;

        let region = region::allocate(config.region_len())?;
        let queue = Queue::format(region)?;
        let reflection = HostReflection::with_policy(queue, config.spin_policy());

        let files = FileService::new(config.root.clone(), config.first_handle);
        files.register_missing(&mut self.boot)?;

        let boot = self.boot.start(reflection.clone())?;
        kinfo!(
            "bridge up: {} byte queue, handles from {}, root {}",
            reflection.queue().capacity(),
            config.first_handle,
            config.root.display()
        );

        Ok(Bridge { reflection, files, boot, config })
    }
}

/// A running bridge.
pub struct Bridge {
    reflection: HostReflection,
    files: FileService,
    boot: BootUp,
    config: BridgeConfig,
}

impl Bridge {
    /// Start with the file service on every handler.
    pub fn start(config: BridgeConfig) -> Result<Self> {
        BridgeBuilder::new(config).start()
    }

    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    /// A coordinator for one more producer thread.
    #[inline]
    pub fn reflection(&self) -> HostReflection {
        self.reflection.clone()
    }

    #[inline]
    pub fn files(&self) -> &FileService {
        &self.files
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn state(&self) -> DispatcherState {
        self.boot.state()
    }

    #[inline]
    pub fn dispatched(&self) -> u64 {
        self.boot.dispatched()
    }

    /// Drain, stop and join the dispatcher.
    pub fn shutdown(mut self) -> Result<()> {
        self.boot.shutdown()
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("boot", &self.boot)
            .field("files", &self.files)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflect_core::message::{HandleRequest, OpenRequest, StatusReply};
    use std::sync::atomic::{AtomicU32, Ordering};

    static SEQ: AtomicU32 = AtomicU32::new(0);

    fn config() -> BridgeConfig {
        let dir = std::env::temp_dir().join(format!(
            "reflect-bridge-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).unwrap();
        BridgeConfig::new().queue_frames(4).root(dir).first_handle(7)
    }

    #[test]
    fn test_open_through_bridge() {
        let cfg = config();
        std::fs::write(cfg.root.join("notes.txt"), b"0123456789").unwrap();
        let bridge = Bridge::start(cfg).unwrap();
        let r = bridge.reflection();

        let reply = r
            .send_synchronous(&Message::Open(OpenRequest::new("notes.txt").unwrap()))
            .unwrap();
        match reply {
            Message::OpenReply(o) => assert_eq!((o.handle, o.status, o.size), (7, 0, 10)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(bridge.files().is_open(7));
        assert!(!bridge.state().is_terminal());
        bridge.shutdown().unwrap();
    }

    #[test]
    fn test_custom_handler_overrides_file_service() {
        let bridge = Bridge::builder(config())
            .handler(HandlerId::DeleteFile, |_m| {
                Some(Message::Status(StatusReply { handler: HandlerId::DeleteFile, status: 77 }))
            })
            .unwrap()
            .start()
            .unwrap();

        let reply = bridge
            .reflection()
            .send_synchronous(&Message::Delete(HandleRequest { handle: 1 }))
            .unwrap();
        assert_eq!(
            reply,
            Message::Status(StatusReply { handler: HandlerId::DeleteFile, status: 77 })
        );
        bridge.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert_eq!(
            Bridge::start(config().queue_frames(0)).err().map(|e| e.to_string()),
            Some("invalid config: queue_frames must be > 0".to_string())
        );
    }
}
