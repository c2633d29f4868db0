//! `BootUp`: handler registry and dispatcher thread owner.
//!
//! Built before any producer work starts, torn down at shutdown:
//!
//! ```ignore
//! let mut builder = BootUp::builder();
//! builder.add_handler(HandlerId::TeardownFile, |m| { ...; None })?;
//! let mut boot = builder.start(reflection.clone())?;
//! // ... producers call reflection.send_synchronous(...) ...
//! boot.shutdown()?;
//! ```
//!
//! The handler table moves into the dispatcher thread and is dropped there
//! when the loop returns, before `shutdown` observes the join.

use std::sync::Arc;
use std::thread;

use reflect_core::message::HandlerId;
use reflect_core::{kdebug, kwarn, HostReflection, Message, ReflectError, Result};

use crate::dispatcher::{
    dispatcher_loop, DispatcherConfig, DispatcherShared, DispatcherState, HandlerTable,
};

/// Collects handlers before the dispatcher starts.
pub struct BootUpBuilder {
    handlers: HandlerTable,
    config: DispatcherConfig,
}

impl BootUpBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HandlerTable::new(),
            config: DispatcherConfig::default(),
        }
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the routine for `id`. Registering the same id twice fails.
    pub fn add_handler<F>(&mut self, id: HandlerId, handler: F) -> Result<&mut Self>
    where
        F: FnMut(&Message) -> Option<Message> + Send + 'static,
    {
        self.handlers.insert(id, Box::new(handler))?;
        Ok(self)
    }

    #[inline]
    pub fn is_registered(&self, id: HandlerId) -> bool {
        self.handlers.contains(id)
    }

    /// Spawn the dispatcher thread serving `reflection`'s queue.
    pub fn start(self, reflection: HostReflection) -> Result<BootUp> {
        let shared = Arc::new(DispatcherShared::new());
        let Self { mut handlers, config } = self;

        let thread = {
            let shared = Arc::clone(&shared);
            let reflection = reflection.clone();
            thread::Builder::new()
                .name("reflect-dispatcher".into())
                .spawn(move || dispatcher_loop(&reflection, &mut handlers, &config, &shared))
                .map_err(|e| ReflectError::Os(e.raw_os_error().unwrap_or(libc::EAGAIN)))?
        };
        kdebug!("dispatcher thread spawned");

        Ok(BootUp {
            reflection,
            shared,
            thread: Some(thread),
        })
    }
}

impl Default for BootUpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the running dispatcher.
pub struct BootUp {
    reflection: HostReflection,
    shared: Arc<DispatcherShared>,
    thread: Option<thread::JoinHandle<Result<()>>>,
}

impl BootUp {
    pub fn builder() -> BootUpBuilder {
        BootUpBuilder::new()
    }

    /// The coordinator the dispatcher serves.
    #[inline]
    pub fn reflection(&self) -> &HostReflection {
        &self.reflection
    }

    #[inline]
    pub fn state(&self) -> DispatcherState {
        self.shared.state()
    }

    /// Frames dispatched so far.
    #[inline]
    pub fn dispatched(&self) -> u64 {
        self.shared.dispatched()
    }

    /// True until the thread has been joined.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stop after draining queued frames and join the thread.
    ///
    /// Returns the fatal error if the dispatcher faulted. Calling it again
    /// returns `Ok(())`.
    pub fn shutdown(&mut self) -> Result<()> {
        self.shared.request_stop();
        let Some(handle) = self.thread.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                self.shared.set_state(DispatcherState::Faulted);
                Err(ReflectError::DispatcherPanicked)
            }
        }
    }
}

impl Drop for BootUp {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kwarn!("dispatcher ended with error: {}", e);
        }
    }
}

impl std::fmt::Debug for BootUp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootUp")
            .field("state", &self.state())
            .field("dispatched", &self.dispatched())
            .field("running", &self.is_running())
            .finish()
    }
}
