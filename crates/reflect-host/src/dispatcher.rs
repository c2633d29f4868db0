//! # Dispatcher loop
//!
//! Runs on a dedicated host thread owned by [`BootUp`](crate::BootUp):
//!
//! ```text
//! Idle ─► Polling ─► Dispatching ─► Polling ─► … ─► Stopped
//!                         │
//!                         └─ corrupt frame / handler panic ─► Faulted
//!
//! loop {
//!     1. receive()  → None? stop requested → Stopped, else sleep idle_sleep
//!     2. handlers[envelope.handler]  → missing? fatal
//!     3. reply = handler(&message)
//!     4. synchronous? write reply at return address, done flag last
//! }
//! ```
//!
//! Handlers run one at a time on this thread. A stop request is honored
//! only once the queue is empty, so frames already queued are served.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use reflect_core::message::HandlerId;
use reflect_core::{
    kdebug, kerror, kwarn, ktrace, Corruption, HostReflection, Message, ReflectError, Result,
};

/// Host routine for one handler identifier.
///
/// Returns the reply for synchronous requests; the return value of an
/// asynchronous request is discarded.
pub type Handler = Box<dyn FnMut(&Message) -> Option<Message> + Send>;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Built, loop not entered yet.
    Idle = 0,
    /// Waiting for a frame.
    Polling = 1,
    /// Running a handler.
    Dispatching = 2,
    /// Stopped on request after draining.
    Stopped = 3,
    /// Terminated by protocol corruption or a handler panic.
    Faulted = 4,
}

impl DispatcherState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Polling,
            2 => DispatcherState::Dispatching,
            3 => DispatcherState::Stopped,
            _ => DispatcherState::Faulted,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatcherState::Stopped | DispatcherState::Faulted)
    }
}

/// State shared between the dispatcher thread and its owner.
pub struct DispatcherShared {
    state: AtomicU8,
    stop: AtomicBool,
    dispatched: AtomicU64,
}

impl DispatcherShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(DispatcherState::Idle as u8),
            stop: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: DispatcherState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    #[inline]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Frames handled so far.
    #[inline]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

impl Default for DispatcherShared {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Sleep when a poll finds the queue empty.
    pub idle_sleep: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_micros(crate::config::defaults::IDLE_SLEEP_US),
        }
    }
}

/// One optional handler per identifier of the closed set.
#[derive(Default)]
pub struct HandlerTable {
    slots: [Option<Handler>; HandlerId::COUNT],
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if `id` already has a handler.
    pub fn insert(&mut self, id: HandlerId, handler: Handler) -> Result<()> {
        let slot = &mut self.slots[id.index()];
        if slot.is_some() {
            return Err(ReflectError::DuplicateHandler(id));
        }
        *slot = Some(handler);
        Ok(())
    }

    #[inline]
    pub fn contains(&self, id: HandlerId) -> bool {
        self.slots[id.index()].is_some()
    }

    #[inline]
    pub fn get_mut(&mut self, id: HandlerId) -> Option<&mut Handler> {
        self.slots[id.index()].as_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<HandlerId> = HandlerId::ALL.into_iter().filter(|id| self.contains(*id)).collect();
        f.debug_struct("HandlerTable").field("registered", &ids).finish()
    }
}

/// Poll until stopped or faulted.
///
/// Returns the fatal error that faulted the dispatcher, `Ok(())` after an
/// orderly stop.
pub fn dispatcher_loop(
    reflection: &HostReflection,
    handlers: &mut HandlerTable,
    config: &DispatcherConfig,
    shared: &DispatcherShared,
) -> Result<()> {
    kdebug!("dispatcher started, handlers {:?}", handlers);
    shared.set_state(DispatcherState::Polling);

    loop {
        match dispatch_one(reflection, handlers, shared) {
            Ok(true) => {}
            Ok(false) => {
                if shared.stop_requested() {
                    break;
                }
                std::thread::sleep(config.idle_sleep);
            }
            Err(e) => {
                kerror!("dispatcher faulted: {}", e);
                shared.set_state(DispatcherState::Faulted);
                return Err(e);
            }
        }
    }

    shared.set_state(DispatcherState::Stopped);
    kdebug!("dispatcher stopped after {} frames", shared.dispatched());
    Ok(())
}

/// Serve at most one frame. `Ok(false)` when the queue was empty.
pub fn dispatch_one(
    reflection: &HostReflection,
    handlers: &mut HandlerTable,
    shared: &DispatcherShared,
) -> Result<bool> {
    let Some(envelope) = reflection.receive()? else {
        return Ok(false);
    };
    shared.set_state(DispatcherState::Dispatching);

    let id = envelope.header.handler;
    let Some(handler) = handlers.get_mut(id) else {
        let _ = envelope.respond(None);
        return Err(Corruption::UnregisteredHandler(id).into());
    };

    ktrace!("dispatch {:?} from thread {}", id, envelope.header.thread_id);
    let reply = match catch_unwind(AssertUnwindSafe(|| handler(&envelope.message))) {
        Ok(reply) => reply,
        Err(_) => {
            kerror!("handler {:?} panicked", id);
            let _ = envelope.respond(None);
            return Err(ReflectError::DispatcherPanicked);
        }
    };

    // Counted before the reply is published so a woken sender sees it.
    shared.dispatched.fetch_add(1, Ordering::Relaxed);

    if envelope.is_synchronous() {
        if reply.is_none() {
            kwarn!("handler {:?} gave no reply to a synchronous request", id);
        }
        if let Err(e) = envelope.respond(reply.as_ref()) {
            kerror!("reply from {:?} not deliverable: {}", id, e);
        }
    }

    shared.set_state(DispatcherState::Polling);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflect_core::message::{HandleRequest, StatusReply};
    use reflect_core::{HeapRegion, Queue, Region};
    use std::sync::Arc;

    fn reflection() -> HostReflection {
        let region: Arc<dyn Region> = Arc::new(HeapRegion::new(Queue::region_len_for(2)));
        HostReflection::new(Queue::format(region).unwrap())
    }

    fn status_handler(id: HandlerId) -> Handler {
        Box::new(move |_m: &Message| Some(Message::Status(StatusReply { handler: id, status: 0 })))
    }

    #[test]
    fn test_state_round_trip() {
        for s in [
            DispatcherState::Idle,
            DispatcherState::Polling,
            DispatcherState::Dispatching,
            DispatcherState::Stopped,
            DispatcherState::Faulted,
        ] {
            assert_eq!(DispatcherState::from_u8(s as u8), s);
        }
        assert!(DispatcherState::Faulted.is_terminal());
        assert!(!DispatcherState::Polling.is_terminal());
    }

    #[test]
    fn test_duplicate_handler_rejected() {
        let mut table = HandlerTable::new();
        table.insert(HandlerId::DeleteFile, status_handler(HandlerId::DeleteFile)).unwrap();
        assert_eq!(
            table.insert(HandlerId::DeleteFile, status_handler(HandlerId::DeleteFile)),
            Err(ReflectError::DuplicateHandler(HandlerId::DeleteFile))
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_dispatch_one_idle() {
        let r = reflection();
        let shared = DispatcherShared::new();
        assert_eq!(dispatch_one(&r, &mut HandlerTable::new(), &shared), Ok(false));
        assert_eq!(shared.state(), DispatcherState::Idle);
    }

    #[test]
    fn test_dispatch_async() {
        let r = reflection();
        let shared = DispatcherShared::new();
        let mut table = HandlerTable::new();
        let seen = Arc::new(AtomicU64::new(0));
        let seen2 = Arc::clone(&seen);
        table
            .insert(
                HandlerId::TeardownFile,
                Box::new(move |m: &Message| -> Option<Message> {
                    if let Message::Teardown(h) = m {
                        seen2.store(h.handle as u64, Ordering::Relaxed);
                    }
                    None
                }),
            )
            .unwrap();

        r.send_asynchronous(&Message::Teardown(HandleRequest { handle: 42 })).unwrap();
        assert_eq!(dispatch_one(&r, &mut table, &shared), Ok(true));
        assert_eq!(seen.load(Ordering::Relaxed), 42);
        assert_eq!(shared.dispatched(), 1);
        assert_eq!(shared.state(), DispatcherState::Polling);
    }

    #[test]
    fn test_unregistered_handler_faults() {
        let r = reflection();
        let shared = DispatcherShared::new();
        r.send_asynchronous(&Message::Delete(HandleRequest { handle: 1 })).unwrap();

        let err = dispatcher_loop(
            &r,
            &mut HandlerTable::new(),
            &DispatcherConfig::default(),
            &shared,
        )
        .unwrap_err();
        assert_eq!(err, ReflectError::Corruption(Corruption::UnregisteredHandler(HandlerId::DeleteFile)));
        assert_eq!(shared.state(), DispatcherState::Faulted);
    }

    #[test]
    fn test_stop_drains_queue_first() {
        let r = reflection();
        let shared = DispatcherShared::new();
        let mut table = HandlerTable::new();
        table.insert(HandlerId::TeardownFile, Box::new(|_m: &Message| -> Option<Message> { None })).unwrap();

        for h in 0..3 {
            r.send_asynchronous(&Message::Teardown(HandleRequest { handle: h })).unwrap();
        }
        shared.request_stop();
        dispatcher_loop(&r, &mut table, &DispatcherConfig::default(), &shared).unwrap();
        assert_eq!(shared.dispatched(), 3);
        assert_eq!(shared.state(), DispatcherState::Stopped);
        assert!(r.queue().is_empty());
    }

    #[test]
    fn test_handler_panic_faults() {
        let r = reflection();
        let shared = DispatcherShared::new();
        let mut table = HandlerTable::new();
        table
            .insert(HandlerId::TeardownFile, Box::new(|_m: &Message| -> Option<Message> { panic!("boom") }))
            .unwrap();
        r.send_asynchronous(&Message::Teardown(HandleRequest { handle: 0 })).unwrap();

        assert_eq!(
            dispatcher_loop(&r, &mut table, &DispatcherConfig::default(), &shared),
            Err(ReflectError::DispatcherPanicked)
        );
        assert_eq!(shared.state(), DispatcherState::Faulted);
    }
}
