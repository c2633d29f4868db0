//! `HostReflection`: the coordinator both sides talk through.
//!
//! Producers call `send_synchronous` / `send_asynchronous`; the host
//! dispatcher calls `receive` and answers through `Envelope::respond`.
//! A `HostReflection` is a cheap clone of a queue handle, a spin policy and
//! the set of return addresses still waiting for replies.
//!
//! Every producer and the dispatcher must hold clones of the same
//! `HostReflection`. The dispatcher only writes to addresses its clones
//! issued; a synchronous frame carrying any other address is corruption.
//!
//! # Synchronous round trip
//!
//! ```text
//! producer                                   dispatcher
//!   slot = Box<ReplySlot>, issue(&slot)
//!   push [SyncHeader(addr=&slot) | payload]
//!   spin on slot.done          ─────────►     receive(): claim(addr) → Envelope
//!                                              handler(&message)
//!                              ◄─────────     respond(): data, len, done=1
//!   decode_reply(slot.payload)
//! ```

use std::sync::Arc;

use crate::backoff::{Backoff, SpinPolicy};
use crate::error::{Corruption, ReflectError, Result};
use crate::header::{Header, MessageType, SynchronousHeader, ThreadId, HEADER_SIZE};
use crate::message::{decode_reply, decode_request, encode_payload, Message, MAX_MESSAGE_SIZE};
use crate::queue::Queue;
use crate::reply::{PendingReplies, ReplySlot};
use crate::{kdebug, kwarn, ktrace};

/// One decoded request pulled off the queue.
#[derive(Debug)]
pub struct Envelope {
    pub header: Header,
    pub message: Message,
    /// Claimed from the pending set; present for synchronous frames.
    return_address: Option<u64>,
}

impl Envelope {
    #[inline]
    pub fn is_synchronous(&self) -> bool {
        self.return_address.is_some()
    }

    #[inline]
    pub fn return_address(&self) -> Option<u64> {
        self.return_address
    }

    /// Write the reply for a synchronous request and wake its sender.
    ///
    /// `None`, or a reply that fails to encode, completes the sender with an
    /// empty payload; it then fails with `UnexpectedReply` instead of hanging.
    /// Asynchronous envelopes ignore the reply.
    pub fn respond(self, reply: Option<&Message>) -> Result<()> {
        let Some(address) = self.return_address else {
            return Ok(());
        };
        let mut bytes = Vec::new();
        let encoded = match reply {
            Some(msg) => encode_payload(msg, &mut bytes),
            None => Ok(()),
        };
        if encoded.is_err() {
            bytes.clear();
        }
        // Safety: receive claimed the address from the pending set, so it
        // names a live slot and this is its only completion.
        unsafe { ReplySlot::complete(address, &bytes) };
        encoded
    }
}

/// Marshals messages into a shared queue and back.
#[derive(Clone, Debug)]
pub struct HostReflection {
    queue: Queue,
    policy: SpinPolicy,
    pending: Arc<PendingReplies>,
}

impl HostReflection {
    pub fn new(queue: Queue) -> Self {
        Self::with_policy(queue, SpinPolicy::new())
    }

    pub fn with_policy(queue: Queue, policy: SpinPolicy) -> Self {
        Self {
            queue,
            policy,
            pending: Arc::new(PendingReplies::new()),
        }
    }

    #[inline]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    #[inline]
    pub fn policy(&self) -> &SpinPolicy {
        &self.policy
    }

    /// Synchronous requests published but not yet picked up by `receive`,
    /// including ones whose sender timed out.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Largest payload any message may carry.
    #[inline]
    pub const fn max_message_size(&self) -> usize {
        MAX_MESSAGE_SIZE
    }

    /// Send `message` and block until the host replies.
    ///
    /// Spins on a private reply slot; never makes a system call unless the
    /// spin policy yields. With a policy timeout, an unanswered request
    /// returns `Timeout` and its reply slot is leaked, since the dispatcher
    /// may still write to it later.
    pub fn send_synchronous(&self, message: &Message) -> Result<Message> {
        let handler = message.handler();
        if !message.is_request() {
            return Err(ReflectError::NotRequest(handler));
        }

        let slot = Box::new(ReplySlot::new());
        let address = slot.address();
        let frame = self.build_frame(MessageType::Synchronous, message, Some(address))?;

        // Issued before the push: the dispatcher may pull the frame at once.
        self.pending.issue(&slot);
        if let Err(e) = self.push_frame(&frame) {
            self.pending.withdraw(address);
            return Err(e);
        }
        ktrace!("sync {:?} sent, {} bytes, slot {:#x}", handler, frame.len(), address);

        if let Err(e) = slot.wait(&self.policy) {
            kwarn!("sync {:?} timed out; leaking reply slot {:#x}", handler, address);
            Box::leak(slot);
            return Err(e);
        }

        let bytes = slot.payload().unwrap_or(&[]);
        if bytes.is_empty() {
            return Err(ReflectError::UnexpectedReply(handler));
        }
        Ok(decode_reply(handler, bytes)?)
    }

    /// Send `message` without waiting for anything but queue space.
    pub fn send_asynchronous(&self, message: &Message) -> Result<()> {
        if !message.is_request() {
            return Err(ReflectError::NotRequest(message.handler()));
        }
        let frame = self.build_frame(MessageType::Asynchronous, message, None)?;
        self.push_frame(&frame)
    }

    /// Pull and decode the next frame; `Ok(None)` when the queue is idle.
    ///
    /// Must only be called from the single consumer. A corrupt frame is an
    /// error; if its return address was issued by a sender, that sender is
    /// released with an empty reply first. An address nobody issued is never
    /// written to.
    pub fn receive(&self) -> Result<Option<Envelope>> {
        if !self.queue.peek() {
            return Ok(None);
        }

        let mut raw = [0u8; HEADER_SIZE];
        if !self.queue.pull(&mut raw) {
            return Ok(None);
        }
        let header = Header::decode(&raw)?;

        let address = match header.kind {
            MessageType::Synchronous => {
                let mut addr = [0u8; 8];
                if !self.queue.pull(&mut addr) {
                    return Err(Corruption::TruncatedFrame.into());
                }
                Some(SynchronousHeader::decode_address(&addr))
            }
            _ => None,
        };

        let mut payload = vec![0u8; header.payload_len as usize];
        let pulled = self.queue.pull(&mut payload);

        let return_address = match address {
            Some(addr) if !self.pending.claim(addr) => {
                kdebug!("{:?} frame carries unissued return address {:#x}", header.handler, addr);
                return Err(Corruption::BadReturnAddress(addr).into());
            }
            other => other,
        };

        let decoded = if pulled {
            decode_request(header.handler, &payload)
        } else {
            Err(Corruption::TruncatedFrame)
        };

        match decoded {
            Ok(message) => {
                ktrace!(
                    "recv {:?} {:?} from thread {}",
                    header.kind,
                    header.handler,
                    header.thread_id
                );
                Ok(Some(Envelope { header, message, return_address }))
            }
            Err(c) => {
                if let Some(address) = return_address {
                    kdebug!("releasing sender {:#x} of corrupt frame", address);
                    // Safety: claimed from the pending set above.
                    unsafe { ReplySlot::complete(address, &[]) };
                }
                Err(c.into())
            }
        }
    }

    fn header_for(&self, kind: MessageType, message: &Message) -> Header {
        Header {
            kind,
            thread_id: ThreadId::current(),
            handler: message.handler(),
            payload_len: message.payload_size() as u32,
        }
    }

    /// Header (plus return address when synchronous) followed by payload.
    fn build_frame(
        &self,
        kind: MessageType,
        message: &Message,
        address: Option<u64>,
    ) -> Result<Vec<u8>> {
        let header = self.header_for(kind, message);
        let mut frame = Vec::with_capacity(kind.header_size() + message.payload_size());
        match address {
            Some(address) => {
                frame.extend_from_slice(&SynchronousHeader { header, address }.encode())
            }
            None => frame.extend_from_slice(&header.encode()),
        }
        encode_payload(message, &mut frame)?;
        Ok(frame)
    }

    /// Retry `push` until the frame fits or the policy's deadline passes.
    fn push_frame(&self, frame: &[u8]) -> Result<()> {
        let mut backoff = Backoff::new(&self.policy);
        while !self.queue.push(frame) {
            if backoff.expired() {
                return Err(ReflectError::Timeout);
            }
            backoff.snooze();
        }
        Ok(())
    }
}
