//! Request/reply correlation.
//!
//! Every outgoing method call gets a fresh serial and a slot in the
//! [`CallRegistry`]; the reply (METHOD_RETURN or ERROR, both fulfil the same
//! slot) is delivered through a oneshot channel. Registration happens before
//! the call hits the wire so a fast reply can never race it.
//!
//! There is no expiry: a peer that never answers leaves the slot in place
//! for the life of the connection, and an abandoned [`PendingReply`] leaves
//! its slot until a matching reply arrives.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{BusError, Result};
use crate::message::Message;

/// A call in flight: the request as sent plus the channel its reply will be
/// delivered on.
struct PendingCall {
    call: Message,
    tx: oneshot::Sender<Message>,
}

/// Correlates replies to in-flight calls by serial.
#[derive(Default)]
pub(crate) struct CallRegistry {
    pending: HashMap<u32, PendingCall>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Register a call under its (already assigned) serial.
    ///
    /// Serials are never reused on a connection, so a collision can only be
    /// a bookkeeping bug; the stale entry is replaced and logged.
    pub fn register(&mut self, call: Message) -> PendingReply {
        let serial = call.serial;
        debug_assert_ne!(serial, 0, "call registered before serial assignment");
        let (tx, rx) = oneshot::channel();
        if let Some(stale) = self.pending.insert(serial, PendingCall { call, tx }) {
            warn!(
                serial,
                member = stale.call.member.as_deref().unwrap_or(""),
                "replacing a pending call with a colliding serial"
            );
        }
        PendingReply { serial, rx }
    }

    /// Deliver a reply to the call it answers.
    ///
    /// Returns `false` when no call with that serial is waiting; the caller
    /// decides how to report the orphan.
    pub fn complete(&mut self, reply_serial: u32, reply: Message) -> bool {
        match self.pending.remove(&reply_serial) {
            Some(pending) => {
                if pending.tx.send(reply).is_err() {
                    debug!(
                        serial = reply_serial,
                        member = pending.call.member.as_deref().unwrap_or(""),
                        "reply arrived for an abandoned call"
                    );
                }
                true
            }
            None => false,
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Handle to a reply that has not arrived yet.
///
/// Resolved by the connection's dispatch loop. `try_take` fits the
/// single-task model (pump, then check); `wait` suits programs where another
/// task pumps the connection.
pub struct PendingReply {
    serial: u32,
    rx: oneshot::Receiver<Message>,
}

impl PendingReply {
    /// Serial of the call this handle belongs to.
    #[inline]
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The reply, if dispatch has already delivered it.
    ///
    /// `Ok(None)` means "still pending". [`BusError::ReplyDropped`] means the
    /// connection side of the channel is gone (or the reply was already
    /// taken).
    pub fn try_take(&mut self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(BusError::ReplyDropped),
        }
    }

    /// Wait for the reply.
    ///
    /// Some other task must be pumping the connection or this never
    /// resolves; there is deliberately no built-in timeout.
    pub async fn wait(self) -> Result<Message> {
        self.rx.await.map_err(|_| BusError::ReplyDropped)
    }
}
