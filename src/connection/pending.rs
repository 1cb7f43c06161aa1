use std::collections::{HashMap, VecDeque};
use std::num::NonZeroU32;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Error, ErrorKind, Result};
use crate::message::Message;

/// The hard cap on requests in flight; running into it means replies are
/// not arriving and callers should back off.
pub(crate) const MAX_PENDING: usize = 8192;

/// How many completed serials to remember so that a duplicate or late reply
/// can be told apart from a foreign one.
const RECENT_SERIALS: usize = 1024;

/// One outstanding method call.
struct Pending {
    deadline: Instant,
    reply: oneshot::Sender<Result<Message>>,
}

/// The per-session serial counter: starts at 1, wraps skipping 0.
pub(crate) struct SerialCounter {
    serial: u32,
}

impl SerialCounter {
    pub(crate) fn new() -> Self {
        Self { serial: 0 }
    }

    pub(crate) fn next_serial(&mut self) -> NonZeroU32 {
        loop {
            let Some(serial) = NonZeroU32::new(self.serial.wrapping_add(1)) else {
                self.serial = 1;
                continue;
            };

            self.serial = serial.get();
            break serial;
        }
    }
}

/// The reply correlator: maps outstanding serials to their completion
/// sinks, and keeps deadlines for the expiry sweep.
///
/// Mutated only by the connection task; callers observe completions through
/// the oneshot receivers.
pub(crate) struct PendingReplies {
    entries: HashMap<u32, Pending>,
    /// Serials completed, expired or cancelled recently. Replies matching
    /// these are dropped silently instead of surfacing as inbound traffic.
    recent: VecDeque<u32>,
}

impl PendingReplies {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recent: VecDeque::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() >= MAX_PENDING
    }

    pub(crate) fn contains(&self, serial: NonZeroU32) -> bool {
        self.entries.contains_key(&serial.get())
    }

    /// Register a pending entry for `serial`.
    ///
    /// A serial that is already registered means the counter lapped 2^32 - 1
    /// outstanding requests, which is unrecoverable.
    pub(crate) fn register(
        &mut self,
        serial: NonZeroU32,
        deadline: Instant,
        reply: oneshot::Sender<Result<Message>>,
    ) -> Result<()> {
        if self.entries.len() >= MAX_PENDING {
            return Err(Error::new(ErrorKind::PendingLimitExceeded(MAX_PENDING)));
        }

        if self.entries.contains_key(&serial.get()) {
            return Err(Error::new(ErrorKind::SerialCollision(serial.get())));
        }

        self.entries.insert(serial.get(), Pending { deadline, reply });
        Ok(())
    }

    /// Route a reply to its pending entry.
    ///
    /// Returns the message back when no entry wants it and it was not
    /// recently completed, in which case it belongs to the inbound path.
    pub(crate) fn complete(&mut self, reply_serial: NonZeroU32, message: Message) -> Option<Message> {
        let serial = reply_serial.get();

        if let Some(pending) = self.entries.remove(&serial) {
            self.remember(serial);
            // A closed receiver means the caller cancelled; the reply is
            // discarded silently.
            let _ = pending.reply.send(Ok(message));
            return None;
        }

        if self.recent.contains(&serial) {
            return None;
        }

        Some(message)
    }

    /// The earliest deadline among the outstanding entries.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|pending| pending.deadline).min()
    }

    /// Complete every entry whose deadline has passed with a timeout error.
    pub(crate) fn expire(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(&serial, _)| serial)
            .collect();

        for serial in expired {
            if let Some(pending) = self.entries.remove(&serial) {
                self.remember(serial);
                let _ = pending.reply.send(Err(Error::new(ErrorKind::Timeout)));
            }
        }
    }

    /// Fail every outstanding entry, used when the transport goes inactive.
    pub(crate) fn fail_all(&mut self) {
        for (serial, pending) in self.entries.drain() {
            let _ = pending.reply.send(Err(Error::new(ErrorKind::ClosedChannel)));
            if self.recent.len() == RECENT_SERIALS {
                self.recent.pop_front();
            }
            self.recent.push_back(serial);
        }
    }

    fn remember(&mut self, serial: u32) {
        if self.recent.len() == RECENT_SERIALS {
            self.recent.pop_front();
        }

        self.recent.push_back(serial);
    }
}
