//! Pending call table and connection flags.
//!
//! Lives behind the client's state lock. Every operation here is a short,
//! non-blocking critical section; delivery of completed calls happens after
//! the lock is released.

use std::collections::HashMap;

use crate::call::Call;

/// First sequence number handed out on a connection.
pub(crate) const FIRST_SEQ: u64 = 1;

/// In-flight calls keyed by sequence number, plus shutdown state.
#[derive(Debug)]
pub(crate) struct PendingTable {
    next_seq: u64,
    calls: HashMap<u64, Call>,
    /// User has called `close`.
    closing: bool,
    /// Reader loop has exited and swept the table.
    shutdown: bool,
}

impl PendingTable {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: FIRST_SEQ,
            calls: HashMap::new(),
            closing: false,
            shutdown: false,
        }
    }

    /// Register a call under a fresh sequence number.
    ///
    /// Hands the call back untouched if the connection is closing or shut
    /// down; such a call must never reach the wire.
    pub(crate) fn register(&mut self, mut call: Call) -> Result<u64, Call> {
        if self.closing || self.shutdown {
            return Err(call);
        }
        let seq = self.allocate_seq();
        call.seq = Some(seq);
        self.calls.insert(seq, call);
        Ok(seq)
    }

    /// Allocate a sequence number without registering anything.
    ///
    /// Used for fire-and-forget requests; `None` once closing or shut down.
    pub(crate) fn reserve_seq(&mut self) -> Option<u64> {
        if self.closing || self.shutdown {
            return None;
        }
        Some(self.allocate_seq())
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Remove and return the call registered under `seq`, if any.
    pub(crate) fn remove(&mut self, seq: u64) -> Option<Call> {
        self.calls.remove(&seq)
    }

    /// Mark closing. Returns `false` if `close` was already called.
    pub(crate) fn begin_close(&mut self) -> bool {
        if self.closing {
            return false;
        }
        self.closing = true;
        true
    }

    /// Mark the connection shut down and take every remaining call,
    /// in sequence order.
    pub(crate) fn shut_down(&mut self) -> Vec<Call> {
        self.shutdown = true;
        let mut calls: Vec<(u64, Call)> = self.calls.drain().collect();
        calls.sort_unstable_by_key(|(seq, _)| *seq);
        calls.into_iter().map(|(_, call)| call).collect()
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}
