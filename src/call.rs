//! Call handles and completion delivery.
//!
//! A [`Call`] describes one invocation. Once it finishes (reply, remote error,
//! write failure or shutdown) the completed value is delivered on the call's
//! [`Done`] channel. Delivery never blocks: a full channel drops the
//! completion and logs a warning, because it runs on the shared reader task.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{RpcError, Result};

/// Sending side of a completion channel.
///
/// Cheap to clone; one `Done` may be shared by many calls, in which case its
/// capacity should cover the number of calls outstanding at once.
#[derive(Debug, Clone)]
pub struct Done {
    tx: mpsc::Sender<Call>,
    capacity: usize,
}

impl Done {
    /// Buffer capacity requested when the channel was created.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the channel has no buffer space at all.
    pub fn is_unbuffered(&self) -> bool {
        self.capacity == 0
    }
}

/// Create a completion channel with room for `capacity` completed calls.
///
/// A capacity of zero yields an unbuffered channel. Such a channel can never
/// accept a non-blocking completion, so [`Client::go`](crate::Client::go)
/// rejects it with [`RpcError::UnbufferedDone`].
pub fn done_channel(capacity: usize) -> (Done, mpsc::Receiver<Call>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Done { tx, capacity }, rx)
}

/// One RPC invocation.
#[derive(Debug)]
pub struct Call {
    /// Sequence number, set once the call is registered.
    pub seq: Option<u64>,
    /// Target in `"Service.Method"` form.
    pub service_method: String,
    /// Argument bytes.
    pub args: Bytes,
    /// Frontend session id forwarded with the request.
    pub sid: u64,
    /// Reply bytes, set on success.
    pub reply: Option<Bytes>,
    /// Error status, set on failure.
    pub error: Option<RpcError>,
    done: Done,
}

impl Call {
    pub(crate) fn new(service_method: String, args: Bytes, sid: u64, done: Done) -> Self {
        Self {
            seq: None,
            service_method,
            args,
            sid,
            reply: None,
            error: None,
            done,
        }
    }

    /// Whether the call has finished (successfully or not).
    pub fn is_complete(&self) -> bool {
        self.error.is_some() || self.reply.is_some()
    }

    /// Convert the completed call into its outcome.
    ///
    /// The error slot wins if both slots are somehow set.
    pub fn into_result(self) -> Result<Bytes> {
        match (self.error, self.reply) {
            (Some(err), _) => Err(err),
            (None, Some(reply)) => Ok(reply),
            (None, None) => Err(RpcError::Protocol(format!(
                "call {} completed without a reply",
                self.service_method
            ))),
        }
    }

    /// Complete with an error and deliver.
    pub(crate) fn fail(mut self, err: RpcError, dropped: &AtomicU64) {
        self.error = Some(err);
        self.reply = None;
        deliver(self, dropped);
    }

    /// Complete with reply bytes and deliver.
    pub(crate) fn succeed(mut self, reply: Bytes, dropped: &AtomicU64) {
        self.reply = Some(reply);
        deliver(self, dropped);
    }
}

/// Handle returned by [`Client::go`](crate::Client::go).
///
/// Owns the completion receiver when `go` allocated the channel itself.
/// Calls issued with a caller-supplied [`Done`] complete on that channel's
/// receiver instead, and [`CallHandle::done`] returns `None` for them.
#[derive(Debug)]
pub struct CallHandle {
    seq: Option<u64>,
    service_method: String,
    receiver: Option<mpsc::Receiver<Call>>,
}

impl CallHandle {
    pub(crate) fn new(
        seq: Option<u64>,
        service_method: String,
        receiver: Option<mpsc::Receiver<Call>>,
    ) -> Self {
        Self {
            seq,
            service_method,
            receiver,
        }
    }

    /// Sequence number the request went out with; `None` if the client was
    /// already shut down and nothing was sent.
    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    /// Target in `"Service.Method"` form.
    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Wait for the completed call on the channel `go` allocated.
    pub async fn done(&mut self) -> Option<Call> {
        match self.receiver.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take the completion receiver, if `go` allocated one.
    pub fn into_receiver(self) -> Option<mpsc::Receiver<Call>> {
        self.receiver
    }
}

/// Deliver a completed call on its own channel without blocking.
///
/// A completion that finds the channel full is dropped and counted in
/// `dropped`.
pub(crate) fn deliver(call: Call, dropped: &AtomicU64) {
    let tx = call.done.tx.clone();
    match tx.try_send(call) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(call)) => {
            dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "discarding reply for {} (seq {:?}) due to insufficient done channel capacity",
                call.service_method,
                call.seq
            );
        }
        Err(mpsc::error::TrySendError::Closed(call)) => {
            // Receiver gone; nobody is waiting for this call anymore
            tracing::debug!(
                "done channel closed, dropping completion for {} (seq {:?})",
                call.service_method,
                call.seq
            );
        }
    }
}
