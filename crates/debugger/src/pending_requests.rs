//! Matching responses to the calls waiting for them.

use std::collections::HashMap;

use tokio::sync::oneshot;
use transport::{Response, Seq};

struct PendingCall {
    command: &'static str,
    response_tx: oneshot::Sender<Response>,
}

/// Calls sent to the backend that have not been answered yet.
///
/// Once closed, nothing new is accepted, so a call racing the end of the
/// connection cannot wait out its full timeout.
#[derive(Default)]
pub(crate) struct PendingRequests {
    pending: HashMap<Seq, PendingCall>,
    closed: bool,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a call. Returns `None` if the connection has already ended.
    pub(crate) fn insert(
        &mut self,
        seq: Seq,
        command: &'static str,
    ) -> Option<oneshot::Receiver<Response>> {
        if self.closed {
            return None;
        }
        let (response_tx, response_rx) = oneshot::channel();
        self.pending.insert(
            seq,
            PendingCall {
                command,
                response_tx,
            },
        );
        Some(response_rx)
    }

    /// Hand a response to its caller. Returns false if nobody was waiting
    /// for it, either because it timed out or because the sequence number
    /// was never issued.
    pub(crate) fn complete(&mut self, response: Response) -> bool {
        match self.pending.remove(&response.request_seq) {
            Some(call) => {
                tracing::trace!(seq = response.request_seq, command = call.command, "completing call");
                // the caller may have stopped waiting
                let _ = call.response_tx.send(response);
                true
            }
            None => false,
        }
    }

    pub(crate) fn remove(&mut self, seq: Seq) {
        self.pending.remove(&seq);
    }

    /// Drop every waiting call and refuse new ones. Waiters observe a closed
    /// channel.
    pub(crate) fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.pending.len();
        for (seq, call) in self.pending.drain() {
            tracing::debug!(seq, command = call.command, "abandoning call");
        }
        dropped
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}
