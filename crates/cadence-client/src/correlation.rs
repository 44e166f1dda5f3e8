//! Correlation table: outstanding calls keyed by id.
//!
//! Every entry is settled exactly once. It leaves the table on a matching
//! response, on its deadline, or when the connection is lost, whichever
//! comes first; later attempts to settle it find nothing and return `false`.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use cadence_core::prelude::*;
use cadence_core::CorrelationId;

/// Receives the outcome of one call.
pub type ReplyReceiver = oneshot::Receiver<Result<Value>>;

#[derive(Debug)]
struct PendingCall {
    method: String,
    reply: oneshot::Sender<Result<Value>>,
    timeout: Duration,
    deadline: Instant,
}

/// Outstanding calls on one logical connection.
///
/// Ids come from a counter that is never reset, so two live entries can
/// never share one, even across reconnects.
#[derive(Debug)]
pub struct CorrelationTable {
    next_id: u64,
    pending: HashMap<CorrelationId, PendingCall>,
    accepting: bool,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationTable {
    /// A closed table: registrations are refused until [`open`](Self::open).
    pub fn new() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            accepting: false,
        }
    }

    /// Start accepting registrations (on `Ready`).
    pub fn open(&mut self) {
        self.accepting = true;
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    /// Register a call to `method` that must settle within `timeout`.
    ///
    /// Returns `None` while the table is closed.
    pub fn register(
        &mut self,
        method: &str,
        timeout: Duration,
    ) -> Option<(CorrelationId, ReplyReceiver)> {
        if !self.accepting {
            return None;
        }

        let id = CorrelationId::new(self.next_id);
        self.next_id += 1;

        let (reply, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_string(),
                reply,
                timeout,
                deadline: deadline_after(timeout),
            },
        );
        Some((id, rx))
    }

    /// Settle `id` with a server outcome.
    ///
    /// Returns `false` for an unknown or already-settled id.
    pub fn resolve(&mut self, id: CorrelationId, outcome: std::result::Result<Value, Value>) -> bool {
        match self.pending.remove(&id) {
            Some(call) => {
                let _ = call.reply.send(outcome.map_err(Error::Remote));
                true
            }
            None => false,
        }
    }

    /// Reject `id` with [`Error::Timeout`].
    pub fn expire(&mut self, id: CorrelationId) -> bool {
        match self.pending.remove(&id) {
            Some(call) => {
                let _ = call
                    .reply
                    .send(Err(Error::timeout(call.method, call.timeout)));
                true
            }
            None => false,
        }
    }

    /// Reject every entry whose deadline is at or before `now`.
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<CorrelationId> {
        let overdue: Vec<CorrelationId> = self
            .pending
            .iter()
            .filter(|(_, call)| call.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &overdue {
            self.expire(*id);
        }
        overdue
    }

    /// Forget `id` without settling it (the request never left).
    pub fn remove(&mut self, id: CorrelationId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Stop accepting and reject everything outstanding with
    /// [`Error::ConnectionLost`]. Returns how many calls were rejected.
    pub fn close(&mut self) -> usize {
        self.accepting = false;
        let count = self.pending.len();
        for (_, call) in self.pending.drain() {
            let _ = call.reply.send(Err(Error::ConnectionLost));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }
}

/// Deadlines past this horizon are treated as "never".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(timeout: Duration) -> Instant {
    Instant::now() + timeout.min(FAR_FUTURE)
}
