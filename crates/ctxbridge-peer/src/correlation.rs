//! Outstanding calls keyed by correlation id.
//!
//! Every entry is removed exactly once, by whichever of response, timeout,
//! restart or teardown reaches it first. Later attempts find nothing and
//! are no-ops.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use ctxbridge_envelope::{CorrelationId, Outcome};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::PeerError;
use crate::marshal::unmarshal;

pub(crate) type CallResult = Result<Value, PeerError>;

/// What is needed to re-send a call to a restarted endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaySpec {
    pub payload: Vec<Value>,
    pub large_payload: bool,
}

/// A call that survives an endpoint restart.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayableCall {
    pub id: CorrelationId,
    pub name: String,
    pub spec: ReplaySpec,
}

struct PendingCall {
    name: String,
    created_at: Instant,
    sender: oneshot::Sender<CallResult>,
    replay: Option<ReplaySpec>,
}

impl PendingCall {
    fn complete(self, id: CorrelationId, result: CallResult) {
        trace!(
            name = %self.name,
            id = %id,
            elapsed = ?self.created_at.elapsed(),
            ok = result.is_ok(),
            "settling call"
        );
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.sender.send(result);
    }
}

/// Pending calls of one channel.
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<CorrelationId, PendingCall>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id for a call and return the receiver its result
    /// will arrive on.
    pub fn register(
        &self,
        name: &str,
        replay: Option<ReplaySpec>,
    ) -> (CorrelationId, oneshot::Receiver<CallResult>) {
        let (sender, receiver) = oneshot::channel();
        let mut rng = rand::thread_rng();
        let mut pending = self.pending.lock();
        let id = loop {
            let candidate = CorrelationId::random(&mut rng);
            if !pending.contains_key(&candidate) {
                break candidate;
            }
            trace!(id = %candidate, "correlation id collision; drawing again");
        };
        pending.insert(
            id,
            PendingCall {
                name: name.to_string(),
                created_at: Instant::now(),
                sender,
                replay,
            },
        );
        (id, receiver)
    }

    fn take(&self, id: CorrelationId) -> Option<PendingCall> {
        self.pending.lock().remove(&id)
    }

    /// Complete a call successfully. Returns `false` if `id` is not pending.
    pub fn resolve(&self, id: CorrelationId, value: Value) -> bool {
        self.finish(id, Ok(value))
    }

    /// Fail a call. Returns `false` if `id` is not pending.
    pub fn reject(&self, id: CorrelationId, error: PeerError) -> bool {
        self.finish(id, Err(error))
    }

    /// Complete a call from a decoded response outcome.
    pub fn settle(&self, id: CorrelationId, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Success(value) => self.resolve(id, value),
            Outcome::Failure(desc) => self.reject(id, PeerError::Remote(unmarshal(desc))),
        }
    }

    /// Fail a call with a timeout error if it is still pending.
    pub fn expire(&self, id: CorrelationId, after: Duration) -> bool {
        match self.take(id) {
            Some(call) => {
                let name = call.name.clone();
                call.complete(id, Err(PeerError::Timeout { name, after }));
                true
            }
            None => false,
        }
    }

    /// Drop a call without notifying anyone.
    pub fn remove(&self, id: CorrelationId) -> bool {
        self.take(id).is_some()
    }

    fn finish(&self, id: CorrelationId, result: CallResult) -> bool {
        match self.take(id) {
            Some(call) => {
                call.complete(id, result);
                true
            }
            None => false,
        }
    }

    /// Fail every pending call. Returns how many there were.
    pub fn reject_all(&self, error: impl Fn() -> PeerError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, call) in drained {
            call.complete(id, Err(error()));
        }
        count
    }

    /// Split pending calls at an endpoint restart.
    ///
    /// Calls registered with a [`ReplaySpec`] stay pending under the same id
    /// and are returned for re-sending; every other call is rejected with
    /// [`PeerError::Reconnected`].
    pub fn prepare_restart(&self) -> Vec<ReplayableCall> {
        let mut pending = self.pending.lock();
        let doomed: Vec<CorrelationId> = pending
            .iter()
            .filter(|(_, call)| call.replay.is_none())
            .map(|(id, _)| *id)
            .collect();
        let rejected: Vec<(CorrelationId, PendingCall)> = doomed
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|call| (id, call)))
            .collect();
        let replay = pending
            .iter()
            .filter_map(|(id, call)| {
                call.replay.as_ref().map(|spec| ReplayableCall {
                    id: *id,
                    name: call.name.clone(),
                    spec: spec.clone(),
                })
            })
            .collect();
        drop(pending);

        for (id, call) in rejected {
            let name = call.name.clone();
            call.complete(id, Err(PeerError::Reconnected { name }));
        }
        replay
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish()
    }
}
