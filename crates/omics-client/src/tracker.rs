//! Job tracker - owns the running status pollers.
//!
//! At most one poller runs per request id. Starting a second one while the
//! first is active is rejected rather than replacing it. Each poller runs as
//! its own task and is reached through a [`PollHandle`].

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::PollPolicy;
use crate::error::AnalysisError;
use crate::gateway::Backend;
use crate::poller::{PollCompletion, PollSnapshot, StatusPoller};

/// Handle to a running poller for waiting, progress and cancellation.
pub struct PollHandle {
    request_id: String,
    cancel_token: CancellationToken,
    snapshots: watch::Receiver<PollSnapshot>,
    outcome: oneshot::Receiver<Result<PollCompletion, AnalysisError>>,
}

impl PollHandle {
    pub fn id(&self) -> &str {
        &self.request_id
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Wait for the poller to finish.
    pub async fn wait(self) -> Result<PollCompletion, AnalysisError> {
        match self.outcome.await {
            Ok(outcome) => outcome,
            // Task went away without reporting (runtime shutdown).
            Err(_) => Err(AnalysisError::Cancelled),
        }
    }

    /// Create a guard that cancels on drop.
    ///
    /// Hand this to whatever owns the view of the job; when it goes away the
    /// poller stops without further queries.
    pub fn guard(&self) -> PollGuard {
        PollGuard::new(self.cancel_token.clone())
    }
}

/// Guard for a poller - cancels on drop unless disarmed.
pub struct PollGuard {
    cancel_token: Option<CancellationToken>,
}

impl PollGuard {
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            cancel_token: Some(cancel_token),
        }
    }

    pub fn disarm(&mut self) {
        self.cancel_token = None;
    }
}

impl Drop for PollGuard {
    fn drop(&mut self) {
        if let Some(ref token) = self.cancel_token {
            token.cancel();
        }
    }
}

pub struct JobTracker {
    backend: Arc<dyn Backend>,
    policy: PollPolicy,
    active: DashMap<String, CancellationToken>,
}

impl JobTracker {
    pub fn new(backend: Arc<dyn Backend>, policy: PollPolicy) -> Arc<Self> {
        Arc::new(Self {
            backend,
            policy,
            active: DashMap::new(),
        })
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Start polling a request.
    pub fn track(self: &Arc<Self>, request_id: &str) -> Result<PollHandle, AnalysisError> {
        self.spawn_poller(request_id, CancellationToken::new())
    }

    /// Start polling a request; cancelling `parent` also cancels the poller.
    pub fn track_linked(
        self: &Arc<Self>,
        request_id: &str,
        parent: &CancellationToken,
    ) -> Result<PollHandle, AnalysisError> {
        self.spawn_poller(request_id, parent.child_token())
    }

    fn spawn_poller(
        self: &Arc<Self>,
        request_id: &str,
        cancel_token: CancellationToken,
    ) -> Result<PollHandle, AnalysisError> {
        match self.active.entry(request_id.to_string()) {
            Entry::Occupied(_) => {
                tracing::warn!(request_id = %request_id, "Rejected duplicate poller");
                return Err(AnalysisError::Precondition(format!(
                    "analysis request '{}' is already being polled",
                    request_id
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel_token.clone());
            }
        }

        let poller = StatusPoller::new(
            Arc::clone(&self.backend),
            self.policy.clone(),
            request_id,
            cancel_token.clone(),
        );
        let snapshots = poller.subscribe();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let tracker = Arc::clone(self);
        let id = request_id.to_string();
        tokio::spawn(async move {
            let outcome = poller.run().await;
            tracker.active.remove(&id);
            // Receiver may be gone if the handle was dropped.
            let _ = outcome_tx.send(outcome);
        });

        Ok(PollHandle {
            request_id: request_id.to_string(),
            cancel_token,
            snapshots,
            outcome: outcome_rx,
        })
    }

    /// Cancel the poller for a request. Returns true if one was running.
    pub fn cancel(&self, request_id: &str) -> bool {
        if let Some(token) = self.active.get(request_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn is_tracking(&self, request_id: &str) -> bool {
        self.active.contains_key(request_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel every running poller.
    pub fn cancel_all(&self) {
        for entry in self.active.iter() {
            entry.value().cancel();
        }
    }
}
