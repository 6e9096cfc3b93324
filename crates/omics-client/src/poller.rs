//! StatusPoller: drives one analysis request to a terminal state.
//!
//! Flow:
//! 1. Query status
//! 2. COMPLETED → TerminalSuccess, FAILED → TerminalFailure (polling stops)
//! 3. Anything else, including 404 and unknown values, consumes one attempt
//! 4. Budget left: wait one interval and query again; otherwise TimedOut
//!
//! Cancellation is a `CancellationToken` owned by whoever holds the task.
//! A cancelled poller issues no further queries and discards an in-flight
//! response. Running consumes the poller, so `Polling` is entered at most once
//! per instance.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::PollPolicy;
use crate::error::AnalysisError;
use crate::gateway::{Backend, GatewayError};
use crate::request::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollPhase {
    NotStarted,
    Polling,
    TerminalSuccess,
    TerminalFailure,
    TimedOut,
    Cancelled,
    /// A fatal backend error stopped polling.
    Errored,
}

impl PollPhase {
    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Polling)
    }
}

/// Attempt bookkeeping for a single poller (or resolver) run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollAttemptState {
    pub request_id: String,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollAttemptState {
    pub fn new(request_id: &str, policy: &PollPolicy) -> Self {
        Self {
            request_id: request_id.to_string(),
            attempts_made: 0,
            max_attempts: policy.effective_max_attempts(),
            interval: policy.interval,
        }
    }

    /// Continue a budget that `used` queries have already drawn from.
    pub fn resume(request_id: &str, policy: &PollPolicy, used: u32) -> Self {
        Self {
            attempts_made: used,
            ..Self::new(request_id, policy)
        }
    }

    /// Count an attempt that did not settle. Returns true while budget remains.
    pub fn record_attempt(&mut self) -> bool {
        self.attempts_made += 1;
        self.attempts_made < self.max_attempts
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_made)
    }
}

/// Progress snapshot published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub request_id: String,
    pub phase: PollPhase,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub last_status: Option<JobStatus>,
}

/// Returned when the backend reports COMPLETED.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollCompletion {
    pub request_id: String,
    pub status_queries: u32,
}

/// Sleep for `interval` unless cancelled first. Returns false on cancellation.
pub(crate) async fn wait_interval(interval: Duration, cancel_token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => false,
        _ = tokio::time::sleep(interval) => true,
    }
}

pub struct StatusPoller {
    backend: Arc<dyn Backend>,
    policy: PollPolicy,
    request_id: String,
    cancel_token: CancellationToken,
    snapshot_tx: watch::Sender<PollSnapshot>,
    last_status: Option<JobStatus>,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn Backend>,
        policy: PollPolicy,
        request_id: impl Into<String>,
        cancel_token: CancellationToken,
    ) -> Self {
        let request_id = request_id.into();
        let (snapshot_tx, _) = watch::channel(PollSnapshot {
            request_id: request_id.clone(),
            phase: PollPhase::NotStarted,
            attempts_made: 0,
            max_attempts: policy.effective_max_attempts(),
            last_status: None,
        });
        Self {
            backend,
            policy,
            request_id,
            cancel_token,
            snapshot_tx,
            last_status: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollSnapshot> {
        self.snapshot_tx.subscribe()
    }

    fn publish(&self, phase: PollPhase, attempts: &PollAttemptState) {
        self.snapshot_tx.send_replace(PollSnapshot {
            request_id: self.request_id.clone(),
            phase,
            attempts_made: attempts.attempts_made,
            max_attempts: attempts.max_attempts,
            last_status: self.last_status,
        });
    }

    fn cancelled(&self, attempts: &PollAttemptState) -> AnalysisError {
        tracing::info!(
            request_id = %self.request_id,
            attempts = attempts.attempts_made,
            "Status polling cancelled"
        );
        self.publish(PollPhase::Cancelled, attempts);
        AnalysisError::Cancelled
    }

    /// Poll until a terminal status, timeout, fatal error or cancellation.
    pub async fn run(mut self) -> Result<PollCompletion, AnalysisError> {
        let mut attempts = PollAttemptState::new(&self.request_id, &self.policy);

        if self.cancel_token.is_cancelled() {
            return Err(self.cancelled(&attempts));
        }

        self.publish(PollPhase::Polling, &attempts);
        tracing::info!(
            request_id = %self.request_id,
            max_attempts = attempts.max_attempts,
            interval_ms = attempts.interval.as_millis() as u64,
            "Polling analysis status"
        );

        loop {
            let response = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return Err(self.cancelled(&attempts)),
                response = self.backend.get_status(&self.request_id) => response,
            };

            // Cancelled while the response was being delivered: drop it.
            if self.cancel_token.is_cancelled() {
                return Err(self.cancelled(&attempts));
            }

            match response {
                Ok(report) => match JobStatus::from_wire(&report.status) {
                    Some(JobStatus::Completed) => {
                        self.last_status = Some(JobStatus::Completed);
                        self.publish(PollPhase::TerminalSuccess, &attempts);
                        tracing::info!(
                            request_id = %self.request_id,
                            status_queries = attempts.attempts_made + 1,
                            "Analysis completed"
                        );
                        return Ok(PollCompletion {
                            request_id: self.request_id.clone(),
                            status_queries: attempts.attempts_made + 1,
                        });
                    }
                    Some(JobStatus::Failed) => {
                        self.last_status = Some(JobStatus::Failed);
                        self.publish(PollPhase::TerminalFailure, &attempts);
                        tracing::warn!(
                            request_id = %self.request_id,
                            detail = report.message.as_deref().unwrap_or(""),
                            "Analysis failed"
                        );
                        return Err(AnalysisError::job_failed(report.message));
                    }
                    Some(status) => {
                        tracing::debug!(
                            request_id = %self.request_id,
                            attempt = attempts.attempts_made + 1,
                            status = %status,
                            "Analysis still running"
                        );
                        self.last_status = Some(status);
                    }
                    None => {
                        tracing::warn!(
                            request_id = %self.request_id,
                            raw_status = %report.status,
                            "Unexpected analysis status, treating as non-terminal"
                        );
                    }
                },
                Err(GatewayError::NotFound) => {
                    tracing::debug!(
                        request_id = %self.request_id,
                        attempt = attempts.attempts_made + 1,
                        "Status not available yet"
                    );
                }
                Err(e @ GatewayError::Transport(_)) => {
                    tracing::warn!(
                        request_id = %self.request_id,
                        attempt = attempts.attempts_made + 1,
                        error = %e,
                        "Status query failed in transit, counting as an attempt"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        request_id = %self.request_id,
                        error = %e,
                        "Status query failed"
                    );
                    self.publish(PollPhase::Errored, &attempts);
                    return Err(e.into());
                }
            }

            if !attempts.record_attempt() {
                self.publish(PollPhase::TimedOut, &attempts);
                tracing::warn!(
                    request_id = %self.request_id,
                    attempts = attempts.attempts_made,
                    "Analysis did not reach a terminal state in time"
                );
                return Err(AnalysisError::Timeout {
                    attempts: attempts.attempts_made,
                });
            }
            self.publish(PollPhase::Polling, &attempts);

            if !wait_interval(attempts.interval, &self.cancel_token).await {
                return Err(self.cancelled(&attempts));
            }
        }
    }
}
