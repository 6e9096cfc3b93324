//! ResultResolver: fetches the result document once the job has completed.
//!
//! The backend can report COMPLETED a little before the document exists, so a
//! 404 here means "not materialised yet" and is retried on the poller's
//! interval. Every other failure is fatal immediately. After polling, the
//! retries draw on whatever attempt budget the poller left, so the wait per
//! request stays within `max_attempts × interval`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::PollPolicy;
use crate::error::AnalysisError;
use crate::gateway::Backend;
use crate::poller::{PollAttemptState, PollCompletion, wait_interval};
use crate::result::AnalysisResult;

pub struct ResultResolver {
    backend: Arc<dyn Backend>,
    policy: PollPolicy,
}

impl ResultResolver {
    pub fn new(backend: Arc<dyn Backend>, policy: PollPolicy) -> Self {
        Self { backend, policy }
    }

    /// Fetch with the full attempt budget.
    pub async fn fetch(&self, request_id: &str) -> Result<AnalysisResult, AnalysisError> {
        self.fetch_until_cancelled(request_id, &CancellationToken::new())
            .await
    }

    /// Like [`fetch`](Self::fetch), but stops with `Cancelled` as soon as the token fires.
    pub async fn fetch_until_cancelled(
        &self,
        request_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let attempts = PollAttemptState::new(request_id, &self.policy);
        self.fetch_with(attempts, cancel_token).await
    }

    /// Fetch after a poller reported completion, on the budget it left over.
    ///
    /// One query is always issued, even when polling used the whole budget.
    pub async fn fetch_after(
        &self,
        completion: &PollCompletion,
        cancel_token: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let attempts = PollAttemptState::resume(
            &completion.request_id,
            &self.policy,
            completion.status_queries,
        );
        self.fetch_with(attempts, cancel_token).await
    }

    async fn fetch_with(
        &self,
        mut attempts: PollAttemptState,
        cancel_token: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let request_id = attempts.request_id.clone();
        let mut result_queries = 0u32;

        loop {
            if cancel_token.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }

            let response = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Err(AnalysisError::Cancelled),
                response = self.backend.get_result(&request_id) => response,
            };
            if cancel_token.is_cancelled() {
                return Err(AnalysisError::Cancelled);
            }
            result_queries += 1;

            match response.map_err(AnalysisError::from_polled) {
                Ok(document) => {
                    let result = AnalysisResult::from_document(&request_id, document).map_err(|e| {
                        tracing::error!(request_id = %request_id, error = %e, "Result document rejected");
                        e
                    })?;
                    tracing::info!(
                        request_id = %request_id,
                        result_queries,
                        biomarkers = result.biomarkers.len(),
                        "Analysis result resolved"
                    );
                    return Ok(result);
                }
                Err(AnalysisError::NotReady) => {
                    tracing::debug!(
                        request_id = %request_id,
                        attempt = attempts.attempts_made + 1,
                        "Result not materialised yet"
                    );
                }
                Err(e) => {
                    tracing::error!(request_id = %request_id, error = %e, "Result fetch failed");
                    return Err(e);
                }
            }

            if !attempts.record_attempt() {
                tracing::warn!(
                    request_id = %request_id,
                    attempts = attempts.attempts_made,
                    result_queries,
                    "Result still missing after completion"
                );
                return Err(AnalysisError::Timeout {
                    attempts: attempts.attempts_made,
                });
            }

            if !wait_interval(attempts.interval, cancel_token).await {
                return Err(AnalysisError::Cancelled);
            }
        }
    }
}
