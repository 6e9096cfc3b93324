//! AnalysisWorkflow: create → upload → start → poll → resolve.
//!
//! Uploads for one submission run concurrently, but the start call is only
//! issued after every upload has been confirmed.

use std::sync::Arc;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;

use crate::config::PollPolicy;
use crate::error::AnalysisError;
use crate::gateway::Backend;
use crate::manager::AnalysisRequestManager;
use crate::request::{AnalysisRequest, ArtifactCategory, ArtifactFile};
use crate::resolver::ResultResolver;
use crate::result::AnalysisResult;
use crate::tracker::JobTracker;
use crate::trigger::PipelineTrigger;
use crate::upload::ArtifactUploadGate;

pub struct AnalysisWorkflow {
    requests: Arc<AnalysisRequestManager>,
    uploads: Arc<ArtifactUploadGate>,
    trigger: PipelineTrigger,
    tracker: Arc<JobTracker>,
    resolver: ResultResolver,
}

impl AnalysisWorkflow {
    pub fn new(backend: Arc<dyn Backend>, policy: PollPolicy) -> Self {
        let requests = Arc::new(AnalysisRequestManager::new(Arc::clone(&backend)));
        let uploads = Arc::new(ArtifactUploadGate::new(
            Arc::clone(&backend),
            Arc::clone(&requests),
        ));
        let trigger = PipelineTrigger::new(Arc::clone(&backend), Arc::clone(&uploads));
        let tracker = JobTracker::new(Arc::clone(&backend), policy.clone());
        let resolver = ResultResolver::new(backend, policy);
        Self {
            requests,
            uploads,
            trigger,
            tracker,
            resolver,
        }
    }

    pub fn requests(&self) -> &Arc<AnalysisRequestManager> {
        &self.requests
    }

    pub fn uploads(&self) -> &Arc<ArtifactUploadGate> {
        &self.uploads
    }

    pub fn trigger(&self) -> &PipelineTrigger {
        &self.trigger
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }

    pub fn resolver(&self) -> &ResultResolver {
        &self.resolver
    }

    /// Create a request, upload every artifact, then start the pipeline.
    pub async fn submit(
        &self,
        patient_id: &str,
        artifacts: &[(ArtifactCategory, ArtifactFile)],
    ) -> Result<AnalysisRequest, AnalysisError> {
        if artifacts.is_empty() {
            return Err(AnalysisError::Precondition(
                "at least one artifact is required to run an analysis".to_string(),
            ));
        }

        let request = self.requests.create_request(patient_id).await?;

        try_join_all(
            artifacts
                .iter()
                .map(|(category, file)| self.uploads.record_upload(&request.id, *category, file)),
        )
        .await?;

        self.trigger.start(&request.id).await?;
        Ok(request)
    }

    /// Poll a started request to completion and fetch its result.
    ///
    /// Polling and the result fetch share one attempt budget. Dropping the
    /// returned future stops the poller.
    pub async fn await_result(
        &self,
        request_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let handle = self.tracker.track_linked(request_id, cancel_token)?;
        let _guard = handle.guard();

        let polled = handle.wait().await;
        if matches!(polled, Ok(_) | Err(AnalysisError::JobFailed(_))) {
            self.release(request_id);
        }
        let completion = polled?;

        self.resolver.fetch_after(&completion, cancel_token).await
    }

    /// Forget local state of a request that reached a terminal status.
    fn release(&self, request_id: &str) {
        let forgotten = self.requests.forget(request_id).is_some();
        let uploads = self.uploads.forget(request_id);
        tracing::debug!(
            request_id = %request_id,
            forgotten,
            uploads,
            "Released terminal request"
        );
    }

    /// Full lifecycle for one patient submission.
    pub async fn run(
        &self,
        patient_id: &str,
        artifacts: &[(ArtifactCategory, ArtifactFile)],
        cancel_token: &CancellationToken,
    ) -> Result<AnalysisResult, AnalysisError> {
        let request = self.submit(patient_id, artifacts).await?;
        self.await_result(&request.id, cancel_token).await
    }
}
