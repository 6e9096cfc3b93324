//! PipelineTrigger: hands a request with attached artifacts to the backend queue.

use std::sync::Arc;

use crate::error::AnalysisError;
use crate::gateway::Backend;
use crate::upload::ArtifactUploadGate;

pub struct PipelineTrigger {
    backend: Arc<dyn Backend>,
    gate: Arc<ArtifactUploadGate>,
}

impl PipelineTrigger {
    pub fn new(backend: Arc<dyn Backend>, gate: Arc<ArtifactUploadGate>) -> Self {
        Self { backend, gate }
    }

    /// Start processing. No status is assumed afterwards; the next poll decides.
    pub async fn start(&self, request_id: &str) -> Result<(), AnalysisError> {
        if !self.gate.can_start(request_id) {
            return Err(AnalysisError::Precondition(
                "upload at least one artifact before starting the analysis".to_string(),
            ));
        }

        let ack = self.backend.start_pipeline(request_id).await.map_err(|e| {
            tracing::error!(request_id = %request_id, error = %e, "Pipeline start failed");
            AnalysisError::from(e)
        })?;

        if !ack.success {
            tracing::warn!(request_id = %request_id, "Server refused to start pipeline");
            return Err(AnalysisError::Backend {
                status: None,
                detail: ack
                    .message
                    .unwrap_or_else(|| "the server refused to start the analysis".to_string()),
            });
        }

        tracing::info!(
            request_id = %request_id,
            categories = ?self.gate.categories(request_id),
            "Analysis pipeline started"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Ack, GatewayError};
    use crate::manager::AnalysisRequestManager;
    use crate::request::{ArtifactCategory, ArtifactFile};
    use crate::testing::ScriptedBackend;

    struct Fixture {
        backend: Arc<ScriptedBackend>,
        gate: Arc<ArtifactUploadGate>,
        trigger: PipelineTrigger,
        request_id: String,
    }

    async fn fixture() -> Fixture {
        let backend = ScriptedBackend::new();
        let manager = Arc::new(AnalysisRequestManager::new(backend.clone()));
        let request = manager.create_request("P-42").await.unwrap();
        let gate = Arc::new(ArtifactUploadGate::new(backend.clone(), manager));
        let trigger = PipelineTrigger::new(backend.clone(), Arc::clone(&gate));
        Fixture {
            backend,
            gate,
            trigger,
            request_id: request.id,
        }
    }

    #[tokio::test]
    async fn start_without_artifacts_is_precondition_without_network() {
        let f = fixture().await;
        let calls_before = f.backend.total_calls();

        let err = f.trigger.start(&f.request_id).await.unwrap_err();

        assert!(matches!(err, AnalysisError::Precondition(_)));
        assert_eq!(f.backend.total_calls(), calls_before);
        assert_eq!(f.backend.start_calls(), 0);
    }

    #[tokio::test]
    async fn start_with_partial_coverage_succeeds() {
        let f = fixture().await;
        f.gate
            .record_upload(
                &f.request_id,
                ArtifactCategory::Mutation,
                &ArtifactFile::new("calls.maf", b"#maf".to_vec()),
            )
            .await
            .unwrap();

        f.trigger.start(&f.request_id).await.unwrap();

        assert_eq!(f.backend.start_calls(), 1);
        assert_eq!(f.backend.status_calls(), 0);
    }

    #[tokio::test]
    async fn server_rejection_is_backend_error() {
        let f = fixture().await;
        f.backend
            .set_start_response(Ok(Ack::rejected("RNA-seq coverage too low")));
        f.gate
            .record_upload(
                &f.request_id,
                ArtifactCategory::RnaSeq,
                &ArtifactFile::new("rna.tsv", b"x".to_vec()),
            )
            .await
            .unwrap();

        let err = f.trigger.start(&f.request_id).await.unwrap_err();

        assert_eq!(
            err,
            AnalysisError::Backend {
                status: None,
                detail: "RNA-seq coverage too low".to_string()
            }
        );
    }

    #[tokio::test]
    async fn http_failure_is_backend_error() {
        let f = fixture().await;
        f.backend.set_start_response(Err(GatewayError::Status {
            status: 409,
            detail: "already started".to_string(),
        }));
        f.gate
            .record_upload(
                &f.request_id,
                ArtifactCategory::Cnv,
                &ArtifactFile::new("cnv.seg", b"x".to_vec()),
            )
            .await
            .unwrap();

        let err = f.trigger.start(&f.request_id).await.unwrap_err();

        assert!(matches!(err, AnalysisError::Backend { status: Some(409), .. }));
    }

    #[tokio::test]
    async fn start_404_is_backend_error() {
        let f = fixture().await;
        f.backend.set_start_response(Err(GatewayError::NotFound));
        f.gate
            .record_upload(
                &f.request_id,
                ArtifactCategory::RnaSeq,
                &ArtifactFile::new("rna.tsv", b"x".to_vec()),
            )
            .await
            .unwrap();

        let err = f.trigger.start(&f.request_id).await.unwrap_err();

        assert!(matches!(err, AnalysisError::Backend { status: Some(404), .. }));
        assert_eq!(err.report().kind, crate::error::FailureKind::Backend);
    }
}
