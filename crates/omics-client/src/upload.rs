//! ArtifactUploadGate: client-side bookkeeping of server-confirmed uploads.
//!
//! The gate is advisory. `can_start` only says whether the start action
//! should be offered; the server still decides whether the data suffices.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use crate::error::AnalysisError;
use crate::gateway::Backend;
use crate::manager::AnalysisRequestManager;
use crate::request::{ArtifactCategory, ArtifactFile, UploadedArtifact};

pub struct ArtifactUploadGate {
    backend: Arc<dyn Backend>,
    requests: Arc<AnalysisRequestManager>,
    /// Keyed by category, so re-uploading a category replaces the earlier artifact.
    uploads: DashMap<String, BTreeMap<ArtifactCategory, UploadedArtifact>>,
}

impl ArtifactUploadGate {
    pub fn new(backend: Arc<dyn Backend>, requests: Arc<AnalysisRequestManager>) -> Self {
        Self {
            backend,
            requests,
            uploads: DashMap::new(),
        }
    }

    /// Upload one artifact and record it once the server confirms.
    pub async fn record_upload(
        &self,
        request_id: &str,
        category: ArtifactCategory,
        file: &ArtifactFile,
    ) -> Result<UploadedArtifact, AnalysisError> {
        if !self.requests.exists(request_id) {
            return Err(AnalysisError::Precondition(
                "an analysis request must exist before uploading".to_string(),
            ));
        }

        let ack = self
            .backend
            .upload_artifact(request_id, category, file)
            .await
            .map_err(|e| {
                tracing::error!(
                    request_id = %request_id,
                    category = %category,
                    error = %e,
                    "Artifact upload failed"
                );
                AnalysisError::from(e)
            })?;

        if !ack.success {
            tracing::warn!(
                request_id = %request_id,
                category = %category,
                "Server rejected artifact upload"
            );
            return Err(AnalysisError::Backend {
                status: None,
                detail: ack
                    .message
                    .unwrap_or_else(|| format!("upload of {} artifact was rejected", category)),
            });
        }

        let artifact = UploadedArtifact {
            request_id: request_id.to_string(),
            category,
            file_name: file.name.clone(),
            size_bytes: file.size(),
            uploaded_at: Utc::now(),
        };

        let replaced = self
            .uploads
            .entry(request_id.to_string())
            .or_default()
            .insert(category, artifact.clone())
            .is_some();

        tracing::info!(
            request_id = %request_id,
            category = %category,
            file = %artifact.file_name,
            size_bytes = artifact.size_bytes,
            replaced,
            "Recorded artifact upload"
        );
        Ok(artifact)
    }

    /// True iff at least one artifact has been recorded for the request.
    pub fn can_start(&self, request_id: &str) -> bool {
        self.uploads
            .get(request_id)
            .map(|categories| !categories.is_empty())
            .unwrap_or(false)
    }

    /// Recorded artifacts in category order.
    pub fn artifacts(&self, request_id: &str) -> Vec<UploadedArtifact> {
        self.uploads
            .get(request_id)
            .map(|categories| categories.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn categories(&self, request_id: &str) -> Vec<ArtifactCategory> {
        self.uploads
            .get(request_id)
            .map(|categories| categories.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Drop the recorded uploads of a request. Returns how many were held.
    pub fn forget(&self, request_id: &str) -> usize {
        self.uploads
            .remove(request_id)
            .map(|(_, categories)| categories.len())
            .unwrap_or(0)
    }

    /// Categories not attached yet. Informational only; partial coverage is accepted.
    pub fn missing_categories(&self, request_id: &str) -> Vec<ArtifactCategory> {
        let present = self.categories(request_id);
        ArtifactCategory::ALL
            .into_iter()
            .filter(|c| !present.contains(c))
            .collect()
    }
}
