//! AnalysisRequestManager: owns analysis request identity.
//!
//! Requests created here (or loaded from a patient's history) are registered
//! locally so the upload gate can refuse uploads for unknown requests.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::AnalysisError;
use crate::gateway::{Backend, RequestRecord};
use crate::request::{AnalysisRequest, JobStatus};

pub struct AnalysisRequestManager {
    backend: Arc<dyn Backend>,
    requests: DashMap<String, AnalysisRequest>,
}

fn require_patient(patient_id: &str) -> Result<&str, AnalysisError> {
    let patient_id = patient_id.trim();
    if patient_id.is_empty() {
        return Err(AnalysisError::Validation(
            "a patient must be selected".to_string(),
        ));
    }
    Ok(patient_id)
}

impl AnalysisRequestManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            requests: DashMap::new(),
        }
    }

    /// Create a request for a patient. One network call, never retried.
    pub async fn create_request(&self, patient_id: &str) -> Result<AnalysisRequest, AnalysisError> {
        let patient_id = require_patient(patient_id)?;

        let created = self
            .backend
            .create_analysis_request(patient_id)
            .await
            .map_err(|e| {
                tracing::error!(patient_id = %patient_id, error = %e, "Failed to create analysis request");
                AnalysisError::from(e)
            })?;

        if created.id.trim().is_empty() {
            return Err(AnalysisError::malformed("created request has no id"));
        }
        let status = JobStatus::from_wire(&created.status).ok_or_else(|| {
            AnalysisError::malformed(format!(
                "created request has unrecognised status '{}'",
                created.status
            ))
        })?;

        let request = AnalysisRequest {
            id: created.id,
            patient_id: patient_id.to_string(),
            created_at: created.created_at,
            status,
        };

        tracing::info!(
            request_id = %request.id,
            patient_id = %request.patient_id,
            "Created analysis request"
        );
        self.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    /// Read-only history for a patient, newest first; entries without a
    /// creation time come last.
    ///
    /// Returned requests are server-confirmed and get registered locally.
    /// Entries with a status outside the known set are skipped.
    pub async fn list_requests_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<AnalysisRequest>, AnalysisError> {
        let patient_id = require_patient(patient_id)?;

        let records = self
            .backend
            .list_requests_for_patient(patient_id)
            .await
            .map_err(AnalysisError::from)?;

        let mut requests: Vec<AnalysisRequest> = records
            .into_iter()
            .filter_map(|record| self.record_to_request(patient_id, record))
            .collect();
        // Undated entries sort last (`None < Some`), keeping server order among them.
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        for request in &requests {
            self.requests
                .entry(request.id.clone())
                .or_insert_with(|| request.clone());
        }

        tracing::debug!(patient_id = %patient_id, count = requests.len(), "Loaded request history");
        Ok(requests)
    }

    fn record_to_request(&self, patient_id: &str, record: RequestRecord) -> Option<AnalysisRequest> {
        let Some(status) = JobStatus::from_wire(&record.status) else {
            tracing::warn!(
                request_id = %record.id,
                raw_status = %record.status,
                "Skipping history entry with unexpected status"
            );
            return None;
        };
        Some(AnalysisRequest {
            id: record.id,
            patient_id: record.patient_id.unwrap_or_else(|| patient_id.to_string()),
            created_at: record.created_at,
            status,
        })
    }

    pub fn get(&self, request_id: &str) -> Option<AnalysisRequest> {
        self.requests.get(request_id).map(|r| r.value().clone())
    }

    pub fn exists(&self, request_id: &str) -> bool {
        self.requests.contains_key(request_id)
    }

    /// Drop the local record of a request that no longer needs gating.
    pub fn forget(&self, request_id: &str) -> Option<AnalysisRequest> {
        self.requests.remove(request_id).map(|(_, request)| request)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
