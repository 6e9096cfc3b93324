//! Scripted in-memory backend for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::gateway::{Ack, Backend, CreatedRequest, GatewayError, RequestRecord, StatusReport};
use crate::request::{ArtifactCategory, ArtifactFile};

#[derive(Default)]
struct Calls {
    create: AtomicU32,
    upload: AtomicU32,
    start: AtomicU32,
    status: AtomicU32,
    result: AtomicU32,
    list: AtomicU32,
}

/// Answers come from queues; an empty status queue answers PROCESSING and an
/// empty result queue answers 404.
#[derive(Default)]
pub struct ScriptedBackend {
    calls: Calls,
    statuses: Mutex<VecDeque<Result<StatusReport, GatewayError>>>,
    results: Mutex<VecDeque<Result<serde_json::Value, GatewayError>>>,
    create_response: Mutex<Option<Result<CreatedRequest, GatewayError>>>,
    upload_response: Mutex<Option<Result<Ack, GatewayError>>>,
    start_response: Mutex<Option<Result<Ack, GatewayError>>>,
    history: Mutex<Vec<RequestRecord>>,
    history_error: Mutex<Option<GatewayError>>,
    status_gate: Mutex<Option<Arc<Notify>>>,
    status_seen: Arc<Notify>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_statuses<'a>(statuses: impl IntoIterator<Item = &'a str>) -> Arc<Self> {
        let backend = Self::default();
        backend.push_statuses(statuses);
        Arc::new(backend)
    }

    pub fn push_statuses<'a>(&self, statuses: impl IntoIterator<Item = &'a str>) {
        let mut queue = self.statuses.lock().unwrap();
        queue.extend(statuses.into_iter().map(|s| Ok(StatusReport::new(s))));
    }

    pub fn push_status(&self, response: Result<StatusReport, GatewayError>) {
        self.statuses.lock().unwrap().push_back(response);
    }

    pub fn push_result(&self, response: Result<serde_json::Value, GatewayError>) {
        self.results.lock().unwrap().push_back(response);
    }

    pub fn set_create_response(&self, response: Result<CreatedRequest, GatewayError>) {
        *self.create_response.lock().unwrap() = Some(response);
    }

    pub fn set_upload_response(&self, response: Result<Ack, GatewayError>) {
        *self.upload_response.lock().unwrap() = Some(response);
    }

    pub fn set_start_response(&self, response: Result<Ack, GatewayError>) {
        *self.start_response.lock().unwrap() = Some(response);
    }

    pub fn set_history(&self, records: Vec<RequestRecord>) {
        *self.history.lock().unwrap() = records;
    }

    pub fn set_history_error(&self, err: GatewayError) {
        *self.history_error.lock().unwrap() = Some(err);
    }

    /// Hold every status query until `gate` is notified.
    pub fn hold_status_until(&self, gate: Arc<Notify>) {
        *self.status_gate.lock().unwrap() = Some(gate);
    }

    /// Notified each time a status query arrives.
    pub fn status_seen(&self) -> Arc<Notify> {
        Arc::clone(&self.status_seen)
    }

    pub fn create_calls(&self) -> u32 {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> u32 {
        self.calls.upload.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u32 {
        self.calls.start.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.calls.status.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> u32 {
        self.calls.result.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.calls.list.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u32 {
        self.create_calls()
            + self.upload_calls()
            + self.start_calls()
            + self.status_calls()
            + self.result_calls()
            + self.list_calls()
    }
}

pub fn valid_result(request_id: &str) -> serde_json::Value {
    serde_json::json!({
        "requestId": request_id,
        "status": "COMPLETED",
        "predictions": {
            "binaryCancerPrediction": true,
            "binaryCancerProbability": 0.91,
            "predictedCancerType": "BRCA",
            "perTypeProbabilities": {"BRCA": 0.82, "LUAD": 0.11, "COAD": 0.07}
        },
        "biomarkers": [
            {"name": "ESR1", "value": 0.64},
            {"name": "GATA3", "value": 0.41},
            {"name": "TP53", "value": 0.22}
        ]
    })
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn create_analysis_request(
        &self,
        _patient_id: &str,
    ) -> Result<CreatedRequest, GatewayError> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.create_response.lock().unwrap().clone() {
            return response;
        }
        Ok(CreatedRequest {
            id: format!("req-{}", uuid::Uuid::new_v4()),
            status: "PENDING".to_string(),
            created_at: None,
        })
    }

    async fn upload_artifact(
        &self,
        _request_id: &str,
        _category: ArtifactCategory,
        _file: &ArtifactFile,
    ) -> Result<Ack, GatewayError> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        self.upload_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Ack::ok()))
    }

    async fn start_pipeline(&self, _request_id: &str) -> Result<Ack, GatewayError> {
        self.calls.start.fetch_add(1, Ordering::SeqCst);
        self.start_response
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok(Ack::ok()))
    }

    async fn get_status(&self, _request_id: &str) -> Result<StatusReport, GatewayError> {
        self.calls.status.fetch_add(1, Ordering::SeqCst);
        self.status_seen.notify_one();

        let gate = self.status_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusReport::new("PROCESSING")))
    }

    async fn get_result(&self, _request_id: &str) -> Result<serde_json::Value, GatewayError> {
        self.calls.result.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(GatewayError::NotFound))
    }

    async fn list_requests_for_patient(
        &self,
        _patient_id: &str,
    ) -> Result<Vec<RequestRecord>, GatewayError> {
        self.calls.list.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.history_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.history.lock().unwrap().clone())
    }
}
