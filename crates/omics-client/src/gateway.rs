//! Backend access for the analysis service.
//!
//! [`Backend`] is the seam every component talks through. [`HttpGateway`] is
//! the REST implementation:
//! - `POST /analysis-requests` create a request for a patient
//! - `POST /analysis-requests/{id}/artifacts` multipart upload (`category`, `file`)
//! - `POST /analysis-requests/{id}/start` start the pipeline
//! - `GET /analysis-requests/{id}/status` current status
//! - `GET /analysis-requests/{id}/result` structured result document
//! - `GET /patients/{patient_id}/analysis-requests` request history
//!
//! A 404 is reported as [`GatewayError::NotFound`] so callers can treat it as
//! "not ready yet" instead of a failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::{GatewayConfig, user_agent};
use crate::request::{ArtifactCategory, ArtifactFile};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("resource not found")]
    NotFound,

    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },

    /// No HTTP response at all (connection refused/reset, timeout).
    #[error("request failed: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

/// Response to `create_analysis_request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRequest {
    pub id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// `{success}` acknowledgement used by upload and start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawAck")]
pub struct Ack {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct RawAck {
    success: bool,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl From<RawAck> for Ack {
    fn from(raw: RawAck) -> Self {
        Self {
            success: raw.success,
            message: detail_field(&raw.rest),
        }
    }
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Response to `get_status`. The status is kept raw so unknown values can
/// be logged instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawStatusReport")]
pub struct StatusReport {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct RawStatusReport {
    status: String,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl From<RawStatusReport> for StatusReport {
    fn from(raw: RawStatusReport) -> Self {
        Self {
            status: raw.status,
            message: detail_field(&raw.rest),
        }
    }
}

impl StatusReport {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// One entry of a patient's request history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub status: String,
}

/// Backend contract consumed by the job lifecycle components.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn create_analysis_request(&self, patient_id: &str)
    -> Result<CreatedRequest, GatewayError>;

    async fn upload_artifact(
        &self,
        request_id: &str,
        category: ArtifactCategory,
        file: &ArtifactFile,
    ) -> Result<Ack, GatewayError>;

    async fn start_pipeline(&self, request_id: &str) -> Result<Ack, GatewayError>;

    async fn get_status(&self, request_id: &str) -> Result<StatusReport, GatewayError>;

    /// Raw result document; normalisation happens in the resolver.
    async fn get_result(&self, request_id: &str) -> Result<serde_json::Value, GatewayError>;

    async fn list_requests_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<RequestRecord>, GatewayError>;
}

/// First non-blank `message`, `detail` or `error` string in a JSON object.
fn detail_field(map: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
    ["message", "detail", "error"].into_iter().find_map(|key| match map.get(key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Pull a human-readable detail out of an error body.
///
/// Looks for `message`, `detail` or `error` string fields in a JSON body and
/// falls back to the trimmed raw text.
pub fn extract_detail(body: &str) -> String {
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(detail) = detail_field(&map)
    {
        return detail;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        "no detail provided".to_string()
    } else {
        trimmed.to_string()
    }
}

pub struct HttpGateway {
    base_url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let base_url = reqwest::Url::parse(&config.base_url)
            .map_err(|e| GatewayError::InvalidUrl(format!("{}: {}", config.base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::InvalidUrl(config.base_url.clone()));
        }

        let mut headers = reqwest::header::HeaderMap::new();

        if let Some(ref token) = config.auth_token
            && let Ok(value) = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
        {
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent()) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<reqwest::Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GatewayError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                detail: extract_detail(&body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Backend for HttpGateway {
    async fn create_analysis_request(
        &self,
        patient_id: &str,
    ) -> Result<CreatedRequest, GatewayError> {
        let url = self.endpoint(&["analysis-requests"])?;
        let body = serde_json::json!({ "patientId": patient_id });
        self.send(self.client.post(url).json(&body)).await
    }

    async fn upload_artifact(
        &self,
        request_id: &str,
        category: ArtifactCategory,
        file: &ArtifactFile,
    ) -> Result<Ack, GatewayError> {
        let url = self.endpoint(&["analysis-requests", request_id, "artifacts"])?;
        let part = reqwest::multipart::Part::bytes(file.bytes.clone()).file_name(file.name.clone());
        let form = reqwest::multipart::Form::new()
            .text("category", category.as_str())
            .part("file", part);
        self.send(self.client.post(url).multipart(form)).await
    }

    async fn start_pipeline(&self, request_id: &str) -> Result<Ack, GatewayError> {
        let url = self.endpoint(&["analysis-requests", request_id, "start"])?;
        self.send(self.client.post(url)).await
    }

    async fn get_status(&self, request_id: &str) -> Result<StatusReport, GatewayError> {
        let url = self.endpoint(&["analysis-requests", request_id, "status"])?;
        self.send(self.client.get(url)).await
    }

    async fn get_result(&self, request_id: &str) -> Result<serde_json::Value, GatewayError> {
        let url = self.endpoint(&["analysis-requests", request_id, "result"])?;
        self.send(self.client.get(url)).await
    }

    async fn list_requests_for_patient(
        &self,
        patient_id: &str,
    ) -> Result<Vec<RequestRecord>, GatewayError> {
        let url = self.endpoint(&["patients", patient_id, "analysis-requests"])?;
        self.send(self.client.get(url)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway_for(server: &MockServer) -> HttpGateway {
        let config = GatewayConfig {
            base_url: format!("{}/api", server.uri()),
            request_timeout: Duration::from_secs(5),
            auth_token: Some("test-token".to_string()),
        };
        HttpGateway::new(&config).unwrap()
    }

    #[test]
    fn extract_detail_prefers_json_fields() {
        assert_eq!(extract_detail(r#"{"detail": "bad patient"}"#), "bad patient");
        assert_eq!(extract_detail(r#"{"message": "queue full"}"#), "queue full");
        assert_eq!(extract_detail(r#"{"error": "boom", "code": 7}"#), "boom");
    }

    #[test]
    fn extract_detail_falls_back_to_body() {
        assert_eq!(extract_detail("  upstream timeout \n"), "upstream timeout");
        assert_eq!(extract_detail(r#"{"detail": ""}"#), r#"{"detail": ""}"#);
        assert_eq!(extract_detail(""), "no detail provided");
    }

    #[test]
    fn ack_with_several_detail_keys_decodes() {
        let ack: Ack = serde_json::from_value(serde_json::json!({
            "success": true,
            "message": "upload stored",
            "detail": "2 files",
            "error": null
        }))
        .unwrap();
        assert_eq!(
            ack,
            Ack {
                success: true,
                message: Some("upload stored".to_string())
            }
        );

        let ack: Ack = serde_json::from_value(serde_json::json!({
            "success": false,
            "message": "",
            "detail": "request already started"
        }))
        .unwrap();
        assert_eq!(ack, Ack::rejected("request already started"));

        let ack: Ack = serde_json::from_value(serde_json::json!({"success": true})).unwrap();
        assert_eq!(ack, Ack::ok());
    }

    #[test]
    fn status_report_with_several_detail_keys_decodes() {
        let report: StatusReport = serde_json::from_value(serde_json::json!({
            "status": "FAILED",
            "detail": "alignment failed",
            "error": "exit code 137"
        }))
        .unwrap();
        assert_eq!(
            report,
            StatusReport::new("FAILED").with_message("alignment failed")
        );
        assert!(serde_json::from_value::<StatusReport>(serde_json::json!({"message": "x"})).is_err());
    }

    #[test]
    fn rejects_invalid_base_url() {
        let config = GatewayConfig {
            base_url: "not a url".to_string(),
            request_timeout: Duration::from_secs(1),
            auth_token: None,
        };
        assert!(matches!(
            HttpGateway::new(&config),
            Err(GatewayError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn create_posts_patient_id_with_auth() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/analysis-requests"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(serde_json::json!({"patientId": "P-42"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "req-1",
                "status": "PENDING"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = gateway_for(&server)
            .create_analysis_request("P-42")
            .await
            .unwrap();
        assert_eq!(created.id, "req-1");
        assert_eq!(created.status, "PENDING");
        assert!(created.created_at.is_none());
    }

    #[tokio::test]
    async fn status_404_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/analysis-requests/req-1/status"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway_for(&server).get_status("req-1").await.unwrap_err();
        assert_eq!(err, GatewayError::NotFound);
    }

    #[tokio::test]
    async fn server_error_carries_detail() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/analysis-requests/req-1/result"))
            .respond_with(
                ResponseTemplate::new(500)
                    .set_body_json(serde_json::json!({"detail": "result store unavailable"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway_for(&server).get_result("req-1").await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::Status {
                status: 500,
                detail: "result store unavailable".to_string()
            }
        );
    }

    #[tokio::test]
    async fn status_report_reads_message_aliases() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/analysis-requests/req-9/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "FAILED",
                "error": "insufficient coverage"
            })))
            .mount(&server)
            .await;

        let report = gateway_for(&server).get_status("req-9").await.unwrap();
        assert_eq!(
            report,
            StatusReport::new("FAILED").with_message("insufficient coverage")
        );
    }

    #[tokio::test]
    async fn non_json_success_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/analysis-requests/req-1/start"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let err = gateway_for(&server)
            .start_pipeline("req-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }

    #[tokio::test]
    async fn upload_posts_multipart() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/analysis-requests/req-1/artifacts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = ArtifactFile::new("expression.tsv", b"TP53\t1.2\n".to_vec());
        let ack = gateway_for(&server)
            .upload_artifact("req-1", ArtifactCategory::RnaSeq, &file)
            .await
            .unwrap();
        assert_eq!(ack, Ack::ok());

        let received = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&received[0].body);
        assert!(body.contains("RNA-seq"));
        assert!(body.contains("expression.tsv"));
    }

    #[tokio::test]
    async fn path_segments_are_encoded() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/patients/P%2042/analysis-requests"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "req-1", "patientId": "P 42", "createdAt": "2026-02-01T09:30:00Z", "status": "COMPLETED"},
                {"id": "req-2", "status": "PROCESSING"}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let records = gateway_for(&server)
            .list_requests_for_patient("P 42")
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].patient_id.as_deref(), Some("P 42"));
        assert_eq!(records[1].status, "PROCESSING");
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let config = GatewayConfig {
            base_url: "http://127.0.0.1:9/api".to_string(),
            request_timeout: Duration::from_secs(2),
            auth_token: None,
        };
        let err = HttpGateway::new(&config)
            .unwrap()
            .get_status("req-1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
