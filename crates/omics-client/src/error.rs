//! Error taxonomy for the analysis job lifecycle.
//!
//! `NotReady` is internal: only the result fetch loop produces it (through
//! `AnalysisError::from_polled`) and absorbs it, so it never reaches a caller.
//! Everywhere else a 404 is an ordinary `Backend` error. Everything that
//! reaches the boundary is reported as a [`FailureReport`].

use serde::Serialize;

use crate::gateway::GatewayError;

/// Fallback text when the backend marks a job FAILED without a diagnostic.
pub const GENERIC_JOB_FAILURE: &str =
    "The analysis pipeline reported a failure without further detail";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisError {
    /// Missing or blank required input. Caller-fixable, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Action attempted out of order (start before upload, upload before create).
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Non-2xx, non-404 response, or a response that could not be used.
    #[error("Backend error: {detail}")]
    Backend { status: Option<u16>, detail: String },

    #[error("Result not ready yet")]
    NotReady,

    #[error("Analysis is taking too long (no terminal state after {attempts} attempts)")]
    Timeout { attempts: u32 },

    #[error("Analysis failed: {0}")]
    JobFailed(String),

    /// The owner of the polling task tore it down.
    #[error("Analysis tracking was cancelled")]
    Cancelled,
}

impl AnalysisError {
    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        Self::Backend {
            status: None,
            detail: format!("malformed response: {}", detail),
        }
    }

    /// Build a `JobFailed` from an optional backend diagnostic.
    pub fn job_failed(message: Option<String>) -> Self {
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| GENERIC_JOB_FAILURE.to_string());
        Self::JobFailed(message)
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation(_) => FailureKind::Validation,
            Self::Precondition(_) => FailureKind::Precondition,
            Self::Backend { .. } => FailureKind::Backend,
            Self::NotReady => FailureKind::NotReady,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::JobFailed(_) => FailureKind::JobFailed,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    /// User-facing message, without the kind prefix used by `Display`.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(m) | Self::Precondition(m) | Self::JobFailed(m) => m.clone(),
            Self::Backend {
                status: Some(status),
                detail,
            } => format!("The analysis service returned {}: {}", status, detail),
            Self::Backend { status: None, detail } => {
                format!("The analysis service could not be used: {}", detail)
            }
            Self::NotReady => "The analysis result is not available yet".to_string(),
            Self::Timeout { .. } => "The analysis is taking too long".to_string(),
            Self::Cancelled => "Tracking of the analysis was stopped".to_string(),
        }
    }

    /// Conversion used inside the poll loops, where a 404 means "not yet".
    pub(crate) fn from_polled(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound => Self::NotReady,
            other => other.into(),
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            message: self.user_message(),
        }
    }
}

impl From<GatewayError> for AnalysisError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound => Self::Backend {
                status: Some(404),
                detail: "resource not found".to_string(),
            },
            GatewayError::Status { status, detail } => Self::Backend {
                status: Some(status),
                detail,
            },
            GatewayError::Transport(detail) => Self::Backend {
                status: None,
                detail: format!("request failed: {}", detail),
            },
            GatewayError::Decode(detail) => Self::malformed(detail),
            GatewayError::InvalidUrl(detail) => Self::Backend {
                status: None,
                detail: format!("invalid endpoint: {}", detail),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Precondition,
    Backend,
    NotReady,
    Timeout,
    JobFailed,
    Cancelled,
}

/// Single reportable failure object handed to the UI boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}
