//! Analysis request state tracking.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Server-side job status.
///
/// Variant order is the lifecycle order, non-terminal before terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Created, no artifacts yet
    Pending,
    /// Pipeline accepted, not yet running
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a status as reported by the backend.
    ///
    /// Returns `None` for values outside the known set; callers decide how to
    /// treat those (never as success).
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "QUEUED" => Some(Self::Queued),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server-tracked analysis attempt for a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub id: String,
    pub patient_id: String,
    /// As reported by the server; absent when the backend did not send one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub status: JobStatus,
}

/// Data modality of an uploaded artifact.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ArtifactCategory {
    #[serde(rename = "RNA-seq")]
    RnaSeq,
    #[serde(rename = "Methylation")]
    Methylation,
    #[serde(rename = "Mutation")]
    Mutation,
    #[serde(rename = "CNV")]
    Cnv,
    #[serde(rename = "miRNA")]
    MiRna,
}

impl ArtifactCategory {
    pub const ALL: [ArtifactCategory; 5] = [
        Self::RnaSeq,
        Self::Methylation,
        Self::Mutation,
        Self::Cnv,
        Self::MiRna,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RnaSeq => "RNA-seq",
            Self::Methylation => "Methylation",
            Self::Mutation => "Mutation",
            Self::Cnv => "CNV",
            Self::MiRna => "miRNA",
        }
    }
}

impl fmt::Display for ArtifactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown artifact category '{0}' (expected one of RNA-seq, Methylation, Mutation, CNV, miRNA)")]
pub struct UnknownCategory(pub String);

impl FromStr for ArtifactCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "rnaseq" | "rna" => Ok(Self::RnaSeq),
            "methylation" => Ok(Self::Methylation),
            "mutation" => Ok(Self::Mutation),
            "cnv" => Ok(Self::Cnv),
            "mirna" => Ok(Self::MiRna),
            _ => Err(UnknownCategory(s.to_string())),
        }
    }
}

/// A data file selected for upload. Contents are opaque to the client.
#[derive(Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ArtifactFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub async fn read(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

impl fmt::Debug for ArtifactFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactFile")
            .field("name", &self.name)
            .field("size", &self.bytes.len())
            .finish()
    }
}

/// A server-confirmed upload, as recorded by the upload gate.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedArtifact {
    pub request_id: String,
    pub category: ArtifactCategory,
    pub file_name: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}
