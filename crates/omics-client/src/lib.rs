//! omics-client: client side of the asynchronous omics-analysis job lifecycle.
//!
//! A patient's analysis request is created, its molecular-data artifacts are
//! uploaded, the pipeline is started, status is polled to a terminal state and
//! the result document is fetched and normalised.

pub mod config;
pub mod error;
pub mod gateway;
pub mod manager;
pub mod poller;
pub mod request;
pub mod resolver;
pub mod result;
pub mod tracker;
pub mod trigger;
pub mod upload;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::{CLIENT_VERSION, GatewayConfig, PollPolicy};
pub use error::{AnalysisError, FailureKind, FailureReport};
pub use gateway::{Backend, GatewayError, HttpGateway};
pub use manager::AnalysisRequestManager;
pub use poller::{PollAttemptState, PollCompletion, PollPhase, PollSnapshot, StatusPoller};
pub use request::{AnalysisRequest, ArtifactCategory, ArtifactFile, JobStatus, UploadedArtifact};
pub use resolver::ResultResolver;
pub use result::{AnalysisResult, Biomarker, Predictions};
pub use tracker::{JobTracker, PollGuard, PollHandle};
pub use trigger::PipelineTrigger;
pub use upload::ArtifactUploadGate;
pub use workflow::AnalysisWorkflow;

pub use tokio_util::sync::CancellationToken;
