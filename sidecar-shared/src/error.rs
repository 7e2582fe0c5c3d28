//! # Sidecar Error Taxonomy
//!
//! One error enum for the whole sidecar, with a mapping onto gRPC statuses
//! for the worker-facing surface. The split that matters operationally:
//! user-visible failures (an activity throwing, an orchestration completing
//! as failed) are **not** errors here. Those round-trip as `TaskFailed` and
//! `ExecutionCompleted(Failed)` history events; this enum covers internal
//! failures only.

use thiserror::Error;
use tonic::Status;

/// Result type alias used throughout the sidecar crates.
pub type SidecarResult<T> = Result<T, SidecarError>;

/// Errors produced by the sidecar core.
#[derive(Debug, Error)]
pub enum SidecarError {
    /// A reply arrived for an instance/task with no pending correlation, or
    /// a state lookup missed.
    #[error("not found: {0}")]
    NotFound(String),

    /// A second worker attempted to claim the work-item stream.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unknown history-event kind on send, unknown orchestrator-action kind
    /// on receive, or a management operation the backend lacks.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// No worker is connected, or the work-item stream write failed.
    #[error("worker unavailable: {0}")]
    WorkerUnavailable(String),

    /// The orchestration service rejected or failed an operation.
    #[error("orchestration service error: {0}")]
    Service(String),

    /// Internal failure on the dispatch path (the worker never replying and
    /// disconnecting, a reply timeout, etc.).
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Payload encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The host lifetime requested stop.
    #[error("shutting down")]
    Shutdown,
}

impl SidecarError {
    /// Whether retrying the same operation later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SidecarError::WorkerUnavailable(_)
                | SidecarError::Service(_)
                | SidecarError::ResourceExhausted(_)
        )
    }
}

impl From<SidecarError> for Status {
    fn from(err: SidecarError) -> Self {
        match err {
            SidecarError::NotFound(msg) => Status::not_found(msg),
            SidecarError::ResourceExhausted(msg) => Status::resource_exhausted(msg),
            SidecarError::Unsupported(msg) => Status::invalid_argument(msg),
            SidecarError::WorkerUnavailable(msg) => Status::unavailable(msg),
            SidecarError::Shutdown => Status::unavailable("shutting down"),
            SidecarError::Service(msg)
            | SidecarError::Dispatch(msg)
            | SidecarError::Configuration(msg)
            | SidecarError::Serialization(msg) => Status::internal(msg),
        }
    }
}

impl From<prost::DecodeError> for SidecarError {
    fn from(err: prost::DecodeError) -> Self {
        SidecarError::Serialization(err.to_string())
    }
}

impl From<prost::EncodeError> for SidecarError {
    fn from(err: prost::EncodeError) -> Self {
        SidecarError::Serialization(err.to_string())
    }
}
