//! Typed failures surfaced by the overlay pipeline.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single frame submission across the inference boundary.
///
/// Every variant is transient from the frame loop's point of view: the loop
/// counts it, reuses the last good mask and keeps going.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InferenceError {
    #[error("Model not loaded")]
    NotReady,

    #[error("Request {0} is still in flight")]
    Busy(u64),

    #[error("Frame processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inference backend error: {0}")]
    Backend(String),

    #[error("Invalid segmentation output: {0}")]
    InvalidOutput(String),

    #[error("Inference worker disconnected")]
    Disconnected,
}

/// Failure of a model load attempt. Retrying means calling `load_model` again.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Inference backend not ready after {0:?}")]
    BackendTimeout(Duration),

    #[error("Model loading timed out after {0:?}")]
    LoadTimeout(Duration),

    #[error("{0}")]
    Rejected(String),

    #[error("Inference worker disconnected")]
    Disconnected,
}

/// Errors that stop the frame loop from starting or keep it from continuing.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Camera is not available")]
    CameraUnavailable,

    #[error("Model load failed: {0}")]
    Load(#[from] LoadError),

    #[error("Live source failed: {0:#}")]
    Source(anyhow::Error),

    #[error("Output surface failed: {0:#}")]
    Surface(anyhow::Error),
}
