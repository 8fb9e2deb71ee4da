//! Error taxonomy for the detection pipeline.
//!
//! Per-tick errors (`FetchError`, `DecodeError`, `ModelOutputError`,
//! `InferenceError`) are recovered at the tick boundary and never leave the
//! scheduler loop. `ServiceError` is what the control surface hands back to
//! its caller.

use std::time::Duration;

use thiserror::Error;

/// Failure to obtain a frame from the camera.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no reachable camera endpoint under {base_url} ({attempts} candidates tried)")]
    NoReachableEndpoint { base_url: String, attempts: usize },

    #[error("frame from {url} is {len} bytes, below the {min} byte minimum")]
    FrameTooSmall { url: String, len: usize, min: usize },
}

/// Corrupt or unsupported image data.
#[derive(Debug, Error)]
#[error("failed to decode frame: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

/// Malformed inference output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelOutputError {
    #[error("model produced no output tensor")]
    MissingOutput,

    #[error("model output length {len} is not a multiple of the {record} value anchor record")]
    MisalignedOutput { len: usize, record: usize },

    #[error("model output tensor was not f32")]
    WrongDatumType,
}

/// Failure to run the loaded model within its time budget.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference exceeded {0:?}")]
    Timeout(Duration),

    #[error("model is still busy with an earlier inference")]
    Busy,

    #[error("inference failed: {0:#}")]
    Failed(anyhow::Error),

    #[error(transparent)]
    Output(#[from] ModelOutputError),
}

/// Errors surfaced by the lifecycle controller.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("detection service is already running")]
    AlreadyRunning,

    #[error("detection service is not running")]
    NotRunning,

    #[error("detection service is in the error state; stop it before starting again")]
    Faulted,

    #[error("camera probe failed: {0}")]
    CameraUnreachable(#[source] FetchError),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{var} must be {expected}")]
    Env { var: &'static str, expected: &'static str },

    #[error("{0}")]
    Invalid(String),
}
