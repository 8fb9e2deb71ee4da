//! Wildlife Watch
//!
//! Periodic visual detection for networked still cameras: fetch a snapshot,
//! look for animals in it, and tell interested parties about what was found.
//!
//! # Pipeline
//!
//! Every tick runs the same fixed sequence on one scheduler thread:
//!
//! 1. **Fetch**: try a camera's well-known snapshot paths over HTTP.
//! 2. **Decode**: turn the JPEG/PNG body into an RGB raster.
//! 3. **Detect**: a loaded ONNX model when one is ready, otherwise a
//!    motion/edge/color/texture heuristic. The choice is made per tick.
//! 4. **Post-process**: confidence threshold, NMS, clamp to the unit square.
//! 5. **Cooldown**: one global gate rate-limits published batches.
//! 6. **Notify**: fan out to subscribers; a failing subscriber never affects
//!    the others or the tick.
//!
//! Per-tick failures end the tick with no detections and never escape the
//! scheduler. Only repeated camera failures move the service to `Error`.
//!
//! # Module Structure
//!
//! - `frame`: encoded `Frame` and decoded `PixelBuffer`
//! - `ingest`: frame sources (HTTP snapshot)
//! - `preprocess`: decode, resize, grayscale, model tensor
//! - `detect`: strategies, model resource, IoU/NMS
//! - `cooldown`, `notify`, `pipeline`: per-tick gating and delivery
//! - `service`: lifecycle controller and control surface
//! - `config`, `error`: settings and error taxonomy

pub mod config;
pub mod cooldown;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod preprocess;
pub mod service;

pub use config::{ModelSettings, Settings, SettingsUpdate, WatchConfig};
pub use cooldown::CooldownGate;
pub use detect::{
    BoundingBox, Candidate, Detection, HeuristicDetector, InferenceModel, ModelHandle,
    ModelLoader, ModelResource, ModelState, Strategy, StrategyKind,
};
pub use error::{
    ConfigError, DecodeError, FetchError, InferenceError, ModelOutputError, ServiceError,
};
pub use frame::{Channels, Frame, PixelBuffer};
pub use ingest::{FrameSource, SnapshotConfig, SnapshotSource};
pub use notify::{DeliveryReport, NotificationBus, SubscriptionId};
pub use pipeline::{Pipeline, TickOutcome};
pub use service::{
    ControlResponse, DetectionService, ServiceOptions, ServiceState, ServiceStatus,
};
