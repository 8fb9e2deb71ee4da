//! Frame sources.
//!
//! A source turns a camera base URL into a single encoded `Frame`. The
//! scheduler calls it once per tick and never concurrently.

pub mod snapshot;

pub use snapshot::{candidate_urls, SnapshotConfig, SnapshotSource};

use crate::error::FetchError;
use crate::frame::Frame;

/// Fetches one still frame from a camera.
pub trait FrameSource: Send + Sync {
    fn fetch_frame(&self, base_url: &str) -> Result<Frame, FetchError>;
}
