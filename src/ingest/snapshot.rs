//! HTTP snapshot frame source.
//!
//! Networked cameras expose a still image under one of a handful of well-known
//! paths. `SnapshotSource` tries them in priority order and accepts the first
//! `200 OK` with a non-empty body.
//!
//! The snapshot source MUST NOT:
//! - Decode or analyse the body (that is the preprocessor's job)
//! - Retry an endpoint within a single fetch
//! - Store frames to disk

use std::io::Read;
use std::time::Duration;

use super::FrameSource;
use crate::error::FetchError;
use crate::frame::Frame;

/// Snapshot paths tried before falling back to the bare base URL.
pub const SNAPSHOT_PATHS: [&str; 4] = ["shot.jpg", "snapshot.jpg", "image.jpg", "capture.jpg"];

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_MIN_FRAME_BYTES: usize = 1024;
const MAX_FRAME_BYTES: u64 = 8 * 1024 * 1024;

/// Configuration for a snapshot source.
#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Timeout for each individual candidate URL.
    pub attempt_timeout: Duration,
    /// Bodies smaller than this are rejected as placeholders.
    pub min_frame_bytes: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            min_frame_bytes: DEFAULT_MIN_FRAME_BYTES,
        }
    }
}

/// Fetches still frames over HTTP.
pub struct SnapshotSource {
    agent: ureq::Agent,
    config: SnapshotConfig,
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.attempt_timeout)
            .build();
        Self { agent, config }
    }

    fn try_candidate(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => return Err(format!("HTTP {}", code)),
            Err(ureq::Error::Transport(transport)) => return Err(transport.to_string()),
        };
        if response.status() != 200 {
            return Err(format!("HTTP {}", response.status()));
        }
        let mut body = Vec::new();
        response
            .into_reader()
            .take(MAX_FRAME_BYTES)
            .read_to_end(&mut body)
            .map_err(|e| format!("read body: {}", e))?;
        if body.is_empty() {
            return Err("empty body".to_string());
        }
        Ok(body)
    }
}

impl Default for SnapshotSource {
    fn default() -> Self {
        Self::new(SnapshotConfig::default())
    }
}

impl FrameSource for SnapshotSource {
    fn fetch_frame(&self, base_url: &str) -> Result<Frame, FetchError> {
        let candidates = candidate_urls(base_url);
        for url in &candidates {
            match self.try_candidate(url) {
                Ok(body) => {
                    if body.len() < self.config.min_frame_bytes {
                        return Err(FetchError::FrameTooSmall {
                            url: url.clone(),
                            len: body.len(),
                            min: self.config.min_frame_bytes,
                        });
                    }
                    log::debug!("SnapshotSource: {} bytes from {}", body.len(), url);
                    return Ok(Frame::new(body, url.clone()));
                }
                Err(reason) => {
                    log::debug!("SnapshotSource: skipping {}: {}", url, reason);
                }
            }
        }
        Err(FetchError::NoReachableEndpoint {
            base_url: base_url.to_string(),
            attempts: candidates.len(),
        })
    }
}

/// Candidate snapshot URLs for a camera, in priority order.
pub fn candidate_urls(base_url: &str) -> Vec<String> {
    let base = base_url.trim_end_matches('/');
    SNAPSHOT_PATHS
        .iter()
        .map(|path| format!("{}/{}", base, path))
        .chain(std::iter::once(base_url.to_string()))
        .collect()
}
