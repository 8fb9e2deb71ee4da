//! One tick's analysis: decode, detect, post-process, cooldown.
//!
//! A `Pipeline` is owned by a single scheduler run. It carries the only state
//! that survives between ticks (the heuristic's reference frame and the
//! cooldown gate), so a restart simply builds a fresh one.

use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::cooldown::CooldownGate;
use crate::detect::{
    postprocess, Candidate, Detection, HeuristicDetector, ModelDetector, Strategy, StrategyKind,
};
use crate::frame::Frame;
use crate::preprocess;

/// Result of analysing one frame.
#[derive(Clone, Debug)]
pub struct TickOutcome {
    /// Detections to publish. Empty when nothing was found or the cooldown held.
    pub detections: Vec<Detection>,
    pub strategy: StrategyKind,
    pub suppressed_by_cooldown: bool,
}

impl TickOutcome {
    fn empty(strategy: StrategyKind) -> Self {
        Self {
            detections: Vec::new(),
            strategy,
            suppressed_by_cooldown: false,
        }
    }
}

pub struct Pipeline {
    heuristic: HeuristicDetector,
    cooldown: CooldownGate,
    inference_timeout: Duration,
}

impl Pipeline {
    pub fn new(settings: &Settings, inference_timeout: Duration) -> Self {
        Self {
            heuristic: HeuristicDetector::new(),
            cooldown: CooldownGate::new(settings.cooldown()),
            inference_timeout,
        }
    }

    /// Replace the heuristic detector, e.g. with a seeded one.
    pub fn with_heuristic(mut self, heuristic: HeuristicDetector) -> Self {
        self.heuristic = heuristic;
        self
    }

    pub fn cooldown(&self) -> &CooldownGate {
        &self.cooldown
    }

    /// Analyse `frame` with `strategy`. Decode and inference failures are
    /// logged and yield an empty outcome; they never escape the tick.
    pub fn process(
        &mut self,
        frame: &Frame,
        settings: &Settings,
        strategy: &Strategy,
        now: Instant,
    ) -> TickOutcome {
        let kind = strategy.kind();
        let pixels = match preprocess::decode(frame.bytes()) {
            Ok(pixels) => pixels,
            Err(err) => {
                log::warn!("tick skipped: frame from {}: {}", frame.source_url, err);
                return TickOutcome::empty(kind);
            }
        };

        let raw: Vec<Candidate> = match strategy {
            Strategy::Heuristic => self
                .heuristic
                .detect(&pixels, settings.confidence_threshold),
            Strategy::Model(handle) => {
                match ModelDetector::new(handle, self.inference_timeout)
                    .detect(&pixels, settings.confidence_threshold)
                {
                    Ok(candidates) => candidates,
                    Err(err) => {
                        log::warn!("tick skipped: {} model: {}", handle.name(), err);
                        return TickOutcome::empty(kind);
                    }
                }
            }
        };

        let kept = postprocess(
            raw,
            settings.confidence_threshold,
            settings.nms_iou_threshold,
        );
        if kept.is_empty() {
            return TickOutcome::empty(kind);
        }

        self.cooldown.set_cooldown(settings.cooldown());
        if !self.cooldown.admit(now) {
            log::debug!("{} detection(s) held back by cooldown", kept.len());
            return TickOutcome {
                detections: Vec::new(),
                strategy: kind,
                suppressed_by_cooldown: true,
            };
        }

        let timestamp = frame.timestamp_ms();
        TickOutcome {
            detections: kept
                .into_iter()
                .map(|c| Detection::from_candidate(c, timestamp))
                .collect(),
            strategy: kind,
            suppressed_by_cooldown: false,
        }
    }
}
