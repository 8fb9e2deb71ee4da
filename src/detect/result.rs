use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized `[0, 1]` frame coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from a center-format box.
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clamp into the unit square so that `x, y >= 0`, `x + width <= 1` and
    /// `y + height <= 1`. Non-finite components collapse to zero.
    pub fn clamped(self) -> Self {
        let x = finite_or_zero(self.x).clamp(0.0, 1.0);
        let y = finite_or_zero(self.y).clamp(0.0, 1.0);
        let right = finite_or_zero(self.right()).clamp(x, 1.0);
        let bottom = finite_or_zero(self.bottom()).clamp(y, 1.0);
        Self {
            x,
            y,
            width: (right - x).min(1.0 - x).max(0.0),
            height: (bottom - y).min(1.0 - y).max(0.0),
        }
    }

    pub fn is_normalized(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.right() <= 1.0
            && self.bottom() <= 1.0
    }
}

fn finite_or_zero(v: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Unfiltered output of a detection strategy.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Candidate {
    pub fn new(class: impl Into<String>, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class: class.into(),
            confidence,
            bbox,
        }
    }
}

/// A candidate that survived thresholding, NMS, and cooldown.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    /// Capture time of the source frame, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl Detection {
    pub fn from_candidate(candidate: Candidate, timestamp: u64) -> Self {
        Self {
            class: candidate.class,
            confidence: candidate.confidence,
            bbox: candidate.bbox,
            timestamp,
        }
    }
}
