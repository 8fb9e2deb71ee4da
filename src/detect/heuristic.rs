//! Heuristic animal detection for when no trained model is loaded.
//!
//! Four independent scores are computed per frame and blended into a single
//! confidence:
//!
//! | score   | source                                          | weight |
//! |---------|-------------------------------------------------|--------|
//! | motion  | 320x240 grayscale difference against last frame | 0.40   |
//! | shape   | 3x3 Laplacian edge density                      | 0.25   |
//! | color   | earthy-tone test plus channel spread            | 0.20   |
//! | texture | mean local variance of sampled 5x5 patches      | 0.15   |
//!
//! This strategy cannot localize. When it fires, the box is placed at random
//! inside the central region of the frame and the class label is a coarse
//! rule of thumb, not a classifier.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::result::{BoundingBox, Candidate};
use crate::frame::{Channels, PixelBuffer};
use crate::preprocess::{motion_grid, to_grayscale};

const MOTION_WEIGHT: f32 = 0.40;
const SHAPE_WEIGHT: f32 = 0.25;
const COLOR_WEIGHT: f32 = 0.20;
const TEXTURE_WEIGHT: f32 = 0.15;

/// Per-pixel intensity change (0..255) that counts as motion.
const MOTION_DELTA: u8 = 25;
/// Laplacian magnitude on `[0, 1]` intensities that counts as an edge.
const EDGE_THRESHOLD: f32 = 0.25;
/// Red must lead green and blue by these margins for an earthy tone.
const EARTHY_GREEN_MARGIN: f32 = 10.0;
const EARTHY_BLUE_MARGIN: f32 = 20.0;
const PATCH_SIZE: usize = 5;
const PATCH_STRIDE: usize = 16;
const TEXTURE_DIVISOR: f32 = 2000.0;

/// Boxes are synthesized inside `[REGION_MIN, REGION_MAX]` on both axes.
const REGION_MIN: f32 = 0.2;
const REGION_MAX: f32 = 0.8;
const BOX_MIN_SIDE: f32 = 0.2;
const BOX_MAX_SIDE: f32 = 0.4;

/// Component scores for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeuristicScores {
    pub motion: f32,
    pub shape: f32,
    pub color: f32,
    pub texture: f32,
    pub earthy: bool,
}

impl HeuristicScores {
    /// Weighted blend of the four component scores.
    pub fn confidence(&self) -> f32 {
        (MOTION_WEIGHT * self.motion
            + SHAPE_WEIGHT * self.shape
            + COLOR_WEIGHT * self.color
            + TEXTURE_WEIGHT * self.texture)
            .clamp(0.0, 1.0)
    }

    /// Coarse label for a firing frame.
    pub fn label(&self) -> &'static str {
        if self.earthy && self.motion > 0.5 {
            "large_mammal"
        } else if self.earthy && self.shape > 0.6 {
            "deer"
        } else if self.motion > 0.5 {
            "animal"
        } else {
            "wildlife"
        }
    }
}

/// Heuristic strategy. Holds the previous tick's motion grid.
pub struct HeuristicDetector {
    previous: Option<PixelBuffer>,
    rng: StdRng,
}

impl HeuristicDetector {
    pub fn new() -> Self {
        Self {
            previous: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic box placement, for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            previous: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn has_reference_frame(&self) -> bool {
        self.previous.is_some()
    }

    /// Forget the motion reference frame.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Score a frame and make it the motion reference for the next call.
    pub fn analyze(&mut self, frame: &PixelBuffer) -> HeuristicScores {
        let grid = motion_grid(frame);
        let motion = self
            .previous
            .as_ref()
            .map_or(0.0, |prev| motion_score(prev, &grid));

        let gray = to_grayscale(frame);
        let stats = ColorStats::of(frame);
        let scores = HeuristicScores {
            motion,
            shape: shape_score(&gray),
            color: stats.score(),
            texture: texture_score(&gray),
            earthy: stats.is_earthy(),
        };

        self.previous = Some(grid);
        scores
    }

    /// Produce at most one candidate, when the blended confidence exceeds `threshold`.
    pub fn detect(&mut self, frame: &PixelBuffer, threshold: f32) -> Vec<Candidate> {
        let scores = self.analyze(frame);
        let confidence = scores.confidence();
        log::debug!(
            "heuristic scores motion={:.3} shape={:.3} color={:.3} texture={:.3} -> {:.3}",
            scores.motion,
            scores.shape,
            scores.color,
            scores.texture,
            confidence
        );
        if confidence <= threshold {
            return Vec::new();
        }
        vec![Candidate::new(
            scores.label(),
            confidence,
            self.synthesize_box(),
        )]
    }

    fn synthesize_box(&mut self) -> BoundingBox {
        let width = self.rng.gen_range(BOX_MIN_SIDE..=BOX_MAX_SIDE);
        let height = self.rng.gen_range(BOX_MIN_SIDE..=BOX_MAX_SIDE);
        let x = self.rng.gen_range(REGION_MIN..=REGION_MAX - width);
        let y = self.rng.gen_range(REGION_MIN..=REGION_MAX - height);
        BoundingBox::new(x, y, width, height).clamped()
    }
}

impl Default for HeuristicDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// `min(1, (changed_fraction * 10 + mean_abs_diff / 255) / 2)` over two grids
/// of equal shape. Mismatched shapes score zero.
pub fn motion_score(previous: &PixelBuffer, current: &PixelBuffer) -> f32 {
    if previous.width != current.width
        || previous.height != current.height
        || previous.channels != current.channels
        || current.is_empty()
    {
        return 0.0;
    }
    let mut changed = 0usize;
    let mut total_diff = 0u64;
    for (&a, &b) in previous.as_raw().iter().zip(current.as_raw()) {
        let diff = a.abs_diff(b);
        if diff > MOTION_DELTA {
            changed += 1;
        }
        total_diff += diff as u64;
    }
    let n = current.as_raw().len() as f32;
    let changed_fraction = changed as f32 / n;
    let mean_abs_diff = total_diff as f32 / n;
    ((changed_fraction * 10.0 + mean_abs_diff / 255.0) / 2.0).min(1.0)
}

/// Edge density of a grayscale buffer: `min(1, edge_ratio * 5)` where edges are
/// interior pixels whose 8-neighbour Laplacian response exceeds the threshold.
pub fn shape_score(gray: &PixelBuffer) -> f32 {
    debug_assert_eq!(gray.channels, Channels::Gray);
    let (w, h) = (gray.width as usize, gray.height as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = |x: usize, y: usize| gray.luma_at(x, y) as f32 / 255.0;
    let mut edges = 0usize;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut neighbours = 0.0;
            for dy in 0..3 {
                for dx in 0..3 {
                    if dx != 1 || dy != 1 {
                        neighbours += px(x + dx - 1, y + dy - 1);
                    }
                }
            }
            let response = 8.0 * px(x, y) - neighbours;
            if response.abs() > EDGE_THRESHOLD {
                edges += 1;
            }
        }
    }
    let interior = ((w - 2) * (h - 2)) as f32;
    (edges as f32 / interior * 5.0).min(1.0)
}

/// Mean local variance of sampled 5x5 patches, normalized into `[0, 1]`.
pub fn texture_score(gray: &PixelBuffer) -> f32 {
    debug_assert_eq!(gray.channels, Channels::Gray);
    let (w, h) = (gray.width as usize, gray.height as usize);
    if w < PATCH_SIZE || h < PATCH_SIZE {
        return 0.0;
    }
    let mut variance_sum = 0.0f32;
    let mut samples = 0usize;
    for y0 in (0..=h - PATCH_SIZE).step_by(PATCH_STRIDE) {
        for x0 in (0..=w - PATCH_SIZE).step_by(PATCH_STRIDE) {
            let mut sum = 0.0f32;
            let mut sum_sq = 0.0f32;
            for y in y0..y0 + PATCH_SIZE {
                for x in x0..x0 + PATCH_SIZE {
                    let v = gray.luma_at(x, y) as f32;
                    sum += v;
                    sum_sq += v * v;
                }
            }
            let n = (PATCH_SIZE * PATCH_SIZE) as f32;
            let mean = sum / n;
            variance_sum += (sum_sq / n - mean * mean).max(0.0);
            samples += 1;
        }
    }
    if samples == 0 {
        return 0.0;
    }
    (variance_sum / samples as f32 / TEXTURE_DIVISOR).clamp(0.0, 1.0)
}

/// Per-channel mean and standard deviation of an RGB buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorStats {
    pub mean: [f32; 3],
    pub std_dev: [f32; 3],
}

impl ColorStats {
    pub fn of(rgb: &PixelBuffer) -> Self {
        if rgb.channels != Channels::Rgb || rgb.is_empty() {
            return Self::default();
        }
        let mut sum = [0.0f64; 3];
        let mut sum_sq = [0.0f64; 3];
        for px in rgb.as_raw().chunks_exact(3) {
            for c in 0..3 {
                let v = px[c] as f64;
                sum[c] += v;
                sum_sq[c] += v * v;
            }
        }
        let n = rgb.pixel_count() as f64;
        let mut stats = Self::default();
        for c in 0..3 {
            let mean = sum[c] / n;
            stats.mean[c] = mean as f32;
            stats.std_dev[c] = (sum_sq[c] / n - mean * mean).max(0.0).sqrt() as f32;
        }
        stats
    }

    /// Red dominates green and blue: browns, tans, russets.
    pub fn is_earthy(&self) -> bool {
        let [r, g, b] = self.mean;
        r >= g + EARTHY_GREEN_MARGIN && r >= b + EARTHY_BLUE_MARGIN
    }

    pub fn score(&self) -> f32 {
        let base = if self.is_earthy() { 0.7 } else { 0.3 };
        let spread = self.std_dev.iter().sum::<f32>() / 3.0;
        (base + 0.5 * (spread / 255.0)).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::to_grayscale;

    fn checkerboard(width: u32, height: u32, a: [u8; 3], b: [u8; 3]) -> PixelBuffer {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(if (x + y) % 2 == 0 { &a } else { &b });
            }
        }
        PixelBuffer::from_raw(width, height, Channels::Rgb, data).unwrap()
    }

    #[test]
    fn identical_frames_have_zero_motion() {
        let frame = checkerboard(64, 48, [120, 80, 40], [30, 30, 30]);
        let mut detector = HeuristicDetector::with_seed(1);
        let first = detector.analyze(&frame);
        let second = detector.analyze(&frame);
        assert_eq!(first.motion, 0.0);
        assert_eq!(second.motion, 0.0);
    }

    #[test]
    fn uniform_static_scene_does_not_fire() {
        let frame = PixelBuffer::solid_rgb(64, 48, [90, 90, 90]);
        let mut detector = HeuristicDetector::with_seed(1);
        assert!(detector.detect(&frame, 0.5).is_empty());
        assert!(detector.detect(&frame, 0.5).is_empty());
    }

    #[test]
    fn reference_frame_is_kept_even_without_detection() {
        let frame = PixelBuffer::solid_rgb(32, 32, [0, 0, 0]);
        let mut detector = HeuristicDetector::with_seed(1);
        assert!(!detector.has_reference_frame());
        assert!(detector.detect(&frame, 0.99).is_empty());
        assert!(detector.has_reference_frame());
        detector.reset();
        assert!(!detector.has_reference_frame());
    }

    #[test]
    fn full_change_saturates_motion() {
        let black = to_grayscale(&PixelBuffer::solid_rgb(16, 16, [0, 0, 0]));
        let white = to_grayscale(&PixelBuffer::solid_rgb(16, 16, [255, 255, 255]));
        assert_eq!(motion_score(&black, &white), 1.0);
        assert_eq!(motion_score(&black, &black), 0.0);
    }

    #[test]
    fn checkerboard_is_all_edges_and_flat_is_none() {
        let board = to_grayscale(&checkerboard(20, 20, [255, 255, 255], [0, 0, 0]));
        assert_eq!(shape_score(&board), 1.0);
        let flat = to_grayscale(&PixelBuffer::solid_rgb(20, 20, [128, 128, 128]));
        assert_eq!(shape_score(&flat), 0.0);
    }

    #[test]
    fn texture_reflects_local_variance() {
        let flat = to_grayscale(&PixelBuffer::solid_rgb(40, 40, [50, 50, 50]));
        assert_eq!(texture_score(&flat), 0.0);
        let board = to_grayscale(&checkerboard(40, 40, [255, 255, 255], [0, 0, 0]));
        assert!(texture_score(&board) > 0.9);
    }

    #[test]
    fn earthy_tone_raises_color_score() {
        let brown = ColorStats::of(&PixelBuffer::solid_rgb(8, 8, [140, 100, 60]));
        assert!(brown.is_earthy());
        assert!((brown.score() - 0.7).abs() < 1e-6);

        let sky = ColorStats::of(&PixelBuffer::solid_rgb(8, 8, [80, 120, 200]));
        assert!(!sky.is_earthy());
        assert!((sky.score() - 0.3).abs() < 1e-6);
    }

    #[test]
    fn moving_earthy_subject_fires_with_central_box() {
        let mut detector = HeuristicDetector::with_seed(7);
        let empty = PixelBuffer::solid_rgb(64, 48, [0, 0, 0]);
        let subject = checkerboard(64, 48, [200, 120, 60], [90, 50, 20]);

        assert!(detector.detect(&empty, 0.5).is_empty());
        let found = detector.detect(&subject, 0.5);
        assert_eq!(found.len(), 1);
        let candidate = &found[0];
        assert_eq!(candidate.class, "large_mammal");
        assert!(candidate.confidence > 0.5);
        let b = candidate.bbox;
        assert!(b.is_normalized());
        assert!(b.x >= REGION_MIN && b.right() <= REGION_MAX + 1e-6);
        assert!(b.y >= REGION_MIN && b.bottom() <= REGION_MAX + 1e-6);
    }
}
