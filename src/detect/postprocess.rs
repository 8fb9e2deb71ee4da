//! Candidate filtering shared by every strategy: confidence threshold,
//! non-maximum suppression, and unit-square clamping.

use std::cmp::Ordering;

use super::result::{BoundingBox, Candidate};

/// Intersection over union of two normalized boxes. Zero when they do not overlap.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());
    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }
    let intersection = (x2 - x1) * (y2 - y1);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Greedy NMS. Survivors are ordered by descending confidence and no two of
/// them overlap with IoU at or above `iou_threshold`.
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    if candidates.len() <= 1 {
        return candidates;
    }
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if keep
            .iter()
            .all(|kept| iou(&kept.bbox, &candidate.bbox) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

/// Threshold, suppress, and clamp a strategy's raw candidates.
pub fn postprocess(
    candidates: Vec<Candidate>,
    confidence_threshold: f32,
    iou_threshold: f32,
) -> Vec<Candidate> {
    let filtered: Vec<Candidate> = candidates
        .into_iter()
        .filter(|c| c.confidence.is_finite() && c.confidence >= confidence_threshold)
        .collect();
    nms(filtered, iou_threshold)
        .into_iter()
        .map(|mut c| {
            c.bbox = c.bbox.clamped();
            c.confidence = c.confidence.clamp(0.0, 1.0);
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Candidate {
        Candidate::new("bird", conf, BoundingBox::new(x, y, w, h))
    }

    #[test]
    fn iou_properties() {
        let a = BoundingBox::new(0.1, 0.1, 0.4, 0.3);
        let b = BoundingBox::new(0.3, 0.2, 0.4, 0.5);
        let far = BoundingBox::new(0.8, 0.8, 0.1, 0.1);

        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &b), iou(&b, &a));
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn touching_boxes_do_not_overlap() {
        let a = BoundingBox::new(0.0, 0.0, 0.5, 0.5);
        let b = BoundingBox::new(0.5, 0.0, 0.5, 0.5);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn nms_keeps_highest_of_overlapping_pair() {
        let kept = nms(
            vec![
                cand(0.05, 0.05, 0.5, 0.5, 0.8),
                cand(0.0, 0.0, 0.5, 0.5, 0.9),
            ],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[0].bbox.x, 0.0);
    }

    #[test]
    fn nms_survivors_are_pairwise_below_threshold() {
        let input: Vec<Candidate> = (0..20)
            .map(|i| {
                let off = i as f32 * 0.03;
                cand(off, off * 0.5, 0.3, 0.3, 1.0 - i as f32 * 0.01)
            })
            .collect();
        let n = input.len();
        let kept = nms(input, 0.4);
        assert!(kept.len() <= n);
        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                assert!(iou(&a.bbox, &b.bbox) < 0.4);
            }
        }
        assert!(kept
            .windows(2)
            .all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn nms_single_candidate_is_noop() {
        let one = vec![cand(0.2, 0.2, 0.1, 0.1, 0.3)];
        assert_eq!(nms(one.clone(), 0.5), one);
        assert!(nms(Vec::new(), 0.5).is_empty());
    }

    #[test]
    fn postprocess_thresholds_and_clamps() {
        let out = postprocess(
            vec![
                cand(0.9, 0.9, 0.3, 0.3, 0.7),
                cand(0.1, 0.1, 0.1, 0.1, 0.2),
            ],
            0.5,
            0.45,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].bbox.is_normalized());
    }
}
