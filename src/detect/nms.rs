use std::cmp::Ordering;

use super::result::ScoredBox;

/// Greedy non-maximum suppression.
///
/// Drops candidates whose confidence does not exceed `score_threshold`, then walks
/// the rest from highest to lowest confidence, keeping a box only when its IoU with
/// every box kept so far is at most `iou_threshold`. The result is ordered by
/// descending confidence (ties keep their input order), so running it again on its
/// own output removes nothing.
pub fn non_max_suppression(
    candidates: &[ScoredBox],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<ScoredBox> {
    let mut ranked: Vec<ScoredBox> = candidates
        .iter()
        .copied()
        .filter(|c| c.confidence > score_threshold)
        .collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<ScoredBox> = Vec::with_capacity(ranked.len());
    for candidate in ranked {
        if kept
            .iter()
            .all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    fn scored(x: i32, y: i32, w: u32, h: u32, confidence: f32) -> ScoredBox {
        ScoredBox {
            bbox: BoundingBox::new(x, y, w, h),
            confidence,
        }
    }

    #[test]
    fn keeps_highest_confidence_box_per_cluster() {
        let candidates = vec![
            scored(100, 100, 50, 100, 0.7),
            scored(102, 101, 50, 100, 0.9),
            scored(104, 98, 48, 102, 0.6),
            scored(300, 120, 40, 90, 0.8),
        ];
        let kept = non_max_suppression(&candidates, 0.5, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].bbox, BoundingBox::new(102, 101, 50, 100));
        assert_eq!(kept[1].bbox, BoundingBox::new(300, 120, 40, 90));
    }

    #[test]
    fn drops_candidates_at_or_below_score_threshold() {
        let candidates = vec![scored(0, 0, 10, 10, 0.5), scored(50, 50, 10, 10, 0.51)];
        let kept = non_max_suppression(&candidates, 0.5, 0.4);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.51);
    }

    #[test]
    fn overlap_exactly_at_threshold_is_kept() {
        // IoU = 40 / (70 + 70 - 40) = 0.4
        let a = scored(0, 0, 7, 10, 0.9);
        let b = scored(3, 0, 7, 10, 0.8);
        let iou = a.bbox.iou(&b.bbox);
        assert!((iou - 0.4).abs() < 1e-6);
        let kept = non_max_suppression(&[a, b], 0.5, iou);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn suppression_is_idempotent() {
        let candidates = vec![
            scored(10, 10, 60, 120, 0.95),
            scored(15, 12, 60, 120, 0.85),
            scored(200, 40, 55, 110, 0.75),
            scored(205, 45, 55, 110, 0.75),
            scored(400, 40, 30, 60, 0.55),
            scored(90, 300, 20, 20, 0.3),
        ];
        let once = non_max_suppression(&candidates, 0.5, 0.4);
        let twice = non_max_suppression(&once, 0.5, 0.4);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 3);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(non_max_suppression(&[], 0.5, 0.4).is_empty());
    }
}
