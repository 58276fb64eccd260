//! Greedy non-max suppression.

use std::collections::BTreeMap;

use serde::Deserialize;

use super::geometry::CornerBox;

/// Which candidates compete with each other during suppression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionMode {
    /// All candidates compete regardless of class. A confident box of one class
    /// can suppress an overlapping box of another class.
    #[default]
    ClassAgnostic,
    /// Suppression runs independently inside each class.
    PerClass,
}

/// Indices of `scores` ordered by descending score; ties keep input order.
fn descending_order(indices: impl Iterator<Item = usize>, scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = indices.collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    order
}

/// Greedy NMS over corner-form boxes.
///
/// Returns indices into `boxes` in keep order (descending score), at most
/// `max_boxes` long. A candidate is dropped when its IoU with an already kept
/// box is strictly greater than `iou_threshold`.
pub fn suppress(
    boxes: &[CornerBox],
    scores: &[f32],
    iou_threshold: f32,
    max_boxes: usize,
) -> Vec<usize> {
    debug_assert_eq!(boxes.len(), scores.len());
    let order = descending_order(0..boxes.len().min(scores.len()), scores);
    greedy(boxes, order, iou_threshold, max_boxes)
}

fn greedy(
    boxes: &[CornerBox],
    mut remaining: Vec<usize>,
    iou_threshold: f32,
    max_boxes: usize,
) -> Vec<usize> {
    let mut keep = Vec::new();
    while !remaining.is_empty() && keep.len() < max_boxes {
        let best = remaining.remove(0);
        keep.push(best);
        let chosen = boxes[best];
        remaining.retain(|&idx| chosen.iou(&boxes[idx]) <= iou_threshold);
    }
    keep
}

/// NMS run separately per class, merged by descending score and capped at
/// `max_boxes`.
pub fn suppress_per_class(
    boxes: &[CornerBox],
    scores: &[f32],
    class_ids: &[usize],
    iou_threshold: f32,
    max_boxes: usize,
) -> Vec<usize> {
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &class_id) in class_ids.iter().enumerate().take(boxes.len()) {
        by_class.entry(class_id).or_default().push(idx);
    }

    let mut kept = Vec::new();
    for members in by_class.into_values() {
        let order = descending_order(members.into_iter(), scores);
        kept.extend(greedy(boxes, order, iou_threshold, max_boxes));
    }

    // Stable merge: equal scores fall back to input order.
    kept.sort_unstable();
    let mut merged = descending_order(kept.into_iter(), scores);
    merged.truncate(max_boxes);
    merged
}

/// Dispatch on `mode`.
pub fn suppress_with_mode(
    mode: SuppressionMode,
    boxes: &[CornerBox],
    scores: &[f32],
    class_ids: &[usize],
    iou_threshold: f32,
    max_boxes: usize,
) -> Vec<usize> {
    match mode {
        SuppressionMode::ClassAgnostic => suppress(boxes, scores, iou_threshold, max_boxes),
        SuppressionMode::PerClass => {
            suppress_per_class(boxes, scores, class_ids, iou_threshold, max_boxes)
        }
    }
}
