//! Decoding of raw detector output into suppressed detections.
//!
//! Expected layout is `(1, 4 + C, B)`: rows 0..4 hold `cx, cy, w, h` and rows
//! `4..4 + C` hold per-class scores, one column per candidate box.

use super::geometry::{CenterBox, CornerBox};
use super::nms::{suppress_with_mode, SuppressionMode};
use super::result::Detection;
use super::tensor::Tensor;

/// Box parameters preceding the class scores in each column.
const BOX_PARAMS: usize = 4;

/// Thresholds applied while decoding.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_boxes: usize,
    pub suppression: SuppressionMode,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_boxes: 100,
            suppression: SuppressionMode::ClassAgnostic,
        }
    }
}

/// Decode a raw output tensor.
///
/// A tensor that is not rank 3, has an empty batch, or has fewer than 5
/// channels yields an empty result. Each column is single-label: its score is
/// the max class score and its class is the first arg-max.
pub fn postprocess(output: &Tensor, params: &DecodeParams) -> Vec<Detection> {
    if output.rank() != 3 || output.shape()[0] == 0 || output.shape()[1] < BOX_PARAMS + 1 {
        log::warn!(
            "postprocess: unexpected output shape {:?}; expected (1, 4 + classes, boxes)",
            output.shape()
        );
        return Vec::new();
    }
    let channels = output.shape()[1];
    let candidates = output.shape()[2];

    let mut boxes: Vec<CornerBox> = Vec::new();
    let mut scores: Vec<f32> = Vec::new();
    let mut class_ids: Vec<usize> = Vec::new();

    for col in 0..candidates {
        let (class_id, score) = best_class(output, channels, col);
        if score < params.confidence_threshold {
            continue;
        }
        let center = CenterBox::new(
            output.at3(0, 0, col),
            output.at3(0, 1, col),
            output.at3(0, 2, col),
            output.at3(0, 3, col),
        );
        boxes.push(center.to_corners());
        scores.push(score);
        class_ids.push(class_id);
    }

    if boxes.is_empty() {
        return Vec::new();
    }

    suppress_with_mode(
        params.suppression,
        &boxes,
        &scores,
        &class_ids,
        params.iou_threshold,
        params.max_boxes,
    )
    .into_iter()
    .map(|idx| Detection {
        bbox: boxes[idx],
        score: scores[idx],
        class_id: class_ids[idx],
    })
    .collect()
}

fn best_class(output: &Tensor, channels: usize, col: usize) -> (usize, f32) {
    let mut best = (0usize, f32::NEG_INFINITY);
    for (class_id, row) in (BOX_PARAMS..channels).enumerate() {
        let score = output.at3(0, row, col);
        if score > best.1 {
            best = (class_id, score);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    /// Build a `(1, 4 + C, B)` tensor from per-box columns `[cx, cy, w, h, s0, s1, ...]`.
    fn columns(cols: &[Vec<f32>]) -> Result<Tensor> {
        let channels = cols[0].len();
        let boxes = cols.len();
        let mut data = vec![0.0; channels * boxes];
        for (b, col) in cols.iter().enumerate() {
            for (c, &v) in col.iter().enumerate() {
                data[c * boxes + b] = v;
            }
        }
        Tensor::new(vec![1, channels, boxes], data)
    }

    #[test]
    fn overlapping_pair_and_disjoint_box() -> Result<()> {
        // A and B overlap heavily, A scores higher; C is far away.
        let output = columns(&[
            vec![50.0, 50.0, 20.0, 20.0, 0.1, 0.9],
            vec![52.0, 51.0, 20.0, 20.0, 0.7, 0.2],
            vec![300.0, 300.0, 30.0, 30.0, 0.6, 0.05],
        ])?;
        let detections = postprocess(&output, &DecodeParams::default());

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 1);
        assert!((detections[0].score - 0.9).abs() < 1e-6);
        assert_eq!(detections[0].bbox, CornerBox::new(40.0, 40.0, 60.0, 60.0));
        assert_eq!(detections[1].class_id, 0);
        assert_eq!(detections[1].bbox, CornerBox::new(285.0, 285.0, 315.0, 315.0));
        Ok(())
    }

    #[test]
    fn per_class_mode_keeps_cross_class_overlap() -> Result<()> {
        let output = columns(&[
            vec![50.0, 50.0, 20.0, 20.0, 0.1, 0.9],
            vec![52.0, 51.0, 20.0, 20.0, 0.7, 0.2],
        ])?;
        let params = DecodeParams {
            suppression: SuppressionMode::PerClass,
            ..DecodeParams::default()
        };
        assert_eq!(postprocess(&output, &params).len(), 2);
        Ok(())
    }

    #[test]
    fn threshold_above_one_yields_nothing() -> Result<()> {
        let output = columns(&[
            vec![50.0, 50.0, 20.0, 20.0, 1.0, 1.0],
            vec![10.0, 10.0, 5.0, 5.0, 0.99, 0.3],
        ])?;
        let params = DecodeParams {
            confidence_threshold: 1.0001,
            ..DecodeParams::default()
        };
        assert!(postprocess(&output, &params).is_empty());
        Ok(())
    }

    #[test]
    fn score_equal_to_threshold_survives() -> Result<()> {
        let output = columns(&[vec![5.0, 5.0, 2.0, 2.0, 0.25]])?;
        let detections = postprocess(&output, &DecodeParams::default());
        assert_eq!(detections.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_wrong_rank_and_narrow_channels() -> Result<()> {
        let flat = Tensor::new(vec![6, 3], vec![0.9; 18])?;
        assert!(postprocess(&flat, &DecodeParams::default()).is_empty());

        let narrow = Tensor::new(vec![1, 4, 3], vec![0.9; 12])?;
        assert!(postprocess(&narrow, &DecodeParams::default()).is_empty());
        Ok(())
    }

    #[test]
    fn empty_batch_yields_nothing() -> Result<()> {
        let output = Tensor::new(vec![0, 6, 3], Vec::new())?;
        assert!(postprocess(&output, &DecodeParams::default()).is_empty());
        Ok(())
    }

    #[test]
    fn argmax_picks_first_of_tied_classes() -> Result<()> {
        let output = columns(&[vec![5.0, 5.0, 2.0, 2.0, 0.5, 0.8, 0.8]])?;
        let detections = postprocess(&output, &DecodeParams::default());
        assert_eq!(detections[0].class_id, 1);
        Ok(())
    }

    #[test]
    fn max_boxes_caps_output() -> Result<()> {
        let cols: Vec<Vec<f32>> = (0..10)
            .map(|i| vec![i as f32 * 100.0, 0.0, 10.0, 10.0, 0.5 + i as f32 * 0.01])
            .collect();
        let output = columns(&cols)?;
        let params = DecodeParams {
            max_boxes: 3,
            ..DecodeParams::default()
        };
        let detections = postprocess(&output, &params);
        assert_eq!(detections.len(), 3);
        assert!(detections[0].score > detections[1].score);
        Ok(())
    }

    #[test]
    fn empty_candidate_set() -> Result<()> {
        let output = Tensor::new(vec![1, 6, 0], Vec::new())?;
        assert!(postprocess(&output, &DecodeParams::default()).is_empty());
        Ok(())
    }
}
