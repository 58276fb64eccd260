use serde::Serialize;

use crate::detect::{label_for, CornerBox, Detection};

/// One detection as sent to the alert sink.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertDetection {
    #[serde(rename = "class")]
    pub class_id: usize,
    pub label: String,
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: CornerBox,
}

/// Alert event for one sampled frame.
///
/// Serialises to the `payload` form field; the thumbnail travels as a
/// separate `thumb` part.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertPayload {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Epoch milliseconds.
    pub ts: u64,
    pub detections: Vec<AlertDetection>,
    #[serde(skip)]
    pub thumbnail: Option<Vec<u8>>,
}

impl AlertPayload {
    pub fn new(
        device_id: &str,
        ts: u64,
        detections: &[Detection],
        class_names: &[String],
        thumbnail: Option<Vec<u8>>,
    ) -> Self {
        Self {
            device_id: device_id.to_string(),
            ts,
            detections: detections
                .iter()
                .map(|d| AlertDetection {
                    class_id: d.class_id,
                    label: label_for(d.class_id, class_names),
                    score: d.score,
                    bbox: d.bbox,
                })
                .collect(),
            thumbnail,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Highest score among the carried detections.
    pub fn top_score(&self) -> f32 {
        self.detections
            .iter()
            .map(|d| d.score)
            .fold(0.0, f32::max)
    }
}
