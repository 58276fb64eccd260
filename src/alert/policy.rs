use std::collections::BTreeSet;

use crate::detect::Detection;

/// Which classes raise an alert, plus the label table used to name them.
#[derive(Clone, Debug)]
pub struct AlertPolicy {
    alert_classes: BTreeSet<usize>,
    class_names: Vec<String>,
}

impl AlertPolicy {
    pub fn new(alert_classes: impl IntoIterator<Item = usize>, class_names: Vec<String>) -> Self {
        Self {
            alert_classes: alert_classes.into_iter().collect(),
            class_names,
        }
    }

    pub fn is_alert_class(&self, class_id: usize) -> bool {
        self.alert_classes.contains(&class_id)
    }

    /// Detections whose class is alert-worthy, in input order.
    pub fn matching(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .filter(|d| self.is_alert_class(d.class_id))
            .copied()
            .collect()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }
}
