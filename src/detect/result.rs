use super::geometry::CornerBox;

/// One decoded, suppressed detection.
///
/// `bbox` is corner-form in the model's input coordinate space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: CornerBox,
    pub score: f32,
    pub class_id: usize,
}

/// Human-readable label for a class id, falling back to the decimal id when
/// the id is outside the label table.
pub fn label_for(class_id: usize, class_names: &[String]) -> String {
    class_names
        .get(class_id)
        .cloned()
        .unwrap_or_else(|| class_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_falls_back_to_numeric_id() {
        let names = vec!["fresh".to_string(), "moldy".to_string()];
        assert_eq!(label_for(1, &names), "moldy");
        assert_eq!(label_for(7, &names), "7");
        assert_eq!(label_for(0, &[]), "0");
    }
}
