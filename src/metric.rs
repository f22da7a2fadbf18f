// Evaluation metrics computed from predicted and reference label sequences.
// The trainer receives its metric by value.

/// A scalar evaluation metric over class predictions.
pub trait Metric {
    /// Name used to refer to this metric in the configuration (`metric_for_best_model`).
    fn name(&self) -> &str;

    /// Computes the metric from predicted and reference labels of equal length.
    fn compute(&self, predictions: &[usize], references: &[usize]) -> f64;

    /// Whether a higher value means a better model.
    fn greater_is_better(&self) -> bool {
        true
    }
}

/// Fraction of predictions that match their reference label.
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy;

impl Metric for Accuracy {
    fn name(&self) -> &str {
        "accuracy"
    }

    fn compute(&self, predictions: &[usize], references: &[usize]) -> f64 {
        debug_assert_eq!(predictions.len(), references.len());
        if references.is_empty() {
            return 0.0;
        }

        let correct = predictions
            .iter()
            .zip(references)
            .filter(|(prediction, reference)| prediction == reference)
            .count();

        correct as f64 / references.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accuracy_counts_matches() {
        let accuracy = Accuracy.compute(&[1, 0, 1, 1], &[1, 1, 1, 0]);
        assert!((accuracy - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_accuracy_bounds() {
        assert_eq!(Accuracy.compute(&[0, 1, 0], &[0, 1, 0]), 1.0);
        assert_eq!(Accuracy.compute(&[1, 0, 1], &[0, 1, 0]), 0.0);
        assert_eq!(Accuracy.compute(&[], &[]), 0.0);
    }

    #[test]
    fn test_accuracy_name() {
        assert_eq!(Accuracy.name(), "accuracy");
        assert!(Accuracy.greater_is_better());
    }
}
