// Error type shared by every pipeline stage. Library code returns
// `error::Result`; the binary wraps it in `anyhow` for reporting.

use std::path::PathBuf;
use thiserror::Error;

/// Every failure the fine-tuning pipeline can surface. None of them is
/// recovered locally; the invoking process is expected to halt and report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Dataset '{name}' is unavailable: {reason}")]
    DatasetUnavailable { name: String, reason: String },

    #[error("Pretrained source '{name}' is unavailable: {reason}")]
    PretrainedUnavailable { name: String, reason: String },

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("The {split} split is empty")]
    EmptySplit { split: &'static str },

    #[error("Training diverged at epoch {epoch}, step {step} (loss = {loss})")]
    Divergence { epoch: usize, step: usize, loss: f64 },

    #[error("Cannot persist to '{}': {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },

    #[error("Unknown metric for best model selection: {0}")]
    UnknownMetric(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn persistence(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Persistence {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_display() {
        let err = PipelineError::DatasetUnavailable {
            name: "imdb".to_string(),
            reason: "offline".to_string(),
        };
        assert!(format!("{}", err).contains("imdb"));
        assert!(format!("{}", err).contains("offline"));

        let err = PipelineError::Tokenization("missing [PAD]".to_string());
        assert!(format!("{}", err).contains("missing [PAD]"));

        let err = PipelineError::EmptySplit { split: "train" };
        assert!(format!("{}", err).contains("train split is empty"));

        let err = PipelineError::Divergence {
            epoch: 2,
            step: 17,
            loss: f64::NAN,
        };
        assert!(format!("{}", err).contains("epoch 2, step 17"));

        let err = PipelineError::persistence("/readonly/out", "permission denied");
        assert!(format!("{}", err).contains("/readonly/out"));
        assert!(format!("{}", err).contains("permission denied"));

        let err = PipelineError::UnknownMetric("f1".to_string());
        assert!(format!("{}", err).contains("f1"));
    }
}
