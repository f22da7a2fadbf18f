// Sentiment inference over a persisted classifier. Texts go through the same
// tokenization the model was trained with, and the winning class is reported
// with its softmax probability.

use crate::{
    data_processing::{ClassificationBatcher, TokenizationStage},
    error::{PipelineError, Result},
    model::SentimentClassifier,
    persistence,
};
use burn::{data::dataloader::batcher::Batcher, tensor::backend::Backend};
use std::path::Path;
use std::sync::Arc;

/// Predicted label and its probability.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

pub struct TextClassifier<B: Backend> {
    model: SentimentClassifier<B>,
    stage: TokenizationStage,
    labels: Vec<String>,
    batcher: ClassificationBatcher<B>,
}

impl<B: Backend> TextClassifier<B> {
    pub fn new(model: SentimentClassifier<B>, stage: TokenizationStage, labels: Vec<String>, device: B::Device) -> Self {
        Self {
            model,
            stage,
            labels,
            batcher: ClassificationBatcher::new(device),
        }
    }

    /// Loads a classifier written by [`persistence::save_pretrained`].
    pub fn load(dir: impl AsRef<Path>, device: &B::Device) -> Result<Self> {
        let (pretrained, tokenizer_config) = persistence::load_pretrained::<B>(dir.as_ref(), device)?;

        if tokenizer_config.id2label.len() != pretrained.model.n_classes() {
            return Err(PipelineError::Config(format!(
                "{} label names for {} classes",
                tokenizer_config.id2label.len(),
                pretrained.model.n_classes()
            )));
        }

        let stage = TokenizationStage::new(Arc::new(pretrained.tokenizer), tokenizer_config.max_length)?;
        Ok(Self::new(pretrained.model, stage, tokenizer_config.id2label, device.clone()))
    }

    pub fn classify(&self, text: &str) -> Result<Prediction> {
        let mut predictions = self.classify_batch(&[text])?;
        predictions
            .pop()
            .ok_or_else(|| PipelineError::Tokenization("no prediction produced".to_string()))
    }

    /// Classifies every text in one forward pass, preserving order.
    pub fn classify_batch(&self, texts: &[&str]) -> Result<Vec<Prediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let items = texts
            .iter()
            .map(|text| self.stage.encode(text))
            .collect::<Result<Vec<_>>>()?;
        let probabilities = self
            .model
            .infer(self.batcher.batch(items))
            .into_data()
            .convert::<f32>()
            .value;

        let predictions = probabilities
            .chunks(self.model.n_classes())
            .map(|row| {
                let (index, score) = row
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });
                Prediction {
                    label: self.label_name(index),
                    score,
                }
            })
            .collect();

        Ok(predictions)
    }

    fn label_name(&self, index: usize) -> String {
        self.labels
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("LABEL_{index}"))
    }
}
