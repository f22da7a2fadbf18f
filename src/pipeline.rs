// End-to-end fine-tuning run: load the dataset, draw the subsets, resolve the
// pretrained model, tokenize both splits, train with per-epoch evaluation and
// checkpoint selection, then persist the best model next to its tokenizer.

use crate::{
    data_processing::{DatasetSource, SentimentLabel, TokenizationStage},
    error::{PipelineError, Result},
    metric::{Accuracy, Metric},
    persistence::{self, TokenizerConfig},
    pretrained::ModelSource,
    training::{EpochMetrics, Trainer, TrainingConfig},
};
use burn::{config::Config, data::dataset::Dataset, tensor::backend::AutodiffBackend};
use std::path::PathBuf;
use std::sync::Arc;

pub const TRAINING_CONFIG_FILE: &str = "training_config.json";

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub train_examples: usize,
    pub eval_examples: usize,
    pub best_epoch: usize,
    pub best_score: f64,
    /// Metric value of the persisted model on the eval split
    pub final_metric: f64,
    pub history: Vec<EpochMetrics>,
    pub save_dir: PathBuf,
}

/// Runs the pipeline with accuracy as the evaluation metric.
pub fn run<B: AutodiffBackend>(
    config: &TrainingConfig,
    datasets: &dyn DatasetSource,
    models: &dyn ModelSource<B>,
    device: &B::Device,
) -> Result<RunReport> {
    run_with_metric(config, datasets, models, Accuracy, device)
}

pub fn run_with_metric<B: AutodiffBackend, M: Metric>(
    config: &TrainingConfig,
    datasets: &dyn DatasetSource,
    models: &dyn ModelSource<B>,
    metric: M,
    device: &B::Device,
) -> Result<RunReport> {
    config.validate()?;
    B::seed(config.seed);

    let splits = datasets
        .load(&config.dataset_name)?
        .select(config.train_subset, config.eval_subset, config.seed);
    splits.ensure_non_empty()?;
    if let Some(example) = splits.train.get(0) {
        tracing::debug!("First training example: {:?}", example);
    }
    tracing::info!(
        "Using {} train and {} eval examples",
        splits.train.len(),
        splits.test.len()
    );

    let pretrained = models.resolve(&config.model_name, config, device)?;

    let stage = TokenizationStage::new(Arc::new(pretrained.tokenizer.clone()), config.max_length)?;
    let dataset_train = stage.tokenize_split(&splits.train)?;
    let dataset_eval = stage.tokenize_split(&splits.test)?;
    let (train_examples, eval_examples) = (dataset_train.len(), dataset_eval.len());

    let metric_name = metric.name().to_string();
    let trainer = Trainer::<B, M>::new(config.clone(), metric, device.clone())?;
    let outcome = trainer.fit(pretrained.model, dataset_train, dataset_eval)?;
    tracing::info!("Evaluation {}: {:.4}", metric_name, outcome.final_metric);

    let save_dir = PathBuf::from(&config.save_dir);
    let tokenizer_config = TokenizerConfig::new(&pretrained.tokenizer, config.max_length, SentimentLabel::names());
    persistence::save_pretrained(
        &save_dir,
        outcome.model,
        &pretrained.model_config,
        &pretrained.tokenizer,
        &tokenizer_config,
    )?;

    let output_dir = PathBuf::from(&config.output_dir);
    std::fs::create_dir_all(&output_dir).map_err(|err| PipelineError::persistence(&output_dir, err))?;
    let config_path = output_dir.join(TRAINING_CONFIG_FILE);
    config
        .save(&config_path)
        .map_err(|err| PipelineError::persistence(&config_path, err))?;

    Ok(RunReport {
        train_examples,
        eval_examples,
        best_epoch: outcome.best_epoch,
        best_score: outcome.best_score,
        final_metric: outcome.final_metric,
        history: outcome.history,
        save_dir,
    })
}
