// Supervised fine-tuning of the sentiment classifier. The trainer sweeps the
// tokenized train split in shuffled mini-batches (AdamW with decoupled weight
// decay, gradient-norm clipping and a linearly decaying learning rate), then
// evaluates on the eval split after every epoch. The checkpoint with the best
// selection metric is retained explicitly and returned once all epochs are done.

use crate::{
    data_processing::{ClassificationBatcher, ClassificationTrainingBatch, TokenizedExample},
    error::PipelineError,
    metric::Metric,
    model::{EncoderConfig, SentimentClassifier},
    report::{MetricsLogger, ReportSink},
};
use burn::{
    config::Config,
    data::dataloader::{DataLoader, DataLoaderBuilder},
    data::dataset::{Dataset, InMemDataset},
    grad_clipping::GradientClippingConfig,
    module::{AutodiffModule, Module},
    optim::{AdamWConfig, GradientsParams, Optimizer},
    record::{CompactRecorder, Recorder},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// When an action (evaluation, checkpoint saving) happens during training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStrategy {
    No,
    Epoch,
}

/// Every recognized option of a fine-tuning run.
#[derive(Config)]
pub struct TrainingConfig {
    /// Pretrained source: hub identifier or a persisted classifier directory
    #[config(default = "\"bert-base-uncased\".to_string()")]
    pub model_name: String,
    /// Dataset catalog identifier
    #[config(default = "\"imdb\".to_string()")]
    pub dataset_name: String,
    /// Per-epoch checkpoints are written here
    #[config(default = "\"./results\".to_string()")]
    pub output_dir: String,
    /// The fine-tuned classifier is persisted here
    #[config(default = "\"./fine_tuned_bert_imdb\".to_string()")]
    pub save_dir: String,
    #[config(default = "IntervalStrategy::Epoch")]
    pub evaluation_strategy: IntervalStrategy,
    #[config(default = "IntervalStrategy::Epoch")]
    pub save_strategy: IntervalStrategy,
    /// Peak learning rate
    #[config(default = 2e-5)]
    pub learning_rate: f64,
    #[config(default = 0)]
    pub warmup_steps: usize,
    #[config(default = 8)]
    pub train_batch_size: usize,
    #[config(default = 8)]
    pub eval_batch_size: usize,
    #[config(default = 3)]
    pub num_epochs: usize,
    #[config(default = 0.01)]
    pub weight_decay: f32,
    #[config(default = 1.0)]
    pub max_grad_norm: f32,
    /// Length every example is padded or truncated to
    #[config(default = 512)]
    pub max_length: usize,
    /// Number of train examples to keep; `None` keeps the whole split
    #[config(default = "Some(1000)")]
    pub train_subset: Option<usize>,
    /// Number of eval examples to keep; `None` keeps the whole split
    #[config(default = "Some(500)")]
    pub eval_subset: Option<usize>,
    #[config(default = "\"./logs\".to_string()")]
    pub logging_dir: String,
    /// Optimizer steps between train loss reports
    #[config(default = 10)]
    pub logging_steps: usize,
    /// `accuracy` (the injected metric) or `loss`
    #[config(default = "\"accuracy\".to_string()")]
    pub metric_for_best_model: String,
    #[config(default = "ReportSink::Disabled")]
    pub report_to: ReportSink,
    #[config(default = 42)]
    pub seed: u64,
    /// Encoder architecture for runs that start without pretrained weights
    #[config(default = "EncoderConfig::new()")]
    pub encoder: EncoderConfig,
}

impl TrainingConfig {
    pub fn validate(&self) -> crate::error::Result<()> {
        let positive = [
            ("train_batch_size", self.train_batch_size),
            ("eval_batch_size", self.eval_batch_size),
            ("num_epochs", self.num_epochs),
            ("logging_steps", self.logging_steps),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(PipelineError::Config(format!("{name} must be greater than zero")));
        }
        if self.max_length < 2 {
            return Err(PipelineError::Config("max_length must be at least 2".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(PipelineError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Linear warmup followed by linear decay to zero at `total_steps`.
#[derive(Debug, Clone, Copy, new)]
pub struct LinearSchedule {
    peak: f64,
    warmup_steps: usize,
    total_steps: usize,
}

impl LinearSchedule {
    /// Learning rate applied at optimizer step `step` (0-based).
    pub fn learning_rate(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.peak * step as f64 / self.warmup_steps as f64;
        }
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps).max(1);
        let remaining = self.total_steps.saturating_sub(step);
        self.peak * remaining as f64 / decay_steps as f64
    }
}

/// A retained model snapshot with the score that selected it.
#[derive(Debug, Clone)]
pub struct Checkpoint<M> {
    pub epoch: usize,
    pub score: f64,
    pub model: M,
}

/// Checkpoint selection: keeps the first snapshot that achieves the best score.
/// A snapshot is only replaced on strict improvement.
#[derive(Debug)]
pub struct BestCheckpoint<M> {
    greater_is_better: bool,
    best: Option<Checkpoint<M>>,
}

impl<M> BestCheckpoint<M> {
    pub fn new(greater_is_better: bool) -> Self {
        Self {
            greater_is_better,
            best: None,
        }
    }

    pub fn is_improvement(&self, score: f64) -> bool {
        match &self.best {
            None => !score.is_nan(),
            Some(best) if self.greater_is_better => score > best.score,
            Some(best) => score < best.score,
        }
    }

    /// Retains the model produced by `snapshot` if `score` improves on the
    /// best so far. Returns whether it was retained.
    pub fn offer(&mut self, epoch: usize, score: f64, snapshot: impl FnOnce() -> M) -> bool {
        if !self.is_improvement(score) {
            return false;
        }
        self.best = Some(Checkpoint {
            epoch,
            score,
            model: snapshot(),
        });
        true
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|best| best.score)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best.as_ref().map(|best| best.epoch)
    }

    pub fn into_best(self) -> Option<Checkpoint<M>> {
        self.best
    }
}

/// Which evaluation value drives checkpoint selection.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Selection {
    Metric { greater_is_better: bool },
    Loss,
}

impl Selection {
    fn resolve(name: &str, metric: &impl Metric) -> crate::error::Result<Self> {
        let name = name.strip_prefix("eval_").unwrap_or(name);
        if name == "loss" {
            Ok(Selection::Loss)
        } else if name == metric.name() {
            Ok(Selection::Metric {
                greater_is_better: metric.greater_is_better(),
            })
        } else {
            Err(PipelineError::UnknownMetric(name.to_string()))
        }
    }

    fn greater_is_better(self) -> bool {
        match self {
            Selection::Metric { greater_is_better } => greater_is_better,
            Selection::Loss => false,
        }
    }

    fn score(self, report: &EvalReport) -> f64 {
        match self {
            Selection::Metric { .. } => report.metric,
            Selection::Loss => report.loss,
        }
    }
}

/// Result of one evaluation sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Mean cross-entropy per eval example
    pub loss: f64,
    /// Value of the injected metric
    pub metric: f64,
    pub num_examples: usize,
}

/// Per-epoch training record.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Optimizer steps completed so far
    pub step: usize,
    pub train_loss: f64,
    pub eval_loss: Option<f64>,
    pub eval_metric: Option<f64>,
    pub learning_rate: f64,
}

/// Output of a completed run.
#[derive(Debug)]
pub struct TrainingOutcome<M> {
    /// The retained best model
    pub model: M,
    pub best_epoch: usize,
    pub best_score: f64,
    /// Metric value of the returned model on the eval split
    pub final_metric: f64,
    pub history: Vec<EpochMetrics>,
}

type TrainLoader<B> = Arc<dyn DataLoader<ClassificationTrainingBatch<B>>>;

/// Drives fine-tuning with an explicitly injected configuration and metric.
pub struct Trainer<B: AutodiffBackend, M: Metric> {
    config: TrainingConfig,
    metric: M,
    device: B::Device,
    selection: Selection,
    reporter: Option<MetricsLogger>,
}

impl<B: AutodiffBackend, M: Metric> Trainer<B, M> {
    pub fn new(config: TrainingConfig, metric: M, device: B::Device) -> crate::error::Result<Self> {
        config.validate()?;
        let selection = Selection::resolve(&config.metric_for_best_model, &metric)?;
        let reporter = match config.report_to {
            ReportSink::Csv => Some(MetricsLogger::new(&config.logging_dir, metric.name())?),
            ReportSink::Disabled => None,
        };

        Ok(Self {
            config,
            metric,
            device,
            selection,
            reporter,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Runs every configured epoch and returns the retained best model.
    pub fn fit(
        &self,
        model: SentimentClassifier<B>,
        dataset_train: InMemDataset<TokenizedExample>,
        dataset_eval: InMemDataset<TokenizedExample>,
    ) -> crate::error::Result<TrainingOutcome<SentimentClassifier<B>>> {
        let config = &self.config;
        let steps_per_epoch = dataset_train.len().div_ceil(config.train_batch_size);
        let schedule = LinearSchedule::new(
            config.learning_rate,
            config.warmup_steps,
            steps_per_epoch * config.num_epochs,
        );

        let dataloader_train: TrainLoader<B> = DataLoaderBuilder::new(ClassificationBatcher::<B>::new(self.device.clone()))
            .batch_size(config.train_batch_size)
            .shuffle(config.seed)
            .build(dataset_train);

        let dataloader_eval = self.eval_loader(dataset_eval);

        let mut optim = AdamWConfig::new()
            .with_epsilon(1e-8)
            .with_weight_decay(config.weight_decay)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)))
            .init::<B, SentimentClassifier<B>>();

        tracing::info!(
            "Training for {} epochs, {} steps per epoch",
            config.num_epochs,
            steps_per_epoch
        );

        let mut model = model;
        let mut best = BestCheckpoint::new(self.selection.greater_is_better());
        let mut history = Vec::with_capacity(config.num_epochs);
        let mut step = 0;

        for epoch in 1..=config.num_epochs {
            let (trained, train_loss) =
                self.train_epoch(model, &mut optim, &dataloader_train, &schedule, epoch, &mut step)?;
            model = trained;

            let mut metrics = EpochMetrics {
                epoch,
                step,
                train_loss,
                eval_loss: None,
                eval_metric: None,
                learning_rate: schedule.learning_rate(step.saturating_sub(1)),
            };

            if config.evaluation_strategy == IntervalStrategy::Epoch {
                let report = self.evaluate(&model.valid(), &dataloader_eval);
                metrics.eval_loss = Some(report.loss);
                metrics.eval_metric = Some(report.metric);

                let score = self.selection.score(&report);
                if best.offer(epoch, score, || (model.clone(), report)) {
                    tracing::info!("Epoch {} is the best so far (score {:.4})", epoch, score);
                }
            }

            tracing::info!(
                "Epoch {:>3}/{} | train_loss={:.4} | eval_loss={} | eval_{}={}",
                epoch,
                config.num_epochs,
                train_loss,
                display_optional(metrics.eval_loss),
                self.metric.name(),
                display_optional(metrics.eval_metric),
            );

            if config.save_strategy == IntervalStrategy::Epoch {
                self.save_checkpoint(&model, epoch)?;
            }
            if let Some(reporter) = &self.reporter {
                reporter.log_epoch(&metrics)?;
            }
            history.push(metrics);
        }

        let outcome = match best.into_best() {
            Some(checkpoint) => {
                tracing::info!("Loading best model from epoch {}", checkpoint.epoch);
                let (model, report) = checkpoint.model;
                TrainingOutcome {
                    model,
                    best_epoch: checkpoint.epoch,
                    best_score: checkpoint.score,
                    final_metric: report.metric,
                    history,
                }
            }
            None => {
                let report = self.evaluate(&model.valid(), &dataloader_eval);
                TrainingOutcome {
                    model,
                    best_epoch: config.num_epochs,
                    best_score: self.selection.score(&report),
                    final_metric: report.metric,
                    history,
                }
            }
        };

        Ok(outcome)
    }

    fn train_epoch<O>(
        &self,
        mut model: SentimentClassifier<B>,
        optim: &mut O,
        dataloader: &TrainLoader<B>,
        schedule: &LinearSchedule,
        epoch: usize,
        step: &mut usize,
    ) -> crate::error::Result<(SentimentClassifier<B>, f64)>
    where
        O: Optimizer<SentimentClassifier<B>, B>,
    {
        let mut loss_sum = 0.0;
        let mut batches = 0usize;
        let mut window_sum = 0.0;
        let mut window_batches = 0usize;

        for batch in dataloader.iter() {
            let output = model.forward(batch);
            let loss: f64 = output.loss.clone().into_scalar().elem();
            if !loss.is_finite() {
                return Err(PipelineError::Divergence {
                    epoch,
                    step: *step,
                    loss,
                });
            }

            let lr = schedule.learning_rate(*step);
            let grads = GradientsParams::from_grads(output.loss.backward(), &model);
            model = optim.step(lr, model, grads);
            *step += 1;

            loss_sum += loss;
            batches += 1;
            window_sum += loss;
            window_batches += 1;

            if *step % self.config.logging_steps == 0 {
                let window_loss = window_sum / window_batches as f64;
                tracing::info!("step {} | loss={:.4} | lr={:.3e}", *step, window_loss, lr);
                if let Some(reporter) = &self.reporter {
                    reporter.log_step(epoch, *step, window_loss, lr)?;
                }
                window_sum = 0.0;
                window_batches = 0;
            }
        }

        Ok((model, loss_sum / batches.max(1) as f64))
    }

    fn eval_loader(&self, dataset: InMemDataset<TokenizedExample>) -> TrainLoader<B::InnerBackend> {
        DataLoaderBuilder::new(ClassificationBatcher::<B::InnerBackend>::new(self.device.clone()))
            .batch_size(self.config.eval_batch_size)
            .build(dataset)
    }

    /// Inference-mode sweep over the eval split.
    pub fn evaluate(
        &self,
        model: &SentimentClassifier<B::InnerBackend>,
        dataloader: &TrainLoader<B::InnerBackend>,
    ) -> EvalReport {
        let mut predictions = Vec::new();
        let mut references = Vec::new();
        let mut loss_sum = 0.0;

        for batch in dataloader.iter() {
            let output = model.forward(batch);
            let [batch_size] = output.targets.dims();
            loss_sum += output.loss.into_scalar().elem::<f64>() * batch_size as f64;

            let predicted = output.output.argmax(1).into_data().convert::<i64>().value;
            predictions.extend(predicted.into_iter().map(|class| class as usize));
            let targets = output.targets.into_data().convert::<i64>().value;
            references.extend(targets.into_iter().map(|class| class as usize));
        }

        EvalReport {
            loss: loss_sum / references.len().max(1) as f64,
            metric: self.metric.compute(&predictions, &references),
            num_examples: references.len(),
        }
    }

    fn save_checkpoint(&self, model: &SentimentClassifier<B>, epoch: usize) -> crate::error::Result<()> {
        let dir = PathBuf::from(&self.config.output_dir).join(format!("checkpoint-{epoch}"));
        std::fs::create_dir_all(&dir).map_err(|err| PipelineError::persistence(&dir, err))?;

        let path = dir.join("model");
        CompactRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .map_err(|err| PipelineError::persistence(&path, format!("{err:?}")))?;

        tracing::debug!("Saved checkpoint for epoch {} to '{}'", epoch, dir.display());
        Ok(())
    }
}

fn display_optional(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.4}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_processing::TokenizationStage;
    use crate::metric::Accuracy;
    use crate::pretrained::Pretrained;
    use crate::test_support::{reviews, tiny_training_config, word_level_tokenizer, TestBackend};
    use std::cell::Cell;

    /// Reports a fixed sequence of scores, one per evaluation.
    struct ScriptedMetric {
        scores: Vec<f64>,
        calls: Cell<usize>,
    }

    impl ScriptedMetric {
        fn new(scores: &[f64]) -> Self {
            Self {
                scores: scores.to_vec(),
                calls: Cell::new(0),
            }
        }
    }

    impl Metric for ScriptedMetric {
        fn name(&self) -> &str {
            "accuracy"
        }

        fn compute(&self, _predictions: &[usize], _references: &[usize]) -> f64 {
            let call = self.calls.get();
            self.calls.set(call + 1);
            self.scores[call.min(self.scores.len() - 1)]
        }
    }

    fn tokenized(config: &TrainingConfig, train: usize, eval: usize) -> (InMemDataset<TokenizedExample>, InMemDataset<TokenizedExample>) {
        let stage = TokenizationStage::new(Arc::new(word_level_tokenizer()), config.max_length).unwrap();
        (
            stage.tokenize_split(&InMemDataset::new(reviews(train, 0))).unwrap(),
            stage.tokenize_split(&InMemDataset::new(reviews(eval, 1))).unwrap(),
        )
    }

    fn initial_model(config: &TrainingConfig) -> SentimentClassifier<TestBackend> {
        Pretrained::<TestBackend>::from_tokenizer(word_level_tokenizer(), config, &Default::default())
            .unwrap()
            .model
    }

    #[test]
    fn test_defaults_match_reference_run() {
        let config = TrainingConfig::new();
        assert_eq!(config.learning_rate, 2e-5);
        assert_eq!(config.train_batch_size, 8);
        assert_eq!(config.eval_batch_size, 8);
        assert_eq!(config.num_epochs, 3);
        assert_eq!(config.weight_decay, 0.01);
        assert_eq!(config.max_length, 512);
        assert_eq!(config.train_subset, Some(1000));
        assert_eq!(config.eval_subset, Some(500));
        assert_eq!(config.logging_steps, 10);
        assert_eq!(config.evaluation_strategy, IntervalStrategy::Epoch);
        assert_eq!(config.metric_for_best_model, "accuracy");
        assert_eq!(config.report_to, ReportSink::Disabled);
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("training.json");
        let config = TrainingConfig::new()
            .with_num_epochs(5)
            .with_train_subset(None)
            .with_report_to(ReportSink::Csv);
        config.save(&path).unwrap();

        let loaded = TrainingConfig::load(&path).unwrap();
        assert_eq!(loaded.num_epochs, 5);
        assert_eq!(loaded.train_subset, None);
        assert_eq!(loaded.eval_subset, Some(500));
        assert_eq!(loaded.report_to, ReportSink::Csv);
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        assert!(TrainingConfig::new().validate().is_ok());
        assert!(matches!(
            TrainingConfig::new().with_train_batch_size(0).validate(),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            TrainingConfig::new().with_learning_rate(f64::NAN).validate(),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            TrainingConfig::new().with_max_length(1).validate(),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_linear_schedule_decays_to_zero() {
        let schedule = LinearSchedule::new(1.0, 0, 10);
        assert_eq!(schedule.learning_rate(0), 1.0);
        assert!((schedule.learning_rate(5) - 0.5).abs() < 1e-12);
        assert!((schedule.learning_rate(9) - 0.1).abs() < 1e-12);
        assert_eq!(schedule.learning_rate(10), 0.0);
        assert_eq!(schedule.learning_rate(12), 0.0);
    }

    #[test]
    fn test_linear_schedule_warmup() {
        let schedule = LinearSchedule::new(2.0, 4, 12);
        assert_eq!(schedule.learning_rate(0), 0.0);
        assert_eq!(schedule.learning_rate(2), 1.0);
        assert_eq!(schedule.learning_rate(4), 2.0);
        assert_eq!(schedule.learning_rate(8), 1.0);
    }

    #[test]
    fn test_best_checkpoint_is_monotonic() {
        let scores = [0.52, 0.61, 0.58, 0.61, 0.74, 0.70];
        let mut best = BestCheckpoint::new(true);
        let mut previous = f64::NEG_INFINITY;

        for (epoch, score) in scores.iter().enumerate() {
            best.offer(epoch + 1, *score, || epoch + 1);
            let current = best.best_score().unwrap();
            assert!(current >= previous);
            previous = current;
        }

        let checkpoint = best.into_best().unwrap();
        assert_eq!(checkpoint.epoch, 5);
        assert_eq!(checkpoint.model, 5);
    }

    #[test]
    fn test_best_checkpoint_tie_keeps_first() {
        let mut best = BestCheckpoint::new(true);
        assert!(best.offer(1, 0.5, || "first"));
        assert!(!best.offer(2, 0.5, || "second"));
        assert_eq!(best.best_epoch(), Some(1));
        assert_eq!(best.into_best().unwrap().model, "first");
    }

    #[test]
    fn test_best_checkpoint_lower_is_better() {
        let mut best = BestCheckpoint::new(false);
        assert!(best.offer(1, 0.9, || 1));
        assert!(best.offer(2, 0.4, || 2));
        assert!(!best.offer(3, 0.6, || 3));
        assert_eq!(best.best_score(), Some(0.4));
    }

    #[test]
    fn test_best_checkpoint_ignores_nan() {
        let mut best = BestCheckpoint::new(true);
        assert!(!best.offer(1, f64::NAN, || 1));
        assert!(best.into_best().is_none());
    }

    #[test]
    fn test_selection_resolution() {
        assert_eq!(
            Selection::resolve("accuracy", &Accuracy).unwrap(),
            Selection::Metric { greater_is_better: true }
        );
        assert!(Selection::resolve("eval_accuracy", &Accuracy).unwrap().greater_is_better());
        assert_eq!(Selection::resolve("loss", &Accuracy).unwrap(), Selection::Loss);
        assert!(matches!(
            Selection::resolve("f1", &Accuracy),
            Err(PipelineError::UnknownMetric(name)) if name == "f1"
        ));
    }

    #[test]
    fn test_fit_runs_every_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = tiny_training_config()
            .with_num_epochs(2)
            .with_train_batch_size(4)
            .with_logging_steps(3)
            .with_save_strategy(IntervalStrategy::Epoch)
            .with_output_dir(dir.path().join("results").to_string_lossy().to_string())
            .with_report_to(ReportSink::Csv)
            .with_logging_dir(dir.path().join("logs").to_string_lossy().to_string());

        let (train, eval) = tokenized(&config, 30, 10);
        let model = initial_model(&config);
        let trainer = Trainer::<TestBackend, _>::new(config, Accuracy, device).unwrap();
        let outcome = trainer.fit(model, train, eval).unwrap();

        assert_eq!(outcome.history.len(), 2);
        assert_eq!(outcome.history[1].step, 16);
        assert!((0.0..=1.0).contains(&outcome.final_metric));
        assert!((0.0..=1.0).contains(&outcome.best_score));
        assert!(outcome.best_score >= outcome.history[0].eval_metric.unwrap());
        let best = &outcome.history[outcome.best_epoch - 1];
        assert_eq!(outcome.final_metric, best.eval_metric.unwrap());

        assert!(dir.path().join("results/checkpoint-1/model.mpk.gz").is_file());
        assert!(dir.path().join("results/checkpoint-2/model.mpk.gz").is_file());

        let csv = std::fs::read_to_string(dir.path().join("logs/metrics.csv")).unwrap();
        // header, 5 step rows (steps 3..15), 2 epoch rows
        assert_eq!(csv.lines().count(), 8);
    }

    #[test]
    fn test_fit_without_per_epoch_evaluation() {
        let device = Default::default();
        let config = tiny_training_config()
            .with_num_epochs(2)
            .with_evaluation_strategy(IntervalStrategy::No);

        let (train, eval) = tokenized(&config, 12, 6);
        let model = initial_model(&config);
        let trainer = Trainer::<TestBackend, _>::new(config, Accuracy, device).unwrap();
        let outcome = trainer.fit(model, train, eval).unwrap();

        assert_eq!(outcome.best_epoch, 2);
        assert!(outcome.history.iter().all(|m| m.eval_metric.is_none()));
        assert!((0.0..=1.0).contains(&outcome.final_metric));
    }

    #[test]
    fn test_final_metric_belongs_to_best_epoch() {
        let config = tiny_training_config().with_num_epochs(3);
        let (train, eval) = tokenized(&config, 8, 4);
        let model = initial_model(&config);

        let metric = ScriptedMetric::new(&[0.9, 0.5, 0.6]);
        let trainer = Trainer::<TestBackend, _>::new(config, metric, Default::default()).unwrap();
        let outcome = trainer.fit(model, train, eval).unwrap();

        let scores: Vec<f64> = outcome.history.iter().map(|m| m.eval_metric.unwrap()).collect();
        assert_eq!(scores, vec![0.9, 0.5, 0.6]);
        assert_eq!(outcome.best_epoch, 1);
        assert_eq!(outcome.best_score, 0.9);
        assert_eq!(outcome.final_metric, 0.9);
    }

    #[test]
    fn test_non_finite_loss_stops_training() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("results");
        let config = tiny_training_config()
            .with_num_epochs(2)
            .with_save_strategy(IntervalStrategy::Epoch)
            .with_output_dir(output_dir.to_string_lossy().to_string());
        let (train, eval) = tokenized(&config, 8, 4);
        let model = initial_model(&config).with_constant_head(f64::NAN);

        let trainer = Trainer::<TestBackend, _>::new(config, Accuracy, Default::default()).unwrap();
        let result = trainer.fit(model, train, eval);

        match result {
            Err(PipelineError::Divergence { epoch, step, loss }) => {
                assert_eq!(epoch, 1);
                assert_eq!(step, 0);
                assert!(!loss.is_finite());
            }
            Err(other) => panic!("expected divergence, got {other}"),
            Ok(_) => panic!("expected divergence, training succeeded"),
        }
        assert!(!output_dir.join("checkpoint-1").exists());
    }

    #[test]
    fn test_eval_loss_is_weighted_by_batch_size() {
        // 5 examples: one full batch of 4 and a trailing batch of 1
        let config = tiny_training_config().with_eval_batch_size(4);
        let model = initial_model(&config).valid();

        let batched = Trainer::<TestBackend, _>::new(config.clone(), Accuracy, Default::default()).unwrap();
        let (_, eval) = tokenized(&config, 1, 5);
        let report = batched.evaluate(&model, &batched.eval_loader(eval));

        let single = Trainer::<TestBackend, _>::new(config.with_eval_batch_size(1), Accuracy, Default::default()).unwrap();
        let (_, eval) = tokenized(single.config(), 1, 5);
        let per_example = single.evaluate(&model, &single.eval_loader(eval));

        assert_eq!(report.num_examples, 5);
        assert_eq!(per_example.num_examples, 5);
        assert!((report.loss - per_example.loss).abs() < 1e-5);
    }

    #[test]
    fn test_unknown_selection_metric_is_rejected() {
        let config = tiny_training_config().with_metric_for_best_model("f1".to_string());
        let result = Trainer::<TestBackend, _>::new(config, Accuracy, Default::default());
        assert!(matches!(result, Err(PipelineError::UnknownMetric(_))));
    }
}
