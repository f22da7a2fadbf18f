// Command-line surface of the `sentiment-finetune` binary. `train` starts from
// a JSON configuration file (or the defaults) and applies any flag given on top
// of it; `classify` runs a persisted classifier over the given texts.

use crate::error::{PipelineError, Result};
use crate::report::ReportSink;
use crate::training::{IntervalStrategy, TrainingConfig};
use burn::config::Config;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sentiment-finetune", version, about = "Fine-tune a transformer for binary sentiment classification")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fine-tune on a labeled dataset and persist the best model
    Train(TrainArgs),
    /// Classify texts with a persisted model
    Classify(ClassifyArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// JSON training configuration; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub model_name: Option<String>,
    #[arg(long)]
    pub dataset_name: Option<String>,
    #[arg(long)]
    pub output_dir: Option<String>,
    #[arg(long)]
    pub save_dir: Option<String>,
    #[arg(long, value_enum)]
    pub evaluation_strategy: Option<IntervalStrategy>,
    #[arg(long, value_enum)]
    pub save_strategy: Option<IntervalStrategy>,
    #[arg(long)]
    pub learning_rate: Option<f64>,
    #[arg(long)]
    pub warmup_steps: Option<usize>,
    #[arg(long)]
    pub train_batch_size: Option<usize>,
    #[arg(long)]
    pub eval_batch_size: Option<usize>,
    #[arg(long)]
    pub num_epochs: Option<usize>,
    #[arg(long)]
    pub weight_decay: Option<f32>,
    #[arg(long)]
    pub max_grad_norm: Option<f32>,
    #[arg(long)]
    pub max_length: Option<usize>,
    /// Number of train examples to keep
    #[arg(long, conflicts_with = "full_train")]
    pub train_subset: Option<usize>,
    /// Train on the whole train split
    #[arg(long)]
    pub full_train: bool,
    /// Number of eval examples to keep
    #[arg(long, conflicts_with = "full_eval")]
    pub eval_subset: Option<usize>,
    /// Evaluate on the whole test split
    #[arg(long)]
    pub full_eval: bool,
    #[arg(long)]
    pub logging_dir: Option<String>,
    #[arg(long)]
    pub logging_steps: Option<usize>,
    #[arg(long)]
    pub metric_for_best_model: Option<String>,
    #[arg(long, value_enum)]
    pub report_to: Option<ReportSink>,
    #[arg(long)]
    pub seed: Option<u64>,
}

impl TrainArgs {
    /// Resolves the effective configuration of the run.
    pub fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path).map_err(|err| {
                PipelineError::Config(format!("cannot read '{}': {err:?}", path.display()))
            })?,
            None => TrainingConfig::new(),
        };

        macro_rules! override_with {
            ($config:ident, $args:ident; $($field:ident),* $(,)?) => {
                $(if let Some(value) = &$args.$field {
                    $config.$field = value.clone();
                })*
            };
        }
        let args = self;
        override_with!(
            config, args;
            model_name,
            dataset_name,
            output_dir,
            save_dir,
            evaluation_strategy,
            save_strategy,
            learning_rate,
            warmup_steps,
            train_batch_size,
            eval_batch_size,
            num_epochs,
            weight_decay,
            max_grad_norm,
            max_length,
            logging_dir,
            logging_steps,
            metric_for_best_model,
            report_to,
            seed,
        );

        if self.full_train {
            config.train_subset = None;
        } else if self.train_subset.is_some() {
            config.train_subset = self.train_subset;
        }
        if self.full_eval {
            config.eval_subset = None;
        } else if self.eval_subset.is_some() {
            config.eval_subset = self.eval_subset;
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Directory written by `train`
    #[arg(long, default_value = "./fine_tuned_bert_imdb")]
    pub model_dir: PathBuf,
    /// Texts to classify
    #[arg(required = true)]
    pub texts: Vec<String>,
}
