// Resolves a model name into the initial model state and its vocabulary.
//
// A name that points at a directory written by `persistence::save_pretrained`
// continues from those weights. Any other name is fetched from the Hugging
// Face hub: its tokenizer, its `config.json` and its PyTorch weights, which
// are loaded into the encoder before a fresh classification head is put on top.

use crate::data_processing::{PretrainedTokenizer, SentimentLabel, Tokenizer};
use crate::error::{PipelineError, Result};
use crate::model::{BertModel, BertModelRecord, EncoderConfig, SentimentClassifier, SentimentClassifierConfig};
use crate::persistence;
use crate::training::TrainingConfig;
use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const HUB_CONFIG_FILE: &str = "config.json";
const HUB_WEIGHTS_FILE: &str = "pytorch_model.bin";

/// Rewrites checkpoint parameter names into the module paths of [`BertModel`].
/// Applied in order, each to the output of the previous one.
pub const BERT_KEY_REMAP: [(&str, &str); 10] = [
    (r"^bert\.(.+)$", "$1"),
    (r"^(.+)\.gamma$", "$1.weight"),
    (r"^(.+)\.beta$", "$1.bias"),
    (r"^(.+)\.LayerNorm\.(.+)$", "$1.layer_norm.$2"),
    (r"^(.+)\.attention\.self\.(.+)$", "$1.attention.mha.$2"),
    (r"^(.+)\.attention\.output\.dense\.(.+)$", "$1.attention.mha.output.$2"),
    (r"^(.+)\.attention\.output\.layer_norm\.(.+)$", "$1.attention.layer_norm.$2"),
    (r"^(.+)\.intermediate\.dense\.(.+)$", "$1.intermediate.$2"),
    (r"^(.+)\.output\.dense\.(.+)$", "$1.output.$2"),
    (r"^(.+)\.output\.layer_norm\.(.+)$", "$1.output_norm.$2"),
];

/// Initial model state plus the vocabulary it was built against.
pub struct Pretrained<B: Backend> {
    pub model: SentimentClassifier<B>,
    pub model_config: SentimentClassifierConfig,
    pub tokenizer: PretrainedTokenizer,
}

impl<B: Backend> Pretrained<B> {
    /// Randomly initialized classifier sized to the vocabulary and run configuration.
    pub fn from_tokenizer(tokenizer: PretrainedTokenizer, config: &TrainingConfig, device: &B::Device) -> Result<Self> {
        let model_config = classifier_config(config.encoder.clone(), tokenizer.vocab_size(), config)?;
        let model = model_config.init(device);

        Ok(Self {
            model,
            model_config,
            tokenizer,
        })
    }
}

fn classifier_config(encoder: EncoderConfig, vocab_size: usize, config: &TrainingConfig) -> Result<SentimentClassifierConfig> {
    if config.max_length > encoder.max_position_embeddings {
        return Err(PipelineError::Config(format!(
            "max_length {} exceeds the {} position embeddings of the encoder",
            config.max_length, encoder.max_position_embeddings
        )));
    }
    Ok(SentimentClassifierConfig::new(
        encoder,
        SentimentLabel::num_classes(),
        vocab_size,
        config.max_length,
    ))
}

/// Lookup-by-name access to pretrained models.
pub trait ModelSource<B: Backend> {
    fn resolve(&self, name: &str, config: &TrainingConfig, device: &B::Device) -> Result<Pretrained<B>>;
}

/// Local checkpoints first, then the Hugging Face hub.
#[derive(Debug, Default, Clone, Copy)]
pub struct HubSource;

impl<B: Backend> ModelSource<B> for HubSource {
    fn resolve(&self, name: &str, config: &TrainingConfig, device: &B::Device) -> Result<Pretrained<B>> {
        if persistence::is_pretrained_dir(name) {
            tracing::info!("Continuing from checkpoint directory '{}'", name);
            let (pretrained, _) = persistence::load_pretrained(name, device)?;
            check_compatible(name, &pretrained.model_config, config)?;
            return Ok(pretrained);
        }

        tracing::info!("Fetching '{}' from the hub", name);
        let tokenizer = PretrainedTokenizer::from_pretrained(name)?;
        let files = HubFiles::download(name)?;
        let hub_config = HubBertConfig::read(name, &files.config)?;

        let model_config = classifier_config(hub_config.encoder(), hub_config.vocab_size, config)?;
        let bert = load_encoder(name, &files.weights, &model_config, device)?;
        tracing::info!(
            "Loaded {} encoder layers of '{}', classification head is newly initialized",
            model_config.encoder.num_hidden_layers,
            name
        );
        let model = model_config.init_with_encoder(bert, device);

        Ok(Pretrained {
            model,
            model_config,
            tokenizer,
        })
    }
}

struct HubFiles {
    config: PathBuf,
    weights: PathBuf,
}

impl HubFiles {
    fn download(name: &str) -> Result<Self> {
        let unavailable = |reason: String| PipelineError::PretrainedUnavailable {
            name: name.to_string(),
            reason,
        };

        let api = hf_hub::api::sync::Api::new().map_err(|err| unavailable(err.to_string()))?;
        let repo = api.model(name.to_string());
        let config = repo
            .get(HUB_CONFIG_FILE)
            .map_err(|err| unavailable(format!("{HUB_CONFIG_FILE}: {err}")))?;
        let weights = repo
            .get(HUB_WEIGHTS_FILE)
            .map_err(|err| unavailable(format!("{HUB_WEIGHTS_FILE}: {err}")))?;

        Ok(Self { config, weights })
    }
}

/// The subset of a Hugging Face BERT `config.json` the encoder needs.
#[derive(Debug, Deserialize)]
struct HubBertConfig {
    #[serde(default)]
    model_type: Option<String>,
    vocab_size: usize,
    hidden_size: usize,
    num_hidden_layers: usize,
    num_attention_heads: usize,
    intermediate_size: usize,
    max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    layer_norm_eps: f64,
    #[serde(default = "default_dropout")]
    hidden_dropout_prob: f64,
    #[serde(default = "default_dropout")]
    attention_probs_dropout_prob: f64,
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

fn default_dropout() -> f64 {
    0.1
}

impl HubBertConfig {
    fn read(name: &str, path: &Path) -> Result<Self> {
        let unavailable = |reason: String| PipelineError::PretrainedUnavailable {
            name: name.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|err| unavailable(err.to_string()))?;
        let config: Self = serde_json::from_str(&text).map_err(|err| unavailable(format!("{HUB_CONFIG_FILE}: {err}")))?;

        match config.model_type.as_deref() {
            None | Some("bert") => Ok(config),
            Some(other) => Err(unavailable(format!("unsupported model type '{other}'"))),
        }
    }

    fn encoder(&self) -> EncoderConfig {
        EncoderConfig::new()
            .with_hidden_size(self.hidden_size)
            .with_num_hidden_layers(self.num_hidden_layers)
            .with_num_attention_heads(self.num_attention_heads)
            .with_intermediate_size(self.intermediate_size)
            .with_max_position_embeddings(self.max_position_embeddings)
            .with_type_vocab_size(self.type_vocab_size)
            .with_layer_norm_eps(self.layer_norm_eps)
            .with_hidden_dropout_prob(self.hidden_dropout_prob)
            .with_attention_probs_dropout_prob(self.attention_probs_dropout_prob)
    }
}

fn load_encoder<B: Backend>(
    name: &str,
    weights: &Path,
    model_config: &SentimentClassifierConfig,
    device: &B::Device,
) -> Result<BertModel<B>> {
    let args = BERT_KEY_REMAP
        .iter()
        .fold(LoadArgs::new(weights.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });

    let record: BertModelRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(args, device)
        .map_err(|err| PipelineError::PretrainedUnavailable {
            name: name.to_string(),
            reason: format!("{HUB_WEIGHTS_FILE}: {err:?}"),
        })?;

    Ok(model_config
        .encoder
        .init::<B>(model_config.vocab_size, device)
        .load_record(record))
}

/// Random weights over a vocabulary that is already in hand; used for offline runs.
#[derive(Clone)]
pub struct VocabularySource {
    tokenizer: PretrainedTokenizer,
}

impl VocabularySource {
    pub fn new(tokenizer: PretrainedTokenizer) -> Self {
        Self { tokenizer }
    }
}

impl<B: Backend> ModelSource<B> for VocabularySource {
    fn resolve(&self, name: &str, config: &TrainingConfig, device: &B::Device) -> Result<Pretrained<B>> {
        tracing::debug!("Initializing '{}' over a local vocabulary", name);
        Pretrained::from_tokenizer(self.tokenizer.clone(), config, device)
    }
}

fn check_compatible(name: &str, model_config: &SentimentClassifierConfig, config: &TrainingConfig) -> Result<()> {
    if model_config.n_classes != SentimentLabel::num_classes() {
        return Err(PipelineError::Config(format!(
            "'{name}' has {} classes, expected {}",
            model_config.n_classes,
            SentimentLabel::num_classes()
        )));
    }
    if model_config.max_seq_length < config.max_length {
        return Err(PipelineError::Config(format!(
            "'{name}' supports sequences of at most {} tokens, max_length is {}",
            model_config.max_seq_length, config.max_length
        )));
    }
    Ok(())
}
