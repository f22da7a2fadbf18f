// Writes a fine-tuned classifier to a directory that is self-sufficient for
// reconstruction, and reads it back. Layout:
//
//   model.mpk.gz           weights (full precision)
//   config.json            classifier architecture
//   tokenizer.json         vocabulary and tokenizer pipeline
//   tokenizer_config.json  special-token mapping, max length, label names

use crate::data_processing::{
    PretrainedTokenizer, SpecialTokens, Tokenizer, CLS_TOKEN, PAD_TOKEN, SEP_TOKEN, UNK_TOKEN,
};
use crate::error::{PipelineError, Result};
use crate::model::{SentimentClassifier, SentimentClassifierConfig};
use crate::pretrained::Pretrained;
use burn::{
    config::Config,
    module::Module,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const MODEL_FILE: &str = "model";
pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

type ArtifactRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

/// Tokenizer settings the classifier was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub max_length: usize,
    pub pad_token: String,
    pub cls_token: String,
    pub sep_token: String,
    pub unk_token: String,
    pub special_token_ids: SpecialTokens,
    /// Label name for each class id.
    pub id2label: Vec<String>,
}

impl TokenizerConfig {
    pub fn new(tokenizer: &dyn Tokenizer, max_length: usize, id2label: Vec<String>) -> Self {
        Self {
            max_length,
            pad_token: PAD_TOKEN.to_string(),
            cls_token: CLS_TOKEN.to_string(),
            sep_token: SEP_TOKEN.to_string(),
            unk_token: UNK_TOKEN.to_string(),
            special_token_ids: tokenizer.special_tokens(),
            id2label,
        }
    }
}

/// Returns true if `dir` holds a persisted classifier.
pub fn is_pretrained_dir(dir: impl AsRef<Path>) -> bool {
    let dir = dir.as_ref();
    dir.join(CONFIG_FILE).is_file() && dir.join(TOKENIZER_FILE).is_file()
}

/// Persists model weights, architecture and tokenizer into `dir`, replacing
/// anything previously stored there.
pub fn save_pretrained<B: Backend>(
    dir: impl AsRef<Path>,
    model: SentimentClassifier<B>,
    model_config: &SentimentClassifierConfig,
    tokenizer: &PretrainedTokenizer,
    tokenizer_config: &TokenizerConfig,
) -> Result<()> {
    let dir = dir.as_ref();

    if dir.is_dir() {
        fs::remove_dir_all(dir).map_err(|err| PipelineError::persistence(dir, err))?;
    }
    fs::create_dir_all(dir).map_err(|err| PipelineError::persistence(dir, err))?;

    let model_path = dir.join(MODEL_FILE);
    ArtifactRecorder::new()
        .record(model.into_record(), model_path.clone())
        .map_err(|err| PipelineError::persistence(&model_path, format!("{err:?}")))?;

    let config_path = dir.join(CONFIG_FILE);
    model_config
        .save(&config_path)
        .map_err(|err| PipelineError::persistence(&config_path, err))?;

    tokenizer.save(dir.join(TOKENIZER_FILE))?;

    let tokenizer_config_path = dir.join(TOKENIZER_CONFIG_FILE);
    let json = serde_json::to_string_pretty(tokenizer_config)
        .map_err(|err| PipelineError::persistence(&tokenizer_config_path, err))?;
    fs::write(&tokenizer_config_path, json)
        .map_err(|err| PipelineError::persistence(&tokenizer_config_path, err))?;

    tracing::info!("Saved classifier to '{}'", dir.display());
    Ok(())
}

/// Rebuilds a classifier from a directory written by [`save_pretrained`].
pub fn load_pretrained<B: Backend>(dir: impl AsRef<Path>, device: &B::Device) -> Result<(Pretrained<B>, TokenizerConfig)> {
    let dir = dir.as_ref();

    let config_path = dir.join(CONFIG_FILE);
    let model_config = SentimentClassifierConfig::load(&config_path)
        .map_err(|err| PipelineError::persistence(&config_path, format!("{err:?}")))?;

    let tokenizer_config_path = dir.join(TOKENIZER_CONFIG_FILE);
    let json = fs::read_to_string(&tokenizer_config_path)
        .map_err(|err| PipelineError::persistence(&tokenizer_config_path, err))?;
    let tokenizer_config: TokenizerConfig = serde_json::from_str(&json)
        .map_err(|err| PipelineError::persistence(&tokenizer_config_path, err))?;

    let tokenizer = PretrainedTokenizer::from_file(dir.join(TOKENIZER_FILE))?;
    if tokenizer.special_tokens() != tokenizer_config.special_token_ids {
        return Err(PipelineError::Tokenization(format!(
            "special tokens of '{}' do not match {TOKENIZER_CONFIG_FILE}",
            dir.display()
        )));
    }

    let model_path = dir.join(MODEL_FILE);
    let record = ArtifactRecorder::new()
        .load(model_path.clone(), device)
        .map_err(|err| PipelineError::persistence(&model_path, format!("{err:?}")))?;
    let model = model_config.init::<B>(device).load_record(record);

    tracing::debug!("Loaded classifier from '{}'", dir.display());
    Ok((
        Pretrained {
            model,
            model_config,
            tokenizer,
        },
        tokenizer_config,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_processing::SentimentLabel;
    use crate::test_support::{tiny_model_config, word_level_tokenizer, TestBackend};

    fn save_tiny(dir: &Path) -> SentimentClassifierConfig {
        let tokenizer = word_level_tokenizer();
        let config = tiny_model_config(tokenizer.vocab_size(), 8);
        let model = config.init::<TestBackend>(&Default::default());
        let tokenizer_config = TokenizerConfig::new(&tokenizer, 8, SentimentLabel::names());

        save_pretrained(dir, model, &config, &tokenizer, &tokenizer_config).unwrap();
        config
    }

    #[test]
    fn test_save_creates_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("fine_tuned");
        save_tiny(&target);

        assert!(target.join("model.mpk.gz").is_file());
        assert!(target.join(CONFIG_FILE).is_file());
        assert!(target.join(TOKENIZER_FILE).is_file());
        assert!(target.join(TOKENIZER_CONFIG_FILE).is_file());
        assert!(fs::read_dir(&target).unwrap().next().is_some());
        assert!(is_pretrained_dir(&target));
    }

    #[test]
    fn test_save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("stale.bin");
        fs::write(&stale, b"old").unwrap();

        save_tiny(dir.path());

        assert!(!stale.exists());
        assert!(is_pretrained_dir(dir.path()));
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let tokenizer = word_level_tokenizer();
        let config = tiny_model_config(tokenizer.vocab_size(), 8);
        let model = config.init::<TestBackend>(&Default::default());
        let tokenizer_config = TokenizerConfig::new(&tokenizer, 8, SentimentLabel::names());

        let result = save_pretrained(blocker.join("out"), model, &config, &tokenizer, &tokenizer_config);
        assert!(matches!(result, Err(PipelineError::Persistence { .. })));
    }

    #[test]
    fn test_load_restores_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let config = save_tiny(dir.path());

        let (pretrained, tokenizer_config) =
            load_pretrained::<TestBackend>(dir.path(), &Default::default()).unwrap();

        assert_eq!(pretrained.model_config.vocab_size, config.vocab_size);
        assert_eq!(pretrained.model_config.max_seq_length, 8);
        assert_eq!(pretrained.model.n_classes(), 2);
        assert_eq!(tokenizer_config.max_length, 8);
        assert_eq!(tokenizer_config.id2label, vec!["NEGATIVE", "POSITIVE"]);
        assert_eq!(
            pretrained.tokenizer.special_tokens(),
            word_level_tokenizer().special_tokens()
        );
    }

    #[test]
    fn test_load_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_pretrained::<TestBackend>(dir.path().join("absent"), &Default::default());
        assert!(matches!(result, Err(PipelineError::Persistence { .. })));
    }
}
