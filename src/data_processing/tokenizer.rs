// The Tokenizer trait is the common interface for vocabularies used by the
// classifier. PretrainedTokenizer is backed by the `tokenizers` crate (BERT
// WordPiece vocabularies from the hub, or a local tokenizer.json).
// TokenizationStage turns raw examples into fixed-length id sequences with an
// attention mask: [CLS] content [SEP] followed by right padding.

use super::dataset::Example;
use crate::error::{PipelineError, Result};
use burn::data::dataset::{Dataset, InMemDataset};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

pub const PAD_TOKEN: &str = "[PAD]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const UNK_TOKEN: &str = "[UNK]";

/// Ids of the control tokens every classifier input relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialTokens {
    pub pad: usize,
    pub cls: usize,
    pub sep: usize,
    pub unk: usize,
}

pub trait Tokenizer: Send + Sync {
    /// Converts a text into sub-word ids, without control tokens.
    fn encode(&self, value: &str) -> Result<Vec<usize>>;

    /// Converts ids back into text, skipping control tokens.
    fn decode(&self, tokens: &[usize]) -> Result<String>;

    /// Gets the size of the vocabulary.
    fn vocab_size(&self) -> usize;

    fn special_tokens(&self) -> SpecialTokens;

    /// Gets the token used to pad sequences to the same length.
    fn pad_token(&self) -> usize {
        self.special_tokens().pad
    }
}

/// Tokenizer backed by a `tokenizers` pipeline.
#[derive(Clone)]
pub struct PretrainedTokenizer {
    tokenizer: tokenizers::Tokenizer,
    special_tokens: SpecialTokens,
}

impl PretrainedTokenizer {
    /// Wraps a `tokenizers` pipeline, failing if a control token has no id.
    pub fn new(tokenizer: tokenizers::Tokenizer) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .map(|id| id as usize)
                .ok_or_else(|| {
                    PipelineError::Tokenization(format!("vocabulary has no id for control token {token}"))
                })
        };

        let special_tokens = SpecialTokens {
            pad: id(PAD_TOKEN)?,
            cls: id(CLS_TOKEN)?,
            sep: id(SEP_TOKEN)?,
            unk: id(UNK_TOKEN)?,
        };

        Ok(Self {
            tokenizer,
            special_tokens,
        })
    }

    /// Downloads a vocabulary from the Hugging Face hub, e.g. `bert-base-uncased`.
    pub fn from_pretrained(name: &str) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_pretrained(name, None).map_err(|err| {
            PipelineError::PretrainedUnavailable {
                name: name.to_string(),
                reason: err.to_string(),
            }
        })?;
        Self::new(tokenizer)
    }

    /// Loads a serialized `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = tokenizers::Tokenizer::from_file(path).map_err(|err| {
            PipelineError::Tokenization(format!("cannot load '{}': {err}", path.display()))
        })?;
        Self::new(tokenizer)
    }

    /// Builds a lowercasing whitespace word-level vocabulary. Control tokens
    /// take ids 0..4, followed by `words` in order.
    pub fn word_level(words: &[&str]) -> Result<Self> {
        let specials = [PAD_TOKEN, UNK_TOKEN, CLS_TOKEN, SEP_TOKEN];

        let mut vocab = serde_json::Map::new();
        for token in specials.iter().chain(words) {
            if !vocab.contains_key(*token) {
                let next_id = vocab.len();
                vocab.insert(token.to_string(), serde_json::json!(next_id));
            }
        }

        let added_tokens: Vec<serde_json::Value> = specials
            .iter()
            .enumerate()
            .map(|(id, token)| {
                serde_json::json!({
                    "id": id, "content": token, "single_word": false, "lstrip": false,
                    "rstrip": false, "normalized": false, "special": true
                })
            })
            .collect();

        let tokenizer_json = serde_json::json!({
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": added_tokens,
            "normalizer": { "type": "Lowercase" },
            "pre_tokenizer": { "type": "Whitespace" },
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": vocab,
                "unk_token": UNK_TOKEN
            }
        });

        let tokenizer = tokenizer_json
            .to_string()
            .parse::<tokenizers::Tokenizer>()
            .map_err(|err| PipelineError::Tokenization(format!("invalid word-level vocabulary: {err}")))?;
        Self::new(tokenizer)
    }

    /// Writes the full tokenizer pipeline as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.tokenizer
            .save(path, true)
            .map_err(|err| PipelineError::persistence(path, err))
    }
}

impl Tokenizer for PretrainedTokenizer {
    fn encode(&self, value: &str) -> Result<Vec<usize>> {
        let encoding = self
            .tokenizer
            .encode(value, false)
            .map_err(|err| PipelineError::Tokenization(err.to_string()))?;
        Ok(encoding.get_ids().iter().map(|t| *t as usize).collect())
    }

    fn decode(&self, tokens: &[usize]) -> Result<String> {
        let tokens = tokens.iter().map(|t| *t as u32).collect::<Vec<u32>>();
        self.tokenizer
            .decode(&tokens, true)
            .map_err(|err| PipelineError::Tokenization(err.to_string()))
    }

    fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    fn special_tokens(&self) -> SpecialTokens {
        self.special_tokens
    }
}

/// Fixed-length token ids and the matching attention mask (1 = real, 0 = pad).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    pub input_ids: Vec<usize>,
    pub attention_mask: Vec<u32>,
}

impl TokenizedText {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding positions.
    pub fn real_len(&self) -> usize {
        self.attention_mask.iter().filter(|m| **m == 1).count()
    }
}

/// A tokenized example; the label is carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub tokens: TokenizedText,
    pub label: usize,
}

/// Maps examples to fixed-length inputs of `max_length` tokens.
#[derive(Clone)]
pub struct TokenizationStage {
    tokenizer: Arc<dyn Tokenizer>,
    max_length: usize,
}

impl TokenizationStage {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, max_length: usize) -> Result<Self> {
        // [CLS] and [SEP] always take two positions
        if max_length < 2 {
            return Err(PipelineError::Tokenization(format!(
                "max_length {max_length} cannot hold [CLS] and [SEP]"
            )));
        }
        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Encodes, truncates and right-pads a single text.
    pub fn encode(&self, text: &str) -> Result<TokenizedText> {
        let special = self.tokenizer.special_tokens();
        let content = self.tokenizer.encode(text)?;
        let content_len = content.len().min(self.max_length - 2);

        let mut input_ids = Vec::with_capacity(self.max_length);
        input_ids.push(special.cls);
        input_ids.extend_from_slice(&content[..content_len]);
        input_ids.push(special.sep);

        let mut attention_mask = vec![1; input_ids.len()];
        input_ids.resize(self.max_length, special.pad);
        attention_mask.resize(self.max_length, 0);

        Ok(TokenizedText {
            input_ids,
            attention_mask,
        })
    }

    pub fn tokenize(&self, example: &Example) -> Result<TokenizedExample> {
        Ok(TokenizedExample {
            tokens: self.encode(&example.text)?,
            label: example.label,
        })
    }

    /// Tokenizes every example of a split, preserving order.
    pub fn tokenize_split(&self, dataset: &InMemDataset<Example>) -> Result<InMemDataset<TokenizedExample>> {
        let items = dataset
            .iter()
            .map(|example| self.tokenize(&example))
            .collect::<Result<Vec<_>>>()?;
        Ok(InMemDataset::new(items))
    }
}
