use crate::data_processing::{Example, PretrainedTokenizer};
use crate::model::{EncoderConfig, SentimentClassifierConfig};
use crate::training::{IntervalStrategy, TrainingConfig};
use burn::backend::{Autodiff, NdArray};

pub type InferenceBackend = NdArray;
pub type TestBackend = Autodiff<InferenceBackend>;

const POSITIVE: [&str; 5] = ["great", "amazing", "love", "wonderful", "brilliant"];
const NEGATIVE: [&str; 5] = ["awful", "terrible", "boring", "hate", "dreadful"];
const FILLER: [&str; 12] = [
    "the", "movie", "was", "a", "with", "and", "ending", "acting", "this", "it", "i", "plot",
];

pub fn word_level_tokenizer() -> PretrainedTokenizer {
    let words: Vec<&str> = POSITIVE.iter().chain(&NEGATIVE).chain(&FILLER).copied().collect();
    PretrainedTokenizer::word_level(&words).unwrap()
}

/// Deterministic labeled reviews; labels alternate starting at `offset % 2`.
pub fn reviews(count: usize, offset: usize) -> Vec<Example> {
    (0..count)
        .map(|i| {
            let label = (i + offset) % 2;
            let words = if label == 1 { &POSITIVE } else { &NEGATIVE };
            let text = format!(
                "the movie was {} and the {} was {}",
                words[i % words.len()],
                FILLER[(i + 6) % FILLER.len()],
                words[(i + 2) % words.len()],
            );
            Example::new(text, label)
        })
        .collect()
}

pub fn tiny_model_config(vocab_size: usize, max_seq_length: usize) -> SentimentClassifierConfig {
    SentimentClassifierConfig::new(tiny_encoder(), 2, vocab_size, max_seq_length)
}

pub fn tiny_training_config() -> TrainingConfig {
    TrainingConfig::new()
        .with_encoder(tiny_encoder())
        .with_max_length(16)
        .with_train_batch_size(4)
        .with_eval_batch_size(4)
        .with_num_epochs(1)
        .with_learning_rate(1e-3)
        .with_train_subset(None)
        .with_eval_subset(None)
        .with_save_strategy(IntervalStrategy::No)
}

pub fn tiny_encoder() -> EncoderConfig {
    EncoderConfig::new()
        .with_hidden_size(16)
        .with_num_hidden_layers(1)
        .with_num_attention_heads(2)
        .with_intermediate_size(32)
        .with_max_position_embeddings(32)
}
