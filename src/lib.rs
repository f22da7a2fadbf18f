pub mod cli;
pub mod data_processing;
pub mod error;
pub mod inference;
pub mod metric;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod pretrained;
pub mod report;
pub mod training;

#[cfg(test)]
pub(crate) mod test_support;

pub use data_processing::{
    DatasetSource, Example, HuggingfaceSource, InMemorySource, PretrainedTokenizer, SentimentLabel,
    TokenizationStage, Tokenizer,
};
pub use error::{PipelineError, Result};
pub use inference::{Prediction, TextClassifier};
pub use metric::{Accuracy, Metric};
pub use pipeline::{run, run_with_metric, RunReport};
pub use pretrained::{HubSource, ModelSource, VocabularySource};
pub use training::{Trainer, TrainingConfig};
