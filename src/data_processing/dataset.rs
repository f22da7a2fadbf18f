// Labeled sentiment corpora and the sources they are loaded from. A source
// resolves a public dataset identifier into a train split and a test split of
// raw examples; subset sizing is applied afterwards from the run configuration.

use crate::error::{PipelineError, Result};
use burn::data::dataset::{
    source::huggingface::HuggingfaceDatasetLoader,
    transform::{PartialDataset, ShuffledDataset},
    Dataset, InMemDataset, SqliteDataset,
};
use derive_new::new;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{EnumCount as _, IntoEnumIterator};
use strum_macros::{EnumCount, EnumIter};

/// A raw (text, label) pair.
#[derive(new, Clone, Debug, PartialEq)]
pub struct Example {
    pub text: String,
    pub label: usize,
}

/// Row layout of a text classification dataset in the Hugging Face catalog
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextLabelItem {
    pub text: String,
    pub label: usize,
}

/// Binary sentiment classes, in label-id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter)]
pub enum SentimentLabel {
    Negative,
    Positive,
}

impl SentimentLabel {
    pub fn num_classes() -> usize {
        Self::COUNT
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Label string exposed by the classifier.
    pub fn name(self) -> &'static str {
        match self {
            SentimentLabel::Negative => "NEGATIVE",
            SentimentLabel::Positive => "POSITIVE",
        }
    }

    pub fn names() -> Vec<String> {
        Self::iter().map(|label| label.name().to_string()).collect()
    }
}

/// Train and test splits of one dataset.
pub struct DatasetSplits {
    pub train: InMemDataset<Example>,
    pub test: InMemDataset<Example>,
}

impl DatasetSplits {
    pub fn new(train: Vec<Example>, test: Vec<Example>) -> Self {
        Self {
            train: InMemDataset::new(train),
            test: InMemDataset::new(test),
        }
    }

    /// Keeps at most `train_size` / `eval_size` examples of each split. The
    /// subset is drawn after a seeded shuffle since catalog splits are often
    /// sorted by label. `None` keeps the whole split.
    pub fn select(self, train_size: Option<usize>, eval_size: Option<usize>, seed: u64) -> Self {
        Self {
            train: subset(self.train, train_size, seed),
            test: subset(self.test, eval_size, seed),
        }
    }

    /// Training and evaluation are undefined on empty splits.
    pub fn ensure_non_empty(&self) -> Result<()> {
        if self.train.is_empty() {
            return Err(PipelineError::EmptySplit { split: "train" });
        }
        if self.test.is_empty() {
            return Err(PipelineError::EmptySplit { split: "test" });
        }
        Ok(())
    }
}

fn subset(dataset: InMemDataset<Example>, size: Option<usize>, seed: u64) -> InMemDataset<Example> {
    match size {
        Some(size) if size < dataset.len() => {
            let shuffled: ShuffledDataset<_, Example> = ShuffledDataset::with_seed(dataset, seed);
            let partial: PartialDataset<_, Example> = PartialDataset::new(shuffled, 0, size);
            InMemDataset::new(partial.iter().collect())
        }
        _ => dataset,
    }
}

/// Lookup-by-name access to a catalog of labeled datasets.
pub trait DatasetSource {
    fn load(&self, name: &str) -> Result<DatasetSplits>;
}

/// Public datasets from the Hugging Face hub, cached locally as SQLite.
#[derive(Debug, Default, Clone, Copy)]
pub struct HuggingfaceSource;

impl HuggingfaceSource {
    fn split(name: &str, split: &str) -> Result<Vec<Example>> {
        let dataset: SqliteDataset<TextLabelItem> = HuggingfaceDatasetLoader::new(name)
            .dataset(split)
            .map_err(|err| PipelineError::DatasetUnavailable {
                name: name.to_string(),
                reason: format!("cannot import split '{split}': {err:?}"),
            })?;

        dataset
            .iter()
            .map(|item| {
                if item.label >= SentimentLabel::num_classes() {
                    return Err(PipelineError::DatasetUnavailable {
                        name: name.to_string(),
                        reason: format!("label {} is not a sentiment class", item.label),
                    });
                }
                Ok(Example::new(item.text, item.label))
            })
            .collect()
    }
}

impl DatasetSource for HuggingfaceSource {
    fn load(&self, name: &str) -> Result<DatasetSplits> {
        let train = Self::split(name, "train")?;
        let test = Self::split(name, "test")?;
        tracing::info!(
            "Loaded dataset '{}': {} train, {} test examples",
            name,
            train.len(),
            test.len()
        );
        Ok(DatasetSplits::new(train, test))
    }
}

/// Named datasets held in memory, for offline runs and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemorySource {
    catalog: HashMap<String, (Vec<Example>, Vec<Example>)>,
}

impl InMemorySource {
    pub fn with_dataset(mut self, name: impl Into<String>, train: Vec<Example>, test: Vec<Example>) -> Self {
        self.catalog.insert(name.into(), (train, test));
        self
    }
}

impl DatasetSource for InMemorySource {
    fn load(&self, name: &str) -> Result<DatasetSplits> {
        let (train, test) =
            self.catalog
                .get(name)
                .cloned()
                .ok_or_else(|| PipelineError::DatasetUnavailable {
                    name: name.to_string(),
                    reason: "not present in the in-memory catalog".to_string(),
                })?;
        Ok(DatasetSplits::new(train, test))
    }
}
