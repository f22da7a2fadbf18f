// Stacks tokenized examples into tensors. Sequences are already padded to a
// fixed length by the tokenization stage, so a batch is a [batch, max_length]
// id tensor and a padding mask derived from the attention mask (burn expects
// `true` at padded positions).

use super::tokenizer::{TokenizedExample, TokenizedText};
use burn::{
    data::dataloader::batcher::Batcher,
    tensor::{backend::Backend, Bool, Data, ElementConversion, Int, Shape, Tensor},
};
use derive_new::new;

/// Builds training and inference batches on a device.
#[derive(Clone, new)]
pub struct ClassificationBatcher<B: Backend> {
    device: B::Device,
}

/// Batch used for training and evaluation
#[derive(Debug, Clone, new)]
pub struct ClassificationTrainingBatch<B: Backend> {
    pub tokens: Tensor<B, 2, Int>,
    pub labels: Tensor<B, 1, Int>,
    pub mask_pad: Tensor<B, 2, Bool>,
}

/// Batch used for inference
#[derive(Debug, Clone, new)]
pub struct ClassificationInferenceBatch<B: Backend> {
    pub tokens: Tensor<B, 2, Int>,
    pub mask_pad: Tensor<B, 2, Bool>,
}

impl<B: Backend> ClassificationBatcher<B> {
    fn stack<'a>(&self, texts: impl ExactSizeIterator<Item = &'a TokenizedText>) -> (Tensor<B, 2, Int>, Tensor<B, 2, Bool>) {
        let batch_size = texts.len();
        let mut seq_length = 0;
        let mut ids = Vec::new();
        let mut mask = Vec::new();

        for text in texts {
            seq_length = text.len();
            ids.extend(text.input_ids.iter().map(|id| (*id as i64).elem::<B::IntElem>()));
            mask.extend(text.attention_mask.iter().map(|m| (*m as i64).elem::<B::IntElem>()));
        }

        let shape = Shape::new([batch_size, seq_length]);
        let tokens = Tensor::from_data(Data::new(ids, shape.clone()), &self.device);
        let mask_pad = Tensor::<B, 2, Int>::from_data(Data::new(mask, shape), &self.device).equal_elem(0);

        (tokens, mask_pad)
    }
}

impl<B: Backend> Batcher<TokenizedExample, ClassificationTrainingBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<TokenizedExample>) -> ClassificationTrainingBatch<B> {
        let (tokens, mask_pad) = self.stack(items.iter().map(|item| &item.tokens));

        let labels = items
            .iter()
            .map(|item| (item.label as i64).elem::<B::IntElem>())
            .collect::<Vec<_>>();
        let labels = Tensor::from_data(Data::new(labels, Shape::new([items.len()])), &self.device);

        ClassificationTrainingBatch {
            tokens,
            labels,
            mask_pad,
        }
    }
}

impl<B: Backend> Batcher<TokenizedText, ClassificationInferenceBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<TokenizedText>) -> ClassificationInferenceBatch<B> {
        let (tokens, mask_pad) = self.stack(items.iter());
        ClassificationInferenceBatch { tokens, mask_pad }
    }
}
