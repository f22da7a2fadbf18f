// BERT sequence classifier built with the Burn framework. The encoder mirrors
// the module layout of the Hugging Face BERT checkpoints (embeddings, a stack
// of post-norm encoder layers, a tanh pooler over [CLS]) so pretrained weights
// can be loaded into it; a freshly initialized linear head projects the pooled
// encoding onto the sentiment classes.

use crate::data_processing::{ClassificationInferenceBatch, ClassificationTrainingBatch};
use burn::{
    config::Config,
    module::Module,
    nn::{
        attention::{MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        loss::CrossEntropyLossConfig,
        Dropout, DropoutConfig, Embedding, EmbeddingConfig, LayerNorm, LayerNormConfig, Linear, LinearConfig,
        GELU,
    },
    tensor::backend::Backend,
    tensor::{activation::softmax, Bool, Int, Tensor},
    train::ClassificationOutput,
};

/// Encoder hyper-parameters, named after the fields of a BERT `config.json`.
/// Defaults are those of `bert-base-uncased`.
#[derive(Config)]
pub struct EncoderConfig {
    #[config(default = 768)]
    pub hidden_size: usize,
    #[config(default = 12)]
    pub num_hidden_layers: usize,
    #[config(default = 12)]
    pub num_attention_heads: usize,
    #[config(default = 3072)]
    pub intermediate_size: usize,
    #[config(default = 512)]
    pub max_position_embeddings: usize,
    #[config(default = 2)]
    pub type_vocab_size: usize,
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,
    #[config(default = 0.1)]
    pub hidden_dropout_prob: f64,
    #[config(default = 0.1)]
    pub attention_probs_dropout_prob: f64,
}

impl EncoderConfig {
    /// Initializes an encoder with random weights
    pub fn init<B: Backend>(&self, vocab_size: usize, device: &B::Device) -> BertModel<B> {
        let embeddings = Embeddings {
            word_embeddings: EmbeddingConfig::new(vocab_size, self.hidden_size).init(device),
            position_embeddings: EmbeddingConfig::new(self.max_position_embeddings, self.hidden_size).init(device),
            token_type_embeddings: EmbeddingConfig::new(self.type_vocab_size, self.hidden_size).init(device),
            layer_norm: self.layer_norm(device),
            dropout: DropoutConfig::new(self.hidden_dropout_prob).init(),
        };

        let layer = (0..self.num_hidden_layers)
            .map(|_| EncoderLayer {
                attention: Attention {
                    mha: MultiHeadAttentionConfig::new(self.hidden_size, self.num_attention_heads)
                        .with_dropout(self.attention_probs_dropout_prob)
                        .init(device),
                    layer_norm: self.layer_norm(device),
                    dropout: DropoutConfig::new(self.hidden_dropout_prob).init(),
                },
                intermediate: LinearConfig::new(self.hidden_size, self.intermediate_size).init(device),
                output: LinearConfig::new(self.intermediate_size, self.hidden_size).init(device),
                output_norm: self.layer_norm(device),
                dropout: DropoutConfig::new(self.hidden_dropout_prob).init(),
                activation: GELU::new(),
            })
            .collect();

        BertModel {
            embeddings,
            encoder: Encoder { layer },
            pooler: Pooler {
                dense: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            },
        }
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.hidden_size)
            .with_epsilon(self.layer_norm_eps)
            .init(device)
    }
}

#[derive(Module, Debug)]
pub struct Embeddings<B: Backend> {
    word_embeddings: Embedding<B>,
    position_embeddings: Embedding<B>,
    token_type_embeddings: Embedding<B>,
    layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> Embeddings<B> {
    pub fn forward(&self, tokens: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_length] = tokens.dims();
        let device = tokens.device();

        let positions = Tensor::<B, 1, Int>::arange(0..seq_length, &device)
            .reshape([1, seq_length])
            .repeat(0, batch_size);
        // single-segment inputs
        let token_types = Tensor::<B, 2, Int>::zeros([batch_size, seq_length], &device);

        let embedding = self.word_embeddings.forward(tokens)
            + self.position_embeddings.forward(positions)
            + self.token_type_embeddings.forward(token_types);

        self.dropout.forward(self.layer_norm.forward(embedding))
    }
}

#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    mha: MultiHeadAttention<B>,
    layer_norm: LayerNorm<B>,
    dropout: Dropout,
}

impl<B: Backend> Attention<B> {
    pub fn forward(&self, input: Tensor<B, 3>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let context = self
            .mha
            .forward(MhaInput::self_attn(input.clone()).mask_pad(mask_pad))
            .context;
        self.layer_norm.forward(input + self.dropout.forward(context))
    }
}

#[derive(Module, Debug)]
pub struct EncoderLayer<B: Backend> {
    attention: Attention<B>,
    intermediate: Linear<B>,
    output: Linear<B>,
    output_norm: LayerNorm<B>,
    dropout: Dropout,
    activation: GELU,
}

impl<B: Backend> EncoderLayer<B> {
    pub fn forward(&self, input: Tensor<B, 3>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 3> {
        let attended = self.attention.forward(input, mask_pad);
        let hidden = self.activation.forward(self.intermediate.forward(attended.clone()));
        let output = self.dropout.forward(self.output.forward(hidden));
        self.output_norm.forward(attended + output)
    }
}

#[derive(Module, Debug)]
pub struct Encoder<B: Backend> {
    layer: Vec<EncoderLayer<B>>,
}

#[derive(Module, Debug)]
pub struct Pooler<B: Backend> {
    dense: Linear<B>,
}

impl<B: Backend> Pooler<B> {
    /// Dense + tanh over the first ([CLS]) position.
    pub fn forward(&self, hidden: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch_size, _, hidden_size] = hidden.dims();
        let first = hidden
            .slice([0..batch_size, 0..1])
            .reshape([batch_size, hidden_size]);
        self.dense.forward(first).tanh()
    }
}

/// The pretrained part of the classifier.
#[derive(Module, Debug)]
pub struct BertModel<B: Backend> {
    embeddings: Embeddings<B>,
    encoder: Encoder<B>,
    pooler: Pooler<B>,
}

impl<B: Backend> BertModel<B> {
    /// Pooled [CLS] encoding of each sequence.
    pub fn forward(&self, tokens: Tensor<B, 2, Int>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
        let mut hidden = self.embeddings.forward(tokens);
        for layer in &self.encoder.layer {
            hidden = layer.forward(hidden, mask_pad.clone());
        }
        self.pooler.forward(hidden)
    }
}

/// Architecture of the classifier; persisted next to the weights so a model
/// can be rebuilt before its record is loaded.
#[derive(Config)]
pub struct SentimentClassifierConfig {
    pub encoder: EncoderConfig,
    pub n_classes: usize,
    pub vocab_size: usize,
    /// Sequence length the classifier was trained with
    pub max_seq_length: usize,
}

impl SentimentClassifierConfig {
    /// Initializes the model with random weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> SentimentClassifier<B> {
        self.init_with_encoder(self.encoder.init(self.vocab_size, device), device)
    }

    /// Puts a freshly initialized classification head on top of `bert`.
    pub fn init_with_encoder<B: Backend>(&self, bert: BertModel<B>, device: &B::Device) -> SentimentClassifier<B> {
        SentimentClassifier {
            bert,
            dropout: DropoutConfig::new(self.encoder.hidden_dropout_prob).init(),
            classifier: LinearConfig::new(self.encoder.hidden_size, self.n_classes).init(device),
            n_classes: self.n_classes,
            max_seq_length: self.max_seq_length,
        }
    }
}

#[derive(Module, Debug)]
pub struct SentimentClassifier<B: Backend> {
    bert: BertModel<B>,
    dropout: Dropout,
    classifier: Linear<B>,
    n_classes: usize,
    max_seq_length: usize,
}

impl<B: Backend> SentimentClassifier<B> {
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Forward pass with cross-entropy loss, used for training and evaluation.
    pub fn forward(&self, item: ClassificationTrainingBatch<B>) -> ClassificationOutput<B> {
        let device = &self.classifier.devices()[0];
        let labels = item.labels.to_device(device);

        let output = self.logits(item.tokens, item.mask_pad);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), labels.clone());

        ClassificationOutput {
            loss,
            output,
            targets: labels,
        }
    }

    /// Class probabilities for each item of the batch.
    pub fn infer(&self, item: ClassificationInferenceBatch<B>) -> Tensor<B, 2> {
        softmax(self.logits(item.tokens, item.mask_pad), 1)
    }

    fn logits(&self, tokens: Tensor<B, 2, Int>, mask_pad: Tensor<B, 2, Bool>) -> Tensor<B, 2> {
        let device = &self.classifier.devices()[0];
        let pooled = self
            .bert
            .forward(tokens.to_device(device), mask_pad.to_device(device));
        self.classifier.forward(self.dropout.forward(pooled))
    }
}

#[cfg(test)]
impl<B: Backend> SentimentClassifier<B> {
    /// Replaces the head with one whose weights are all `value`.
    pub(crate) fn with_constant_head(mut self, value: f64) -> Self {
        let device = &self.classifier.devices()[0];
        let [d_input, d_output] = self.classifier.weight.dims();
        self.classifier = LinearConfig::new(d_input, d_output)
            .with_initializer(burn::nn::Initializer::Constant { value })
            .init(device);
        self
    }
}
