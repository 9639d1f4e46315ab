//! Model configuration
//!
//! A subset of the Hugging Face `config.json` schema. Field names follow the
//! BERT spelling; the spellings used by other families are accepted as
//! aliases when deserializing.

use serde::{Deserialize, Serialize};

use super::family::ModelFamily;

fn default_position_embedding_type() -> String {
    "absolute".to_string()
}

fn default_hidden_act() -> String {
    "gelu".to_string()
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// Architecture hyper-parameters shared by every family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Family identifier
    pub model_type: ModelFamily,

    /// Hidden (embedding) size
    #[serde(alias = "d_model", alias = "n_embd", alias = "dim")]
    pub hidden_size: usize,

    /// Attention heads per layer
    #[serde(
        alias = "encoder_attention_heads",
        alias = "n_head",
        alias = "n_heads",
        alias = "num_encoder_attention_heads"
    )]
    pub num_attention_heads: usize,

    /// Number of (encoder) layers
    #[serde(
        alias = "encoder_layers",
        alias = "n_layer",
        alias = "n_layers",
        alias = "num_encoder_layers"
    )]
    pub num_hidden_layers: usize,

    /// Feed-forward inner size
    #[serde(
        alias = "encoder_ffn_dim",
        alias = "ffn_dim",
        alias = "n_inner",
        alias = "hidden_dim"
    )]
    pub intermediate_size: usize,

    /// Feed-forward activation
    #[serde(
        default = "default_hidden_act",
        alias = "activation_function",
        alias = "activation"
    )]
    pub hidden_act: String,

    /// Layer norm epsilon
    #[serde(default = "default_layer_norm_eps", alias = "layer_norm_epsilon")]
    pub layer_norm_eps: f64,

    /// Vocabulary size
    #[serde(default)]
    pub vocab_size: usize,

    /// Maximum sequence length
    #[serde(default, alias = "n_positions", alias = "max_seq_length")]
    pub max_position_embeddings: usize,

    /// Position embedding scheme (`absolute`, `relative_key`, ...)
    #[serde(default = "default_position_embedding_type")]
    pub position_embedding_type: String,

    /// Token type vocabulary (BERT segment ids)
    #[serde(default)]
    pub type_vocab_size: usize,

    /// Decoder layers for encoder-decoder families
    #[serde(default)]
    pub decoder_layers: Option<usize>,

    /// Image side length for vision families
    #[serde(default)]
    pub image_size: Option<usize>,

    /// Patch side length for vision families
    #[serde(default)]
    pub patch_size: Option<usize>,

    /// Input channels for vision families
    #[serde(default)]
    pub num_channels: Option<usize>,
}

impl ModelConfig {
    /// Small configuration suitable for tests and benchmarks
    pub fn tiny(model_type: impl Into<ModelFamily>) -> Self {
        Self {
            model_type: model_type.into(),
            hidden_size: 32,
            num_attention_heads: 4,
            num_hidden_layers: 2,
            intermediate_size: 64,
            hidden_act: default_hidden_act(),
            layer_norm_eps: default_layer_norm_eps(),
            vocab_size: 128,
            max_position_embeddings: 64,
            position_embedding_type: default_position_embedding_type(),
            type_vocab_size: 2,
            decoder_layers: None,
            image_size: Some(32),
            patch_size: Some(8),
            num_channels: Some(3),
        }
    }

    /// `bert-base-uncased` dimensions
    pub fn bert_base() -> Self {
        Self {
            hidden_size: 768,
            num_attention_heads: 12,
            num_hidden_layers: 12,
            intermediate_size: 3072,
            vocab_size: 30522,
            max_position_embeddings: 512,
            image_size: None,
            patch_size: None,
            num_channels: None,
            ..Self::tiny(ModelFamily::Bert)
        }
    }

    /// Set the family
    pub fn with_family(mut self, family: impl Into<ModelFamily>) -> Self {
        self.model_type = family.into();
        self
    }

    /// Set the number of layers
    pub fn with_layers(mut self, layers: usize) -> Self {
        self.num_hidden_layers = layers;
        self
    }

    /// Set hidden size and heads
    pub fn with_attention(mut self, hidden_size: usize, heads: usize) -> Self {
        self.hidden_size = hidden_size;
        self.num_attention_heads = heads;
        self
    }

    /// Set the activation
    pub fn with_activation(mut self, act: impl Into<String>) -> Self {
        self.hidden_act = act.into();
        self
    }

    /// Set the position embedding scheme
    pub fn with_position_embedding(mut self, kind: impl Into<String>) -> Self {
        self.position_embedding_type = kind.into();
        self
    }

    /// Decoder depth, defaulting to the encoder depth
    pub fn decoder_depth(&self) -> usize {
        self.decoder_layers.unwrap_or(self.num_hidden_layers)
    }

    /// Width of one attention head, if the heads divide the hidden size
    pub fn head_dim(&self) -> Option<usize> {
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return None;
        }
        Some(self.hidden_size / self.num_attention_heads)
    }
}
