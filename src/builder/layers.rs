//! Layer constructors shared by the architectures
//!
//! Each function builds one original layer with the submodule names of the
//! reference implementation, so registry layouts resolve against it.

use ndarray::{ArrayD, IxDyn};

use crate::model::ModelConfig;
use crate::module::{LayerKind, Module};
use crate::tensor::Initializer;

const DROPOUT: f32 = 0.1;

fn linear(init: &mut Initializer, in_features: usize, out_features: usize) -> Module {
    Module::linear(init, in_features, out_features, true)
}

fn norm(init: &mut Initializer, config: &ModelConfig) -> Module {
    Module::layer_norm(init, config.hidden_size, config.layer_norm_eps)
}

fn act(config: &ModelConfig) -> Module {
    Module::activation(config.hidden_act.clone())
}

/// `[1, len]` buffer holding `0..len`
pub fn position_ids(init: &mut Initializer, len: usize) -> crate::tensor::Tensor {
    init.buffer(ArrayD::from_shape_fn(IxDyn(&[1, len]), |ix| ix[1] as f32))
}

/// Lower-triangular `[1, 1, len, len]` causal buffer
pub fn causal_buffer(init: &mut Initializer, len: usize) -> crate::tensor::Tensor {
    init.buffer(ArrayD::from_shape_fn(IxDyn(&[1, 1, len, len]), |ix| {
        if ix[3] <= ix[2] {
            1.0
        } else {
            0.0
        }
    }))
}

/// Scalar buffer
pub fn scalar_buffer(init: &mut Initializer, value: f32) -> crate::tensor::Tensor {
    init.buffer(ArrayD::from_elem(IxDyn(&[]), value))
}

// ============================================================================
// Encoder layers
// ============================================================================

/// BERT-style encoder layer (`BertLayer`, `RobertaLayer`, ...)
pub fn bert_layer(init: &mut Initializer, config: &ModelConfig, kind: LayerKind) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    let self_attention = Module::block("BertSelfAttention")
        .with_child("query", linear(init, h, h))
        .with_child("key", linear(init, h, h))
        .with_child("value", linear(init, h, h))
        .with_child("dropout", Module::dropout(DROPOUT));
    let self_output = Module::block("BertSelfOutput")
        .with_child("dense", linear(init, h, h))
        .with_child("LayerNorm", norm(init, config))
        .with_child("dropout", Module::dropout(DROPOUT));

    Module::layer(kind)
        .with_child(
            "attention",
            Module::block("BertAttention")
                .with_child("self", self_attention)
                .with_child("output", self_output),
        )
        .with_child(
            "intermediate",
            Module::block("BertIntermediate")
                .with_child("dense", linear(init, h, i))
                .with_child("intermediate_act_fn", act(config)),
        )
        .with_child(
            "output",
            Module::block("BertOutput")
                .with_child("dense", linear(init, i, h))
                .with_child("LayerNorm", norm(init, config))
                .with_child("dropout", Module::dropout(DROPOUT)),
        )
}

/// `AlbertLayer`
pub fn albert_layer(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::layer(LayerKind::AlbertLayer)
        .with_child("full_layer_layer_norm", norm(init, config))
        .with_child(
            "attention",
            Module::block("AlbertAttention")
                .with_child("query", linear(init, h, h))
                .with_child("key", linear(init, h, h))
                .with_child("value", linear(init, h, h))
                .with_child("attention_dropout", Module::dropout(DROPOUT))
                .with_child("output_dropout", Module::dropout(DROPOUT))
                .with_child("dense", linear(init, h, h))
                .with_child("LayerNorm", norm(init, config)),
        )
        .with_child("ffn", linear(init, h, i))
        .with_child("ffn_output", linear(init, i, h))
        .with_child("activation", act(config))
        .with_child("dropout", Module::dropout(DROPOUT))
}

/// ViT-style encoder layer (`ViTLayer`, `DeiTLayer`, ...)
pub fn vit_layer(init: &mut Initializer, config: &ModelConfig, kind: LayerKind) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::layer(kind)
        .with_child(
            "attention",
            Module::block("ViTAttention")
                .with_child(
                    "attention",
                    Module::block("ViTSelfAttention")
                        .with_child("query", linear(init, h, h))
                        .with_child("key", linear(init, h, h))
                        .with_child("value", linear(init, h, h))
                        .with_child("dropout", Module::dropout(DROPOUT)),
                )
                .with_child(
                    "output",
                    Module::block("ViTSelfOutput")
                        .with_child("dense", linear(init, h, h))
                        .with_child("dropout", Module::dropout(DROPOUT)),
                ),
        )
        .with_child(
            "intermediate",
            Module::block("ViTIntermediate")
                .with_child("dense", linear(init, h, i))
                .with_child("intermediate_act_fn", act(config)),
        )
        .with_child(
            "output",
            Module::block("ViTOutput")
                .with_child("dense", linear(init, i, h))
                .with_child("dropout", Module::dropout(DROPOUT)),
        )
        .with_child("layernorm_before", norm(init, config))
        .with_child("layernorm_after", norm(init, config))
}

/// `TransformerBlock` of DistilBERT
pub fn distilbert_block(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::layer(LayerKind::DistilBertBlock)
        .with_child(
            "attention",
            Module::block("MultiHeadSelfAttention")
                .with_child("dropout", Module::dropout(DROPOUT))
                .with_child("q_lin", linear(init, h, h))
                .with_child("k_lin", linear(init, h, h))
                .with_child("v_lin", linear(init, h, h))
                .with_child("out_lin", linear(init, h, h)),
        )
        .with_child("sa_layer_norm", norm(init, config))
        .with_child(
            "ffn",
            Module::block("FFN")
                .with_child("dropout", Module::dropout(DROPOUT))
                .with_child("lin1", linear(init, h, i))
                .with_child("lin2", linear(init, i, h))
                .with_child("activation", act(config)),
        )
        .with_child("output_layer_norm", norm(init, config))
}

/// `CLIPEncoderLayer`
pub fn clip_layer(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::layer(LayerKind::ClipEncoderLayer)
        .with_child(
            "self_attn",
            Module::block("CLIPAttention")
                .with_child("k_proj", linear(init, h, h))
                .with_child("v_proj", linear(init, h, h))
                .with_child("q_proj", linear(init, h, h))
                .with_child("out_proj", linear(init, h, h)),
        )
        .with_child("layer_norm1", norm(init, config))
        .with_child(
            "mlp",
            Module::block("CLIPMLP")
                .with_child("activation_fn", act(config))
                .with_child("fc1", linear(init, h, i))
                .with_child("fc2", linear(init, i, h)),
        )
        .with_child("layer_norm2", norm(init, config))
}

/// `Wav2Vec2EncoderLayer` and its Hubert / stable-layer-norm variants
pub fn wav2vec2_layer(init: &mut Initializer, config: &ModelConfig, kind: LayerKind) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::layer(kind)
        .with_child(
            "attention",
            Module::block("Wav2Vec2Attention")
                .with_child("k_proj", linear(init, h, h))
                .with_child("v_proj", linear(init, h, h))
                .with_child("q_proj", linear(init, h, h))
                .with_child("out_proj", linear(init, h, h)),
        )
        .with_child("dropout", Module::dropout(DROPOUT))
        .with_child("layer_norm", norm(init, config))
        .with_child(
            "feed_forward",
            Module::block("Wav2Vec2FeedForward")
                .with_child("intermediate_dropout", Module::dropout(DROPOUT))
                .with_child("intermediate_dense", linear(init, h, i))
                .with_child("intermediate_act_fn", act(config))
                .with_child("output_dense", linear(init, i, h))
                .with_child("output_dropout", Module::dropout(DROPOUT)),
        )
        .with_child("final_layer_norm", norm(init, config))
}

// ============================================================================
// Attention layers and decoder blocks
// ============================================================================

/// Sequence-to-sequence attention (`BartAttention`, `OPTAttention`, ...)
pub fn seq2seq_attention(init: &mut Initializer, config: &ModelConfig, kind: LayerKind) -> Module {
    let h = config.hidden_size;
    Module::layer(kind)
        .with_child("k_proj", linear(init, h, h))
        .with_child("v_proj", linear(init, h, h))
        .with_child("q_proj", linear(init, h, h))
        .with_child("out_proj", linear(init, h, h))
}

/// `BartEncoderLayer`
pub fn bart_encoder_layer(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::layer(LayerKind::BartEncoderLayer)
        .with_child(
            "self_attn",
            seq2seq_attention(init, config, LayerKind::BartAttention),
        )
        .with_child("self_attn_layer_norm", norm(init, config))
        .with_child("activation_fn", act(config))
        .with_child("fc1", linear(init, h, i))
        .with_child("fc2", linear(init, i, h))
        .with_child("final_layer_norm", norm(init, config))
}

/// `BartDecoderLayer`
pub fn bart_decoder_layer(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::block("BartDecoderLayer")
        .with_child(
            "self_attn",
            seq2seq_attention(init, config, LayerKind::BartAttention),
        )
        .with_child("activation_fn", act(config))
        .with_child("self_attn_layer_norm", norm(init, config))
        .with_child(
            "encoder_attn",
            seq2seq_attention(init, config, LayerKind::BartAttention),
        )
        .with_child("encoder_attn_layer_norm", norm(init, config))
        .with_child("fc1", linear(init, h, i))
        .with_child("fc2", linear(init, i, h))
        .with_child("final_layer_norm", norm(init, config))
}

/// `OPTDecoderLayer`
pub fn opt_decoder_layer(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::block("OPTDecoderLayer")
        .with_child(
            "self_attn",
            seq2seq_attention(init, config, LayerKind::OptAttention),
        )
        .with_child("activation_fn", act(config))
        .with_child("self_attn_layer_norm", norm(init, config))
        .with_child("fc1", linear(init, h, i))
        .with_child("fc2", linear(init, i, h))
        .with_child("final_layer_norm", norm(init, config))
}

/// `GPT2Attention`
pub fn gpt2_attention(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    Module::layer(LayerKind::Gpt2Attention)
        .with_buffer("bias", causal_buffer(init, config.max_position_embeddings))
        .with_buffer("masked_bias", scalar_buffer(init, -1e4))
        .with_child("c_attn", Module::conv1d(init, h, 3 * h))
        .with_child("c_proj", Module::conv1d(init, h, h))
        .with_child("attn_dropout", Module::dropout(DROPOUT))
        .with_child("resid_dropout", Module::dropout(DROPOUT))
}

/// `GPT2Block`
pub fn gpt2_block(init: &mut Initializer, config: &ModelConfig) -> Module {
    let h = config.hidden_size;
    let i = config.intermediate_size;

    Module::block("GPT2Block")
        .with_child("ln_1", norm(init, config))
        .with_child("attn", gpt2_attention(init, config))
        .with_child("ln_2", norm(init, config))
        .with_child(
            "mlp",
            Module::block("GPT2MLP")
                .with_child("c_fc", Module::conv1d(init, h, i))
                .with_child("c_proj", Module::conv1d(init, i, h))
                .with_child("act", act(config))
                .with_child("dropout", Module::dropout(DROPOUT)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bert_layer_paths() {
        let config = ModelConfig::tiny("bert");
        let layer = bert_layer(&mut Initializer::default(), &config, LayerKind::BertLayer);
        assert_eq!(layer.class_name(), "BertLayer");
        assert!(layer.has_tensor("attention.self.query.weight"));
        assert!(layer.has_tensor("output.LayerNorm.bias"));
        assert_eq!(layer.tensor("intermediate.dense.weight").unwrap().shape(), &[64, 32]);
    }

    #[test]
    fn test_gpt2_buffers() {
        let config = ModelConfig::tiny("gpt2");
        let attn = gpt2_attention(&mut Initializer::default(), &config);
        let bias = attn.buffer("bias").unwrap().data().unwrap();
        assert_eq!(bias.shape(), &[1, 1, 64, 64]);
        assert_eq!(bias[[0, 0, 3, 2]], 1.0);
        assert_eq!(bias[[0, 0, 2, 3]], 0.0);
        assert!(attn.buffer("masked_bias").unwrap().shape().is_empty());
    }

    #[test]
    fn test_placeholder_buffers() {
        let config = ModelConfig::tiny("gpt2");
        let attn = gpt2_attention(&mut Initializer::placeholder(), &config);
        assert!(attn.buffer("bias").unwrap().is_placeholder());
    }

    #[test]
    fn test_position_ids() {
        let ids = position_ids(&mut Initializer::default(), 4);
        let data: Vec<f32> = ids.data().unwrap().iter().copied().collect();
        assert_eq!(data, vec![0.0, 1.0, 2.0, 3.0]);
    }
}
