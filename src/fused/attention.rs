//! Fused attention layers
//!
//! Attention blocks of decoder families keep their projections, dropouts and
//! buffers unchanged; only the attention computation is swapped. The fused
//! node owns the original's children and buffers under the same names.

use tracing::trace;

use crate::error::{TransformError, TransformResult};
use crate::model::ModelConfig;
use crate::module::{LayerKind, Module};

use super::{FusedKind, FusedLayer, ParamSource};

/// Submodules and buffers an attention block must have
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttentionLayout {
    /// Required child modules
    pub submodules: &'static [&'static str],
    /// Required buffers
    pub buffers: &'static [&'static str],
}

const SEQ2SEQ: AttentionLayout = AttentionLayout {
    submodules: &["k_proj", "v_proj", "q_proj", "out_proj"],
    buffers: &[],
};

impl AttentionLayout {
    /// Layout of an original attention class
    pub fn of(kind: LayerKind) -> Option<Self> {
        use LayerKind::*;
        let layout = match kind {
            BartAttention | BlenderbotAttention | M2M100Attention | MarianAttention
            | PegasusAttention | OptAttention => SEQ2SEQ,
            Gpt2Attention => AttentionLayout {
                submodules: &["c_attn", "c_proj", "attn_dropout", "resid_dropout"],
                buffers: &["bias", "masked_bias"],
            },
            GptjAttention | GptNeoSelfAttention => AttentionLayout {
                submodules: &["k_proj", "v_proj", "q_proj", "out_proj", "attn_dropout", "resid_dropout"],
                buffers: &["bias", "masked_bias"],
            },
            GptNeoXAttention => AttentionLayout {
                submodules: &["rotary_emb", "query_key_value", "dense"],
                buffers: &["bias", "masked_bias"],
            },
            CodeGenAttention => AttentionLayout {
                submodules: &["qkv_proj", "out_proj", "attn_dropout", "resid_dropout"],
                buffers: &["causal_mask", "masked_bias"],
            },
            T5Attention => AttentionLayout {
                submodules: &["q", "k", "v", "o"],
                buffers: &[],
            },
            BloomAttention => AttentionLayout {
                submodules: &["query_key_value", "dense", "attention_dropout"],
                buffers: &[],
            },
            BarkSelfAttention => AttentionLayout {
                submodules: &["att_proj", "out_proj", "attn_dropout", "resid_dropout"],
                buffers: &[],
            },
            _ => return None,
        };
        Some(layout)
    }
}

/// Build the fused attention node wrapping `original`
pub(crate) fn build(
    kind: FusedKind,
    layer_kind: LayerKind,
    original: &Module,
    config: &ModelConfig,
) -> TransformResult<Module> {
    let layout = AttentionLayout::of(layer_kind).ok_or_else(|| {
        TransformError::InvalidLayer(format!("{layer_kind} has no fused attention layout"))
    })?;

    for name in layout.submodules {
        if original.child(name).is_none() {
            return Err(TransformError::InvalidLayer(format!(
                "{layer_kind} is missing submodule '{name}'"
            )));
        }
    }
    for name in layout.buffers {
        if original.buffer(name).is_none() {
            return Err(TransformError::InvalidLayer(format!(
                "{layer_kind} is missing buffer '{name}'"
            )));
        }
    }

    let mut layer = FusedLayer::new(kind, layer_kind, config);
    layer.training = original.is_training();

    for (name, _) in original.parameters() {
        layer.record(name, ParamSource::Single(name.to_string()));
    }
    for (name, _) in original.buffers() {
        layer.record(name, ParamSource::Buffer(name.to_string()));
    }
    for (name, _) in original.children() {
        layer.record(name, ParamSource::Submodule(name.to_string()));
    }

    let mut node = Module::fused(layer);
    node.training = original.is_training();
    node.parameters = original.parameters.clone();
    node.buffers = original.buffers.clone();
    node.children = original.children.clone();

    trace!(
        original = %layer_kind,
        fused = %kind,
        submodules = node.len(),
        "wrapped attention layer"
    );
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::layers;
    use crate::tensor::Initializer;

    #[test]
    fn test_layout_lookup() {
        assert_eq!(AttentionLayout::of(LayerKind::OptAttention), Some(SEQ2SEQ));
        assert!(AttentionLayout::of(LayerKind::Gpt2Attention)
            .unwrap()
            .buffers
            .contains(&"masked_bias"));
        assert_eq!(AttentionLayout::of(LayerKind::BertLayer), None);
    }

    #[test]
    fn test_wrap_and_revert_gpt2() {
        let config = ModelConfig::tiny("gpt2");
        let mut init = Initializer::seeded(9);
        let original = layers::gpt2_attention(&mut init, &config);
        let node = FusedKind::Gpt2Attention.build(&original, &config, false).unwrap();

        assert_eq!(node.class_name(), "GPT2AttentionLayerBetterTransformer");
        assert!(node.child("c_attn").is_some());
        assert!(node.buffer("bias").is_some());

        let template = layers::gpt2_attention(&mut Initializer::placeholder(), &config);
        let restored = node.revert_fused(template).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_missing_submodule() {
        let config = ModelConfig::tiny("opt");
        let original = Module::layer(LayerKind::OptAttention);
        let err = FusedKind::OptAttention.build(&original, &config, false).unwrap_err();
        assert!(err.to_string().contains("k_proj"));
    }
}
