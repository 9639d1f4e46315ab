//! Fused encoder layers
//!
//! Every supported encoder block is described by an [`EncoderLayout`]: the
//! relative paths of its query, key, value, output, feed-forward and norm
//! submodules. Building a fused layer stacks q/k/v into `in_proj_*` and copies
//! the rest under their fused names.

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::error::{TransformError, TransformResult};
use crate::model::ModelConfig;
use crate::module::{join_path, LayerKind, Module};
use crate::tensor::{concat_rows, Tensor};

use super::validate::validate_encoder;
use super::{FusedKind, FusedLayer, ParamSource};

/// Submodule paths of an encoder block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderLayout {
    /// Query projection
    pub query: &'static str,
    /// Key projection
    pub key: &'static str,
    /// Value projection
    pub value: &'static str,
    /// Attention output projection
    pub out_proj: &'static str,
    /// First feed-forward projection
    pub linear1: &'static str,
    /// Second feed-forward projection
    pub linear2: &'static str,
    /// Norm applied around attention
    pub norm1: &'static str,
    /// Norm applied around the feed-forward
    pub norm2: &'static str,
    /// Pre-norm block
    pub norm_first: bool,
}

const BERT: EncoderLayout = EncoderLayout {
    query: "attention.self.query",
    key: "attention.self.key",
    value: "attention.self.value",
    out_proj: "attention.output.dense",
    linear1: "intermediate.dense",
    linear2: "output.dense",
    norm1: "attention.output.LayerNorm",
    norm2: "output.LayerNorm",
    norm_first: false,
};

const ALBERT: EncoderLayout = EncoderLayout {
    query: "attention.query",
    key: "attention.key",
    value: "attention.value",
    out_proj: "attention.dense",
    linear1: "ffn",
    linear2: "ffn_output",
    norm1: "attention.LayerNorm",
    norm2: "full_layer_layer_norm",
    norm_first: false,
};

const BART: EncoderLayout = EncoderLayout {
    query: "self_attn.q_proj",
    key: "self_attn.k_proj",
    value: "self_attn.v_proj",
    out_proj: "self_attn.out_proj",
    linear1: "fc1",
    linear2: "fc2",
    norm1: "self_attn_layer_norm",
    norm2: "final_layer_norm",
    norm_first: false,
};

const MBART: EncoderLayout = EncoderLayout {
    norm_first: true,
    ..BART
};

const VIT: EncoderLayout = EncoderLayout {
    query: "attention.attention.query",
    key: "attention.attention.key",
    value: "attention.attention.value",
    out_proj: "attention.output.dense",
    linear1: "intermediate.dense",
    linear2: "output.dense",
    norm1: "layernorm_before",
    norm2: "layernorm_after",
    norm_first: true,
};

const DISTILBERT: EncoderLayout = EncoderLayout {
    query: "attention.q_lin",
    key: "attention.k_lin",
    value: "attention.v_lin",
    out_proj: "attention.out_lin",
    linear1: "ffn.lin1",
    linear2: "ffn.lin2",
    norm1: "sa_layer_norm",
    norm2: "output_layer_norm",
    norm_first: false,
};

const WAV2VEC2: EncoderLayout = EncoderLayout {
    query: "attention.q_proj",
    key: "attention.k_proj",
    value: "attention.v_proj",
    out_proj: "attention.out_proj",
    linear1: "feed_forward.intermediate_dense",
    linear2: "feed_forward.output_dense",
    norm1: "layer_norm",
    norm2: "final_layer_norm",
    norm_first: false,
};

const WAV2VEC2_STABLE: EncoderLayout = EncoderLayout {
    norm_first: true,
    ..WAV2VEC2
};

const PROPHETNET: EncoderLayout = EncoderLayout {
    query: "self_attn.query_proj",
    key: "self_attn.key_proj",
    value: "self_attn.value_proj",
    out_proj: "self_attn.out_proj",
    linear1: "feed_forward.intermediate",
    linear2: "feed_forward.output",
    norm1: "self_attn_layer_norm",
    norm2: "feed_forward_layer_norm",
    norm_first: false,
};

const CLIP: EncoderLayout = EncoderLayout {
    query: "self_attn.q_proj",
    key: "self_attn.k_proj",
    value: "self_attn.v_proj",
    out_proj: "self_attn.out_proj",
    linear1: "mlp.fc1",
    linear2: "mlp.fc2",
    norm1: "layer_norm1",
    norm2: "layer_norm2",
    norm_first: true,
};

impl EncoderLayout {
    /// Layout of an original encoder class
    pub fn of(kind: LayerKind) -> Option<Self> {
        use LayerKind::*;
        let layout = match kind {
            BertLayer | BertGenerationLayer | CamembertLayer | Data2VecTextLayer | ElectraLayer
            | ErnieLayer | LayoutLmLayer | MarkupLmLayer | RemBertLayer | RobertaLayer
            | RoCBertLayer | RoFormerLayer | SplinterLayer | TapasLayer | XlmRobertaLayer => BERT,
            AlbertLayer => ALBERT,
            BartEncoderLayer | MarianEncoderLayer | FsmtEncoderLayer => BART,
            MBartEncoderLayer | M2M100EncoderLayer => MBART,
            ViTLayer | DeiTLayer | ViTMaeLayer | ViTMsnLayer | YolosLayer | ViltLayer => VIT,
            DistilBertBlock => DISTILBERT,
            Wav2Vec2EncoderLayer | HubertEncoderLayer => WAV2VEC2,
            Wav2Vec2EncoderLayerStableLayerNorm => WAV2VEC2_STABLE,
            ProphetNetEncoderLayer => PROPHETNET,
            ClipEncoderLayer => CLIP,
            _ => return None,
        };
        Some(layout)
    }
}

/// Collects fused tensors and their sources while building one layer
struct Packer<'a> {
    original: &'a Module,
    layer: FusedLayer,
    tensors: Vec<(String, Tensor)>,
    used: FxHashSet<String>,
}

impl<'a> Packer<'a> {
    fn tensor(&self, path: &str) -> Option<&'a Tensor> {
        self.original.tensor(path)
    }

    /// `{fused}_weight` / `{fused}_bias` stacked from several projections
    fn stack(&mut self, fused: &str, sources: &[&str]) -> TransformResult<()> {
        for suffix in ["weight", "bias"] {
            let paths: Vec<String> = sources.iter().map(|s| join_path(s, suffix)).collect();
            let found: Vec<&Tensor> = paths.iter().filter_map(|p| self.tensor(p)).collect();

            if found.is_empty() && suffix == "bias" {
                continue;
            }
            if found.len() != paths.len() {
                return Err(TransformError::InvalidLayer(format!(
                    "{}: expected all of {paths:?} to be present",
                    self.original.class_name()
                )));
            }

            let name = format!("{fused}_{suffix}");
            self.tensors.push((name.clone(), concat_rows(&found)?));
            self.used.extend(paths.iter().cloned());
            self.layer.record(name, ParamSource::Stacked(paths));
        }
        Ok(())
    }

    /// `{fused}_weight` / `{fused}_bias` copied from one submodule
    fn copy(&mut self, fused: &str, source: &str) -> TransformResult<()> {
        for suffix in ["weight", "bias"] {
            let path = join_path(source, suffix);
            let Some(tensor) = self.tensor(&path) else {
                if suffix == "weight" {
                    return Err(TransformError::TensorNotFound(join_path(
                        self.original.class_name(),
                        &path,
                    )));
                }
                continue;
            };

            let name = format!("{fused}_{suffix}");
            self.tensors.push((name.clone(), tensor.clone()));
            self.used.insert(path.clone());
            self.layer.record(name, ParamSource::Single(path));
        }
        Ok(())
    }

    fn norm_eps(&self, path: &str) -> Option<f64> {
        self.original.get(path).and_then(Module::layer_norm_eps)
    }
}

/// Build the fused encoder node replacing `original`
pub(crate) fn build(
    kind: FusedKind,
    layer_kind: LayerKind,
    original: &Module,
    config: &ModelConfig,
    strict: bool,
) -> TransformResult<Module> {
    let layout = EncoderLayout::of(layer_kind).ok_or_else(|| {
        TransformError::InvalidLayer(format!("{layer_kind} has no fused encoder layout"))
    })?;

    let mut packer = Packer {
        original,
        layer: FusedLayer::new(kind, layer_kind, config),
        tensors: Vec::new(),
        used: FxHashSet::default(),
    };

    packer.stack("in_proj", &[layout.query, layout.key, layout.value])?;
    packer.copy("out_proj", layout.out_proj)?;
    packer.copy("linear1", layout.linear1)?;
    packer.copy("linear2", layout.linear2)?;
    packer.copy("norm1", layout.norm1)?;
    packer.copy("norm2", layout.norm2)?;

    // Every tensor must be reachable from the mapping or revert loses it
    if let Some((path, _)) = original
        .state_dict()
        .into_iter()
        .find(|(path, _)| !packer.used.contains(path))
    {
        return Err(TransformError::InvalidLayer(format!(
            "{layer_kind}: tensor '{path}' has no place in {kind}"
        )));
    }

    packer.layer.norm_first = layout.norm_first;
    if let Some(eps) = packer.norm_eps(layout.norm1) {
        packer.layer.norm1_eps = eps;
    }
    if let Some(eps) = packer.norm_eps(layout.norm2) {
        packer.layer.norm2_eps = eps;
    }
    packer.layer.training = original.is_training();

    if strict {
        validate_encoder(&packer.layer, config)?;
    }

    trace!(
        original = %layer_kind,
        fused = %kind,
        tensors = packer.tensors.len(),
        "packed encoder layer"
    );

    let mut node = Module::fused(packer.layer);
    node.training = original.is_training();
    for (name, tensor) in packer.tensors {
        node.set_parameter(name, tensor);
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::layers;
    use crate::tensor::Initializer;

    fn bert_layer(init: &mut Initializer, config: &ModelConfig) -> Module {
        layers::bert_layer(init, config, LayerKind::BertLayer)
    }

    #[test]
    fn test_layout_lookup() {
        assert_eq!(EncoderLayout::of(LayerKind::RobertaLayer), Some(BERT));
        assert!(EncoderLayout::of(LayerKind::MBartEncoderLayer).unwrap().norm_first);
        assert!(!EncoderLayout::of(LayerKind::BartEncoderLayer).unwrap().norm_first);
        assert_eq!(EncoderLayout::of(LayerKind::Gpt2Attention), None);
    }

    #[test]
    fn test_build_bert_layer() {
        let config = ModelConfig::tiny("bert");
        let mut init = Initializer::seeded(3);
        let original = bert_layer(&mut init, &config);
        let node = FusedKind::Bert.build(&original, &config, true).unwrap();

        assert_eq!(node.class_name(), "BertLayerBetterTransformer");
        assert_eq!(node.parameter("in_proj_weight").unwrap().shape(), &[96, 32]);
        assert_eq!(node.parameter("in_proj_bias").unwrap().shape(), &[96]);
        assert_eq!(node.parameter("linear1_weight").unwrap().shape(), &[64, 32]);
        assert_eq!(node.parameter("norm2_bias").unwrap().shape(), &[32]);

        let fused = node.fused_layer().unwrap();
        assert_eq!(fused.num_heads, 4);
        assert_eq!(fused.embed_dim, 32);
        assert!(!fused.norm_first);
        assert!(!fused.is_last_layer);
        assert_eq!(fused.mapping().len(), 12);
    }

    #[test]
    fn test_revert_restores_bits() {
        let config = ModelConfig::tiny("bert");
        let mut init = Initializer::seeded(4);
        let original = bert_layer(&mut init, &config);
        let node = FusedKind::Bert.build(&original, &config, true).unwrap();

        let template = bert_layer(&mut Initializer::placeholder(), &config);
        let restored = node.revert_fused(template).unwrap();

        let before = original.state_dict();
        let after = restored.state_dict();
        assert_eq!(before.len(), after.len());
        for ((pa, ta), (pb, tb)) in before.iter().zip(after.iter()) {
            assert_eq!(pa, pb);
            assert!(ta.bitwise_eq(tb), "{pa}");
        }
    }

    #[test]
    fn test_unmapped_tensor_rejected() {
        let config = ModelConfig::tiny("bert");
        let mut init = Initializer::default();
        let original = bert_layer(&mut init, &config).with_parameter("extra", Tensor::zeros(&[2]));
        let err = FusedKind::Bert.build(&original, &config, true).unwrap_err();
        assert!(err.to_string().contains("extra"));
    }

    #[test]
    fn test_missing_projection_rejected() {
        let config = ModelConfig::tiny("bert");
        let original = Module::layer(LayerKind::BertLayer);
        assert!(FusedKind::Bert.build(&original, &config, true).is_err());
    }
}
