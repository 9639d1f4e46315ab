//! Fused replacement layers
//!
//! A fused layer replaces one registered original layer in the module tree.
//! Two shapes exist:
//!
//! - **Encoder layers** repack the attention and feed-forward weights of an
//!   encoder block into the flat layout of a fused encoder kernel
//!   (`in_proj_weight = [q; k; v]`, `out_proj_*`, `linear1_*`, `linear2_*`,
//!   `norm1_*`, `norm2_*`)
//! - **Attention layers** keep the submodules and buffers of an attention
//!   block as they are and only swap the attention computation
//!
//! Both record an `original_layers_mapping` from fused names back to the
//! original layout, which [`FusedLayer::revert`] uses to rebuild the original
//! layer losslessly.

pub mod attention;
pub mod encoder;
pub mod validate;

use std::fmt;

use crate::error::{TransformError, TransformResult};
use crate::model::ModelConfig;
use crate::module::{LayerKind, Module};
use crate::tensor::split_rows;

/// Marker contained in every fused class name
pub const FUSED_CLASS_MARKER: &str = "LayerBetterTransformer";

macro_rules! fused_kinds {
    ($( $variant:ident => ($name:literal, $shape:ident) ),+ $(,)?) => {
        /// Fused layer classes
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum FusedKind {
            $(
                #[doc = concat!("`", $name, "`")]
                $variant,
            )+
        }

        impl FusedKind {
            /// Every fused kind
            pub const ALL: &'static [FusedKind] = &[$(FusedKind::$variant),+];

            /// Class name of the fused layer
            pub fn class_name(&self) -> &'static str {
                match self {
                    $( FusedKind::$variant => $name, )+
                }
            }

            /// Whether this kind keeps the original submodules
            pub fn shape(&self) -> FusedShape {
                match self {
                    $( FusedKind::$variant => FusedShape::$shape, )+
                }
            }
        }
    };
}

/// How a fused kind stores the original layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusedShape {
    /// Repacked into flat fused encoder tensors
    Encoder,
    /// Original submodules kept under the fused node
    Attention,
}

fused_kinds! {
    Albert => ("AlbertLayerBetterTransformer", Encoder),
    Bert => ("BertLayerBetterTransformer", Encoder),
    BartEncoder => ("BartEncoderLayerBetterTransformer", Encoder),
    MBartEncoder => ("MBartEncoderLayerBetterTransformer", Encoder),
    M2M100Encoder => ("M2M100EncoderLayerBetterTransformer", Encoder),
    MarianEncoder => ("MarianEncoderLayerBetterTransformer", Encoder),
    DistilBert => ("DistilBertLayerBetterTransformer", Encoder),
    Vit => ("ViTLayerBetterTransformer", Encoder),
    Vilt => ("ViltLayerBetterTransformer", Encoder),
    Wav2Vec2Encoder => ("Wav2Vec2EncoderLayerBetterTransformer", Encoder),
    FsmtEncoder => ("FSMTEncoderLayerBetterTransformer", Encoder),
    ProphetNetEncoder => ("ProphetNetEncoderLayerBetterTransformer", Encoder),
    Clip => ("CLIPLayerBetterTransformer", Encoder),
    BartAttention => ("BartAttentionLayerBetterTransformer", Attention),
    BlenderbotAttention => ("BlenderbotAttentionLayerBetterTransformer", Attention),
    M2M100Attention => ("M2M100AttentionLayerBetterTransformer", Attention),
    MarianAttention => ("MarianAttentionLayerBetterTransformer", Attention),
    PegasusAttention => ("PegasusAttentionLayerBetterTransformer", Attention),
    Gpt2Attention => ("GPT2AttentionLayerBetterTransformer", Attention),
    GptjAttention => ("GPTJAttentionLayerBetterTransformer", Attention),
    GptNeoAttention => ("GPTNeoAttentionLayerBetterTransformer", Attention),
    GptNeoXAttention => ("GPTNeoXAttentionLayerBetterTransformer", Attention),
    CodegenAttention => ("CodegenAttentionLayerBetterTransformer", Attention),
    OptAttention => ("OPTAttentionLayerBetterTransformer", Attention),
    T5Attention => ("T5AttentionLayerBetterTransformer", Attention),
    BloomAttention => ("BloomAttentionLayerBetterTransformer", Attention),
    BarkAttention => ("BarkAttentionLayerBetterTransformer", Attention),
}

impl FusedKind {
    /// Build the fused node replacing `original`
    ///
    /// `strict` enables the encoder-layer validation rules.
    pub fn build(&self, original: &Module, config: &ModelConfig, strict: bool) -> TransformResult<Module> {
        let layer_kind = original.layer_kind().ok_or_else(|| {
            TransformError::InvalidLayer(format!(
                "{} is not a registered layer and cannot become {}",
                original.class_name(),
                self.class_name()
            ))
        })?;

        match self.shape() {
            FusedShape::Encoder => encoder::build(*self, layer_kind, original, config, strict),
            FusedShape::Attention => attention::build(*self, layer_kind, original, config),
        }
    }
}

impl fmt::Display for FusedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Where a fused tensor or submodule came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSource {
    /// Copied from one tensor of the original layer
    Single(String),
    /// Rows stacked from several tensors, in order
    Stacked(Vec<String>),
    /// Original submodule kept under the same name
    Submodule(String),
    /// Original buffer kept under the same name
    Buffer(String),
}

/// State of a fused layer
#[derive(Debug, Clone, PartialEq)]
pub struct FusedLayer {
    kind: FusedKind,
    original: LayerKind,
    mapping: Vec<(String, ParamSource)>,
    /// Attention heads
    pub num_heads: usize,
    /// Model width
    pub embed_dim: usize,
    /// Pre-norm (`true`) or post-norm block
    pub norm_first: bool,
    /// Feed-forward activation name
    pub act_fn: String,
    /// Whether the fast path applies GELU
    pub use_gelu: bool,
    /// Epsilon of the first layer norm
    pub norm1_eps: f64,
    /// Epsilon of the second layer norm
    pub norm2_eps: f64,
    /// Set on the final layer of a nested-tensor stack
    pub is_last_layer: bool,
    /// Mirrors the training mode of the node
    pub training: bool,
}

impl FusedLayer {
    pub(crate) fn new(kind: FusedKind, original: LayerKind, config: &ModelConfig) -> Self {
        let act_fn = config.hidden_act.clone();
        Self {
            kind,
            original,
            mapping: Vec::new(),
            num_heads: config.num_attention_heads,
            embed_dim: config.hidden_size,
            norm_first: false,
            use_gelu: matches!(act_fn.as_str(), "gelu" | "gelu_new"),
            act_fn,
            norm1_eps: config.layer_norm_eps,
            norm2_eps: config.layer_norm_eps,
            is_last_layer: false,
            training: true,
        }
    }

    /// Fused class
    pub fn kind(&self) -> FusedKind {
        self.kind
    }

    /// Class that was replaced
    pub fn original(&self) -> LayerKind {
        self.original
    }

    /// `original_layers_mapping`: fused name → source in the original layout
    pub fn mapping(&self) -> &[(String, ParamSource)] {
        &self.mapping
    }

    pub(crate) fn record(&mut self, fused_name: impl Into<String>, source: ParamSource) {
        self.mapping.push((fused_name.into(), source));
    }

    /// Restore the original layer from the fused `node`
    ///
    /// `template` is a freshly built original layer (usually placeholder
    /// storage); the fused state is written into it. Source slots the template
    /// does not have are skipped.
    pub fn revert(&self, node: &Module, template: Module) -> TransformResult<Module> {
        if template.layer_kind() != Some(self.original) {
            return Err(TransformError::InvalidLayer(format!(
                "cannot revert {} into {}, expected {}",
                self.kind,
                template.class_name(),
                self.original
            )));
        }

        let mut restored = template;
        for (fused_name, source) in &self.mapping {
            match source {
                ParamSource::Single(path) => {
                    let tensor = fused_tensor(node, fused_name)?;
                    if restored.has_tensor(path) {
                        restored.set_tensor(path, tensor.clone())?;
                    }
                }
                ParamSource::Stacked(paths) => {
                    let tensor = fused_tensor(node, fused_name)?;
                    let parts = split_rows(tensor, paths.len())?;
                    for (path, part) in paths.iter().zip(parts) {
                        if restored.has_tensor(path) {
                            restored.set_tensor(path, part)?;
                        }
                    }
                }
                ParamSource::Submodule(name) => {
                    let kept = node
                        .child(fused_name)
                        .ok_or_else(|| TransformError::ModuleNotFound(fused_name.clone()))?;
                    if restored.child(name).is_some() {
                        restored.replace_child(name, kept.clone());
                    }
                }
                ParamSource::Buffer(name) => {
                    let kept = node
                        .buffer(fused_name)
                        .ok_or_else(|| TransformError::TensorNotFound(fused_name.clone()))?;
                    if restored.buffer(name).is_some() {
                        restored.set_buffer(name.clone(), kept.clone());
                    }
                }
            }
        }
        Ok(restored)
    }
}

fn fused_tensor<'a>(node: &'a Module, name: &str) -> TransformResult<&'a crate::tensor::Tensor> {
    node.parameter(name)
        .ok_or_else(|| TransformError::TensorNotFound(format!("{}.{name}", node.class_name())))
}

impl Module {
    /// Revert this fused node into `template`
    pub fn revert_fused(&self, template: Module) -> TransformResult<Module> {
        let fused = self.fused_layer().ok_or_else(|| {
            TransformError::InvalidLayer(format!("{} is not a fused layer", self.class_name()))
        })?;
        fused.revert(self, template)
    }
}
