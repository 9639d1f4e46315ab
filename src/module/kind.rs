//! Node kinds of the module tree
//!
//! Every registry-relevant class has a stable [`LayerKind`] tag so matching is
//! a map lookup instead of a comparison against live class names.

use std::borrow::Cow;
use std::fmt;

use crate::fused::FusedLayer;

/// What a node in the module tree is
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleKind {
    /// Ordered list of modules indexed `"0"`, `"1"`, ...
    List,
    /// Ordered sequence of modules applied one after the other
    Sequential,
    /// Leaf computational layer
    Leaf(LeafKind),
    /// Original layer class known to the registry
    Layer(LayerKind),
    /// Any other composite class, identified by name only
    Block(Cow<'static, str>),
    /// Fused replacement layer
    Fused(Box<FusedLayer>),
}

impl ModuleKind {
    /// Class name as it would be reported by the original framework
    pub fn class_name(&self) -> &str {
        match self {
            ModuleKind::List => "ModuleList",
            ModuleKind::Sequential => "Sequential",
            ModuleKind::Leaf(leaf) => leaf.class_name(),
            ModuleKind::Layer(layer) => layer.class_name(),
            ModuleKind::Block(name) => name,
            ModuleKind::Fused(fused) => fused.kind().class_name(),
        }
    }

    /// Registered layer tag, if any
    pub fn layer_kind(&self) -> Option<LayerKind> {
        match self {
            ModuleKind::Layer(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Leaf layers with their structural hyper-parameters
#[derive(Debug, Clone, PartialEq)]
pub enum LeafKind {
    /// `y = x W^T + b`
    Linear {
        /// Input features
        in_features: usize,
        /// Output features
        out_features: usize,
    },
    /// GPT-2 style linear with transposed weight
    Conv1D {
        /// Input features
        nx: usize,
        /// Output features
        nf: usize,
    },
    /// 2D convolution (patch embeddings)
    Conv2d {
        /// Input channels
        in_channels: usize,
        /// Output channels
        out_channels: usize,
        /// Square kernel size
        kernel_size: usize,
    },
    /// Layer normalization
    LayerNorm {
        /// Epsilon added to the variance
        eps: f64,
    },
    /// Lookup table
    Embedding {
        /// Table size
        num_embeddings: usize,
        /// Vector size
        embedding_dim: usize,
    },
    /// Dropout
    Dropout {
        /// Drop probability
        p: f32,
    },
    /// Pointwise activation
    Activation(Cow<'static, str>),
    /// Rotary position embedding tables
    RotaryEmbedding {
        /// Rotated dimension
        dim: usize,
    },
}

impl LeafKind {
    /// Class name of the leaf
    pub fn class_name(&self) -> &str {
        match self {
            LeafKind::Linear { .. } => "Linear",
            LeafKind::Conv1D { .. } => "Conv1D",
            LeafKind::Conv2d { .. } => "Conv2d",
            LeafKind::LayerNorm { .. } => "LayerNorm",
            LeafKind::Embedding { .. } => "Embedding",
            LeafKind::Dropout { .. } => "Dropout",
            LeafKind::Activation(name) => name,
            LeafKind::RotaryEmbedding { .. } => "RotaryEmbedding",
        }
    }
}

macro_rules! layer_kinds {
    ($( $(#[$doc:meta])* $variant:ident => $name:literal ),+ $(,)?) => {
        /// Original layer classes the registry can match or override
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum LayerKind {
            $( $(#[$doc])* $variant, )+
        }

        impl LayerKind {
            /// Every known layer kind
            pub const ALL: &'static [LayerKind] = &[$(LayerKind::$variant),+];

            /// Class name of the unfused layer
            pub fn class_name(&self) -> &'static str {
                match self {
                    $( LayerKind::$variant => $name, )+
                }
            }
        }
    };
}

layer_kinds! {
    /// `AlbertLayer`
    AlbertLayer => "AlbertLayer",
    /// `BarkSelfAttention`
    BarkSelfAttention => "BarkSelfAttention",
    /// `BartEncoderLayer`
    BartEncoderLayer => "BartEncoderLayer",
    /// `BartAttention`
    BartAttention => "BartAttention",
    /// `BertLayer`
    BertLayer => "BertLayer",
    /// `BertGenerationLayer`
    BertGenerationLayer => "BertGenerationLayer",
    /// `BlenderbotAttention`
    BlenderbotAttention => "BlenderbotAttention",
    /// `BloomAttention`
    BloomAttention => "BloomAttention",
    /// `CamembertLayer`
    CamembertLayer => "CamembertLayer",
    /// `T5Attention`
    T5Attention => "T5Attention",
    /// `CLIPEncoderLayer`
    ClipEncoderLayer => "CLIPEncoderLayer",
    /// `CodeGenAttention`
    CodeGenAttention => "CodeGenAttention",
    /// `Data2VecTextLayer`
    Data2VecTextLayer => "Data2VecTextLayer",
    /// `DeiTLayer`
    DeiTLayer => "DeiTLayer",
    /// DistilBERT `TransformerBlock`
    DistilBertBlock => "TransformerBlock",
    /// `ElectraLayer`
    ElectraLayer => "ElectraLayer",
    /// `ErnieLayer`
    ErnieLayer => "ErnieLayer",
    /// FSMT `EncoderLayer`
    FsmtEncoderLayer => "EncoderLayer",
    /// `GPT2Attention`
    Gpt2Attention => "GPT2Attention",
    /// `GPTJAttention`
    GptjAttention => "GPTJAttention",
    /// `GPTNeoSelfAttention`
    GptNeoSelfAttention => "GPTNeoSelfAttention",
    /// `GPTNeoXAttention`
    GptNeoXAttention => "GPTNeoXAttention",
    /// `HubertEncoderLayer`
    HubertEncoderLayer => "HubertEncoderLayer",
    /// `LayoutLMLayer`
    LayoutLmLayer => "LayoutLMLayer",
    /// `M2M100EncoderLayer`
    M2M100EncoderLayer => "M2M100EncoderLayer",
    /// `M2M100Attention`
    M2M100Attention => "M2M100Attention",
    /// `MarianEncoderLayer`
    MarianEncoderLayer => "MarianEncoderLayer",
    /// `MarianAttention`
    MarianAttention => "MarianAttention",
    /// `MarkupLMLayer`
    MarkupLmLayer => "MarkupLMLayer",
    /// `MBartEncoderLayer`
    MBartEncoderLayer => "MBartEncoderLayer",
    /// `OPTAttention`
    OptAttention => "OPTAttention",
    /// `OPTDecoder`
    OptDecoder => "OPTDecoder",
    /// `PegasusAttention`
    PegasusAttention => "PegasusAttention",
    /// `RemBertLayer`
    RemBertLayer => "RemBertLayer",
    /// `ProphetNetEncoderLayer`
    ProphetNetEncoderLayer => "ProphetNetEncoderLayer",
    /// `RobertaLayer`
    RobertaLayer => "RobertaLayer",
    /// `RoCBertLayer`
    RoCBertLayer => "RoCBertLayer",
    /// `RoFormerLayer`
    RoFormerLayer => "RoFormerLayer",
    /// `SplinterLayer`
    SplinterLayer => "SplinterLayer",
    /// `TapasLayer`
    TapasLayer => "TapasLayer",
    /// `ViltLayer`
    ViltLayer => "ViltLayer",
    /// `ViTLayer`
    ViTLayer => "ViTLayer",
    /// `ViTMAELayer`
    ViTMaeLayer => "ViTMAELayer",
    /// `ViTMSNLayer`
    ViTMsnLayer => "ViTMSNLayer",
    /// `Wav2Vec2EncoderLayer`
    Wav2Vec2EncoderLayer => "Wav2Vec2EncoderLayer",
    /// `Wav2Vec2EncoderLayerStableLayerNorm`
    Wav2Vec2EncoderLayerStableLayerNorm => "Wav2Vec2EncoderLayerStableLayerNorm",
    /// `XLMRobertaLayer`
    XlmRobertaLayer => "XLMRobertaLayer",
    /// `YolosLayer`
    YolosLayer => "YolosLayer",
}

impl LayerKind {
    /// Look a kind up by its original class name
    pub fn from_class_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.class_name() == name)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

/// Quantization applied to a module's weights
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    /// LLM.int8 row-wise quantization (carries per-row scale statistics)
    LlmInt8,
    /// 4-bit normal float
    Nf4,
}

impl Quantization {
    /// Whether fused layers cannot hold weights quantized this way
    pub fn conflicts_with_fusion(&self) -> bool {
        matches!(self, Quantization::LlmInt8)
    }
}
