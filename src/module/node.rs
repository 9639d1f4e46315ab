//! Module tree node
//!
//! `Module` is the central structure of the crate. A model is one root
//! `Module` owning its children, parameters and buffers; substitution swaps
//! entries in a parent's child map.

use std::borrow::Cow;

use crate::dispatch::DeviceHook;
use crate::fused::FusedLayer;
use crate::tensor::{Initializer, Tensor};

use super::behavior::MethodOverride;
use super::kind::{LayerKind, LeafKind, ModuleKind, Quantization};
use super::maps::{ChildMap, TensorMap};

/// A node of the module tree
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub(crate) kind: ModuleKind,
    pub(crate) children: ChildMap,
    pub(crate) parameters: TensorMap,
    pub(crate) buffers: TensorMap,
    pub(crate) training: bool,
    pub(crate) quantization: Option<Quantization>,
    pub(crate) behavior: Option<MethodOverride>,
    pub(crate) hook: Option<DeviceHook>,
}

impl Module {
    /// Create an empty node of the given kind, in training mode
    pub fn new(kind: ModuleKind) -> Self {
        Self {
            kind,
            children: ChildMap::new(),
            parameters: TensorMap::new(),
            buffers: TensorMap::new(),
            training: true,
            quantization: None,
            behavior: None,
            hook: None,
        }
    }

    /// Composite node identified by class name
    pub fn block(class_name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ModuleKind::Block(class_name.into()))
    }

    /// Registered original layer
    pub fn layer(kind: LayerKind) -> Self {
        Self::new(ModuleKind::Layer(kind))
    }

    /// Module list with children named by index
    pub fn list(items: impl IntoIterator<Item = Module>) -> Self {
        let mut list = Self::new(ModuleKind::List);
        for item in items {
            list.push(item);
        }
        list
    }

    /// Sequential container with children named by index
    pub fn sequential(items: impl IntoIterator<Item = Module>) -> Self {
        let mut seq = Self::new(ModuleKind::Sequential);
        for item in items {
            seq.push(item);
        }
        seq
    }

    /// Fused node wrapping `layer`
    pub fn fused(layer: FusedLayer) -> Self {
        Self::new(ModuleKind::Fused(Box::new(layer)))
    }

    // ========================================================================
    // Leaf constructors
    // ========================================================================

    /// `nn.Linear` with weight `[out, in]`
    pub fn linear(init: &mut Initializer, in_features: usize, out_features: usize, bias: bool) -> Self {
        let mut m = Self::new(ModuleKind::Leaf(LeafKind::Linear {
            in_features,
            out_features,
        }));
        m.parameters
            .insert("weight".to_string(), init.weight(&[out_features, in_features]));
        if bias {
            m.parameters.insert("bias".to_string(), init.bias(out_features));
        }
        m
    }

    /// GPT-2 `Conv1D` with weight `[nx, nf]`
    pub fn conv1d(init: &mut Initializer, nx: usize, nf: usize) -> Self {
        let mut m = Self::new(ModuleKind::Leaf(LeafKind::Conv1D { nx, nf }));
        m.parameters.insert("weight".to_string(), init.weight(&[nx, nf]));
        m.parameters.insert("bias".to_string(), init.bias(nf));
        m
    }

    /// `nn.Conv2d` with a square kernel
    pub fn conv2d(
        init: &mut Initializer,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
    ) -> Self {
        let mut m = Self::new(ModuleKind::Leaf(LeafKind::Conv2d {
            in_channels,
            out_channels,
            kernel_size,
        }));
        m.parameters.insert(
            "weight".to_string(),
            init.weight(&[out_channels, in_channels, kernel_size, kernel_size]),
        );
        m.parameters.insert("bias".to_string(), init.bias(out_channels));
        m
    }

    /// `nn.LayerNorm` over `dim` features
    pub fn layer_norm(init: &mut Initializer, dim: usize, eps: f64) -> Self {
        let mut m = Self::new(ModuleKind::Leaf(LeafKind::LayerNorm { eps }));
        m.parameters.insert("weight".to_string(), init.scale(dim));
        m.parameters.insert("bias".to_string(), init.bias(dim));
        m
    }

    /// `nn.Embedding`
    pub fn embedding(init: &mut Initializer, num_embeddings: usize, embedding_dim: usize) -> Self {
        let mut m = Self::new(ModuleKind::Leaf(LeafKind::Embedding {
            num_embeddings,
            embedding_dim,
        }));
        m.parameters
            .insert("weight".to_string(), init.weight(&[num_embeddings, embedding_dim]));
        m
    }

    /// `nn.Dropout`
    pub fn dropout(p: f32) -> Self {
        Self::new(ModuleKind::Leaf(LeafKind::Dropout { p }))
    }

    /// Pointwise activation
    pub fn activation(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ModuleKind::Leaf(LeafKind::Activation(name.into())))
    }

    // ========================================================================
    // Builder helpers
    // ========================================================================

    /// Append a named child
    pub fn with_child(mut self, name: impl Into<String>, child: Module) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    /// Append a named parameter
    pub fn with_parameter(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.parameters.insert(name.into(), tensor);
        self
    }

    /// Append a named buffer
    pub fn with_buffer(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.buffers.insert(name.into(), tensor);
        self
    }

    /// Mark weights as quantized
    pub fn with_quantization(mut self, quantization: Quantization) -> Self {
        self.quantization = Some(quantization);
        self
    }

    /// Append a child named by the current child count
    pub fn push(&mut self, child: Module) {
        let index = self.children.len().to_string();
        self.children.insert(index, child);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Node kind
    pub fn kind(&self) -> &ModuleKind {
        &self.kind
    }

    /// Class name of the node
    pub fn class_name(&self) -> &str {
        self.kind.class_name()
    }

    /// Registered layer tag, if this node is one
    pub fn layer_kind(&self) -> Option<LayerKind> {
        self.kind.layer_kind()
    }

    /// Whether this node is a module list
    pub fn is_list(&self) -> bool {
        matches!(self.kind, ModuleKind::List)
    }

    /// Whether this node is a fused layer
    pub fn is_fused(&self) -> bool {
        matches!(self.kind, ModuleKind::Fused(_))
    }

    /// Fused layer state
    pub fn fused_layer(&self) -> Option<&FusedLayer> {
        match &self.kind {
            ModuleKind::Fused(fused) => Some(fused),
            _ => None,
        }
    }

    /// Mutable fused layer state
    pub fn fused_layer_mut(&mut self) -> Option<&mut FusedLayer> {
        match &mut self.kind {
            ModuleKind::Fused(fused) => Some(fused),
            _ => None,
        }
    }

    /// Direct children in declaration order
    pub fn children(&self) -> impl Iterator<Item = (&str, &Module)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Child by local name
    pub fn child(&self, name: &str) -> Option<&Module> {
        self.children.get(name)
    }

    /// Mutable child by local name
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Module> {
        self.children.get_mut(name)
    }

    /// Whether the node has any children
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Number of direct children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the node has no children
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Last direct child
    pub fn last_child(&self) -> Option<(&str, &Module)> {
        self.children.last().map(|(k, v)| (k.as_str(), v))
    }

    /// Own parameters (not including children)
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Own parameter by local name
    pub fn parameter(&self, name: &str) -> Option<&Tensor> {
        self.parameters.get(name)
    }

    /// Own buffers (not including children)
    pub fn buffers(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.buffers.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Own buffer by local name
    pub fn buffer(&self, name: &str) -> Option<&Tensor> {
        self.buffers.get(name)
    }

    /// Whether the node is in training mode
    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Quantization marker
    pub fn quantization(&self) -> Option<Quantization> {
        self.quantization
    }

    /// Instance-level behaviour override
    pub fn behavior(&self) -> Option<&MethodOverride> {
        self.behavior.as_ref()
    }

    /// Dispatch hook attached by a device orchestrator
    pub fn hook(&self) -> Option<&DeviceHook> {
        self.hook.as_ref()
    }

    /// Layer norm epsilon, if this is a layer norm
    pub fn layer_norm_eps(&self) -> Option<f64> {
        match &self.kind {
            ModuleKind::Leaf(LeafKind::LayerNorm { eps }) => Some(*eps),
            _ => None,
        }
    }
}
