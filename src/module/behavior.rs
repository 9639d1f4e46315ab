//! Instance-level behaviour overrides
//!
//! A node can carry a [`MethodOverride`] that shadows one of its class
//! methods for this instance only. Other instances of the same class keep the
//! default behaviour unless they carry their own override.

use std::fmt;

use ndarray::{Array2, Array4};

use super::node::Module;

/// Additive value used for masked positions
pub const MASK_VALUE: f32 = f32::MIN;

/// Methods that may be overridden per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Build the decoder attention mask from a padding mask
    PrepareDecoderAttentionMask,
}

impl MethodKind {
    /// Method name as exposed by the original class
    pub fn name(&self) -> &'static str {
        match self {
            MethodKind::PrepareDecoderAttentionMask => "_prepare_decoder_attention_mask",
        }
    }
}

/// Inputs of `prepare_decoder_attention_mask`
#[derive(Debug, Clone, Copy)]
pub struct MaskRequest<'a> {
    /// Padding mask `[batch, past_len + target_len]`, 1 for kept tokens
    pub attention_mask: Option<&'a Array2<f32>>,
    /// Batch size
    pub batch_size: usize,
    /// Number of new query positions
    pub target_len: usize,
    /// Number of cached key positions
    pub past_len: usize,
}

impl MaskRequest<'_> {
    /// Total key length
    pub fn source_len(&self) -> usize {
        self.past_len + self.target_len
    }
}

/// Replacement for `prepare_decoder_attention_mask`
pub type MaskFn = fn(&Module, &MaskRequest<'_>) -> Option<Array4<f32>>;

/// A method override attached to a single node
#[derive(Clone, Copy)]
pub enum MethodOverride {
    /// Replace `prepare_decoder_attention_mask`
    PrepareDecoderAttentionMask {
        /// Name of the replacement strategy
        name: &'static str,
        /// Replacement implementation
        replacement: MaskFn,
    },
}

impl MethodOverride {
    /// Mask preparation for fused scaled dot product attention
    pub const SDPA_DECODER_MASK: MethodOverride = MethodOverride::PrepareDecoderAttentionMask {
        name: "sdpa_decoder_attention_mask",
        replacement: sdpa_decoder_attention_mask,
    };

    /// Which method is shadowed
    pub fn method(&self) -> MethodKind {
        match self {
            MethodOverride::PrepareDecoderAttentionMask { .. } => {
                MethodKind::PrepareDecoderAttentionMask
            }
        }
    }

    /// Name of the replacement strategy
    pub fn name(&self) -> &'static str {
        match self {
            MethodOverride::PrepareDecoderAttentionMask { name, .. } => name,
        }
    }
}

impl fmt::Debug for MethodOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodOverride")
            .field("method", &self.method().name())
            .field("replacement", &self.name())
            .finish()
    }
}

impl PartialEq for MethodOverride {
    fn eq(&self, other: &Self) -> bool {
        self.method() == other.method() && self.name() == other.name()
    }
}

// ============================================================================
// Mask strategies
// ============================================================================

/// Causal mask combined with the padding mask, `[batch, 1, target, source]`
///
/// Query `i` may attend to key `j` when `j <= past_len + i` and key `j` is
/// not padding. Masked entries hold [`MASK_VALUE`].
pub fn causal_attention_mask(request: &MaskRequest<'_>) -> Array4<f32> {
    let source_len = request.source_len();
    let mut mask = Array4::<f32>::zeros((request.batch_size, 1, request.target_len, source_len));

    for ((b, _, i, j), value) in mask.indexed_iter_mut() {
        if j > request.past_len + i || is_padding(request, b, j) {
            *value = MASK_VALUE;
        }
    }
    mask
}

/// Padding-only mask `[batch, 1, target, source]`, if a padding mask exists
pub fn padding_attention_mask(request: &MaskRequest<'_>) -> Option<Array4<f32>> {
    request.attention_mask?;
    let source_len = request.source_len();
    let mut mask = Array4::<f32>::zeros((request.batch_size, 1, request.target_len, source_len));
    for ((b, _, _, j), value) in mask.indexed_iter_mut() {
        if is_padding(request, b, j) {
            *value = MASK_VALUE;
        }
    }
    Some(mask)
}

fn is_padding(request: &MaskRequest<'_>, batch: usize, key: usize) -> bool {
    request
        .attention_mask
        .and_then(|m| m.get((batch, key)))
        .is_some_and(|&keep| keep == 0.0)
}

/// Default class behaviour of `prepare_decoder_attention_mask`
pub fn default_decoder_attention_mask(_module: &Module, request: &MaskRequest<'_>) -> Option<Array4<f32>> {
    Some(causal_attention_mask(request))
}

/// Decoder mask for fused attention kernels
///
/// The fused kernel applies causality itself when given no mask, which is
/// only valid without padding: a batch of one needs no mask at all, a single
/// new token only needs the padding mask, anything else gets the full mask.
pub fn sdpa_decoder_attention_mask(module: &Module, request: &MaskRequest<'_>) -> Option<Array4<f32>> {
    if request.batch_size == 1 {
        return None;
    }
    if request.target_len == 1 {
        return padding_attention_mask(request);
    }
    default_decoder_attention_mask(module, request)
}

impl Module {
    /// Build the decoder attention mask, honouring an instance override
    pub fn prepare_decoder_attention_mask(&self, request: &MaskRequest<'_>) -> Option<Array4<f32>> {
        match self.behavior {
            Some(MethodOverride::PrepareDecoderAttentionMask { replacement, .. }) => {
                replacement(self, request)
            }
            None => default_decoder_attention_mask(self, request),
        }
    }
}
