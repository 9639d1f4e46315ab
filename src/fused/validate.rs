//! Validation of fused encoder layers

use tracing::warn;

use crate::error::{TransformError, TransformResult};
use crate::model::ModelConfig;

use super::FusedLayer;

/// Activations the fused fast path implements
pub const FAST_PATH_ACTIVATIONS: &[&str] = &["relu", "gelu", "gelu_new"];

/// Check that a fused encoder layer can run on the fused kernel
///
/// Unsupported activations are not an error: the layer still works, it just
/// falls back to the slow path at run time.
pub fn validate_encoder(layer: &FusedLayer, config: &ModelConfig) -> TransformResult<()> {
    if layer.num_heads == 0 {
        return Err(TransformError::InvalidLayer(
            "number of heads not set for BetterTransformer conversion".to_string(),
        ));
    }
    if layer.embed_dim == 0 {
        return Err(TransformError::InvalidLayer(
            "embedding dimension not set for BetterTransformer conversion".to_string(),
        ));
    }
    if config.position_embedding_type != "absolute" {
        return Err(TransformError::InvalidLayer(format!(
            "position embedding type {} is not supported, only absolute position embeddings are",
            config.position_embedding_type
        )));
    }
    if layer.norm1_eps != layer.norm2_eps {
        return Err(TransformError::InvalidLayer(format!(
            "norm1_eps ({}) and norm2_eps ({}) must be equal",
            layer.norm1_eps, layer.norm2_eps
        )));
    }
    if layer.embed_dim % layer.num_heads != 0 {
        return Err(TransformError::InvalidLayer(format!(
            "embed_dim ({}) must be divisible by num_heads ({})",
            layer.embed_dim, layer.num_heads
        )));
    }
    if !FAST_PATH_ACTIVATIONS.contains(&layer.act_fn.as_str()) {
        warn!(
            activation = %layer.act_fn,
            layer = %layer.kind(),
            "activation is not supported by the fused fast path, falling back to the unfused path"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fused::FusedKind;
    use crate::module::LayerKind;

    fn layer(config: &ModelConfig) -> FusedLayer {
        FusedLayer::new(FusedKind::Bert, LayerKind::BertLayer, config)
    }

    #[test]
    fn test_valid_layer() {
        let config = ModelConfig::tiny("bert");
        assert!(validate_encoder(&layer(&config), &config).is_ok());
    }

    #[test]
    fn test_unsupported_activation_only_warns() {
        let config = ModelConfig::tiny("clip").with_activation("quick_gelu");
        assert!(validate_encoder(&layer(&config), &config).is_ok());
    }

    #[test]
    fn test_missing_heads() {
        let config = ModelConfig::tiny("bert").with_attention(32, 0);
        let err = validate_encoder(&layer(&config), &config).unwrap_err();
        assert!(err.to_string().contains("heads"));
    }

    #[test]
    fn test_relative_positions_rejected() {
        let config = ModelConfig::tiny("bert").with_position_embedding("relative_key");
        assert!(validate_encoder(&layer(&config), &config).is_err());
    }

    #[test]
    fn test_norm_eps_mismatch() {
        let config = ModelConfig::tiny("bert");
        let mut fused = layer(&config);
        fused.norm2_eps = 1e-5;
        assert!(validate_encoder(&fused, &config).is_err());
    }

    #[test]
    fn test_indivisible_heads() {
        let config = ModelConfig::tiny("bert").with_attention(30, 4);
        assert!(validate_encoder(&layer(&config), &config).is_err());
    }
}
