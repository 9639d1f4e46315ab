//! Root module constructors

use crate::error::{TransformError, TransformResult};
use crate::model::ModelConfig;
use crate::module::{LayerKind, Module};
use crate::tensor::Initializer;

use super::layers::{self, position_ids};

fn check_dims(config: &ModelConfig) -> TransformResult<()> {
    if config.hidden_size == 0 || config.intermediate_size == 0 {
        return Err(TransformError::InvalidLayer(format!(
            "{}: hidden_size and intermediate_size must be non zero",
            config.model_type
        )));
    }
    Ok(())
}

fn norm(init: &mut Initializer, config: &ModelConfig) -> Module {
    Module::layer_norm(init, config.hidden_size, config.layer_norm_eps)
}

fn stack(
    init: &mut Initializer,
    config: &ModelConfig,
    depth: usize,
    layer: impl Fn(&mut Initializer, &ModelConfig) -> Module,
) -> Module {
    Module::list((0..depth).map(|_| layer(init, config)).collect::<Vec<_>>())
}

fn pooler(init: &mut Initializer, config: &ModelConfig, prefix: &str) -> Module {
    let h = config.hidden_size;
    Module::block(format!("{prefix}Pooler"))
        .with_child("dense", Module::linear(init, h, h, true))
        .with_child("activation", Module::activation("Tanh"))
}

/// `{prefix}Model` of the BERT family
pub fn bert_like(
    config: &ModelConfig,
    init: &mut Initializer,
    prefix: &str,
    kind: LayerKind,
) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;

    let embeddings = Module::block(format!("{prefix}Embeddings"))
        .with_child("word_embeddings", Module::embedding(init, config.vocab_size, h))
        .with_child(
            "position_embeddings",
            Module::embedding(init, config.max_position_embeddings, h),
        )
        .with_child(
            "token_type_embeddings",
            Module::embedding(init, config.type_vocab_size.max(1), h),
        )
        .with_child("LayerNorm", norm(init, config))
        .with_child("dropout", Module::dropout(0.1))
        .with_buffer("position_ids", position_ids(init, config.max_position_embeddings));

    let layer = stack(init, config, config.num_hidden_layers, |init, config| {
        layers::bert_layer(init, config, kind)
    });

    Ok(Module::block(format!("{prefix}Model"))
        .with_child("embeddings", embeddings)
        .with_child(
            "encoder",
            Module::block(format!("{prefix}Encoder")).with_child("layer", layer),
        )
        .with_child("pooler", pooler(init, config, prefix)))
}

/// `AlbertModel` with a single shared layer group
pub fn albert(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;

    let embeddings = Module::block("AlbertEmbeddings")
        .with_child("word_embeddings", Module::embedding(init, config.vocab_size, h))
        .with_child(
            "position_embeddings",
            Module::embedding(init, config.max_position_embeddings, h),
        )
        .with_child(
            "token_type_embeddings",
            Module::embedding(init, config.type_vocab_size.max(1), h),
        )
        .with_child("LayerNorm", norm(init, config))
        .with_child("dropout", Module::dropout(0.0))
        .with_buffer("position_ids", position_ids(init, config.max_position_embeddings));

    let group = Module::block("AlbertLayerGroup").with_child(
        "albert_layers",
        stack(init, config, config.num_hidden_layers, layers::albert_layer),
    );

    Ok(Module::block("AlbertModel")
        .with_child("embeddings", embeddings)
        .with_child(
            "encoder",
            Module::block("AlbertTransformer")
                .with_child("embedding_hidden_mapping_in", Module::linear(init, h, h, true))
                .with_child("albert_layer_groups", Module::list(vec![group])),
        )
        .with_child("pooler", Module::linear(init, h, h, true))
        .with_child("pooler_activation", Module::activation("Tanh")))
}

fn patches(config: &ModelConfig) -> TransformResult<(usize, usize, usize)> {
    let image = config.image_size.unwrap_or(224);
    let patch = config.patch_size.unwrap_or(16);
    let channels = config.num_channels.unwrap_or(3);
    if patch == 0 || image % patch != 0 {
        return Err(TransformError::InvalidLayer(format!(
            "image size {image} is not a multiple of patch size {patch}"
        )));
    }
    Ok(((image / patch) * (image / patch), patch, channels))
}

/// `{prefix}Model` of the ViT family
pub fn vit_like(
    config: &ModelConfig,
    init: &mut Initializer,
    prefix: &str,
    kind: LayerKind,
) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;
    let (num_patches, patch, channels) = patches(config)?;

    let embeddings = Module::block(format!("{prefix}Embeddings"))
        .with_parameter("cls_token", init.weight(&[1, 1, h]))
        .with_parameter("position_embeddings", init.weight(&[1, num_patches + 1, h]))
        .with_child(
            "patch_embeddings",
            Module::block(format!("{prefix}PatchEmbeddings"))
                .with_child("projection", Module::conv2d(init, channels, h, patch)),
        )
        .with_child("dropout", Module::dropout(0.0));

    let layer = stack(init, config, config.num_hidden_layers, |init, config| {
        layers::vit_layer(init, config, kind)
    });

    Ok(Module::block(format!("{prefix}Model"))
        .with_child("embeddings", embeddings)
        .with_child(
            "encoder",
            Module::block(format!("{prefix}Encoder")).with_child("layer", layer),
        )
        .with_child("layernorm", norm(init, config))
        .with_child("pooler", pooler(init, config, prefix)))
}

/// `BartModel`
pub fn bart(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;
    // Learned positions are offset by two in BART
    let positions = config.max_position_embeddings + 2;

    let encoder = Module::block("BartEncoder")
        .with_child("embed_positions", Module::embedding(init, positions, h))
        .with_child(
            "layers",
            stack(init, config, config.num_hidden_layers, layers::bart_encoder_layer),
        )
        .with_child("layernorm_embedding", norm(init, config));

    let decoder = Module::block("BartDecoder")
        .with_child("embed_positions", Module::embedding(init, positions, h))
        .with_child(
            "layers",
            stack(init, config, config.decoder_depth(), layers::bart_decoder_layer),
        )
        .with_child("layernorm_embedding", norm(init, config));

    Ok(Module::block("BartModel")
        .with_child("shared", Module::embedding(init, config.vocab_size, h))
        .with_child("encoder", encoder)
        .with_child("decoder", decoder))
}

/// `GPT2Model`
pub fn gpt2(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;

    Ok(Module::block("GPT2Model")
        .with_child("wte", Module::embedding(init, config.vocab_size, h))
        .with_child("wpe", Module::embedding(init, config.max_position_embeddings, h))
        .with_child("drop", Module::dropout(0.1))
        .with_child(
            "h",
            stack(init, config, config.num_hidden_layers, layers::gpt2_block),
        )
        .with_child("ln_f", norm(init, config)))
}

/// `OPTModel`
pub fn opt(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;

    let decoder = Module::layer(LayerKind::OptDecoder)
        .with_child("embed_tokens", Module::embedding(init, config.vocab_size, h))
        .with_child(
            "embed_positions",
            Module::embedding(init, config.max_position_embeddings + 2, h),
        )
        .with_child("final_layer_norm", norm(init, config))
        .with_child(
            "layers",
            stack(init, config, config.num_hidden_layers, layers::opt_decoder_layer),
        );

    Ok(Module::block("OPTModel").with_child("decoder", decoder))
}

/// `CLIPModel` with equally sized text and vision towers
pub fn clip(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;
    let (num_patches, patch, channels) = patches(config)?;

    let text_model = Module::block("CLIPTextTransformer")
        .with_child(
            "embeddings",
            Module::block("CLIPTextEmbeddings")
                .with_child("token_embedding", Module::embedding(init, config.vocab_size, h))
                .with_child(
                    "position_embedding",
                    Module::embedding(init, config.max_position_embeddings, h),
                )
                .with_buffer("position_ids", position_ids(init, config.max_position_embeddings)),
        )
        .with_child(
            "encoder",
            Module::block("CLIPEncoder").with_child(
                "layers",
                stack(init, config, config.num_hidden_layers, layers::clip_layer),
            ),
        )
        .with_child("final_layer_norm", norm(init, config));

    let vision_model = Module::block("CLIPVisionTransformer")
        .with_child(
            "embeddings",
            Module::block("CLIPVisionEmbeddings")
                .with_parameter("class_embedding", init.weight(&[h]))
                .with_child("patch_embedding", Module::conv2d(init, channels, h, patch))
                .with_child("position_embedding", Module::embedding(init, num_patches + 1, h))
                .with_buffer("position_ids", position_ids(init, num_patches + 1)),
        )
        .with_child("pre_layrnorm", norm(init, config))
        .with_child(
            "encoder",
            Module::block("CLIPEncoder").with_child(
                "layers",
                stack(init, config, config.num_hidden_layers, layers::clip_layer),
            ),
        )
        .with_child("post_layernorm", norm(init, config));

    Ok(Module::block("CLIPModel")
        .with_child("text_model", text_model)
        .with_child("vision_model", vision_model)
        .with_child("visual_projection", Module::linear(init, h, h, false))
        .with_child("text_projection", Module::linear(init, h, h, false))
        .with_parameter("logit_scale", init.scale(1)))
}

/// `DistilBertModel`
pub fn distilbert(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;

    let embeddings = Module::block("Embeddings")
        .with_child("word_embeddings", Module::embedding(init, config.vocab_size, h))
        .with_child(
            "position_embeddings",
            Module::embedding(init, config.max_position_embeddings, h),
        )
        .with_child("LayerNorm", norm(init, config))
        .with_child("dropout", Module::dropout(0.1));

    Ok(Module::block("DistilBertModel")
        .with_child("embeddings", embeddings)
        .with_child(
            "transformer",
            Module::block("Transformer").with_child(
                "layer",
                stack(init, config, config.num_hidden_layers, layers::distilbert_block),
            ),
        ))
}

/// `{prefix}Model` of the speech encoders, without the convolutional front end
pub fn wav2vec2_like(
    config: &ModelConfig,
    init: &mut Initializer,
    prefix: &str,
    kind: LayerKind,
) -> TransformResult<Module> {
    check_dims(config)?;
    let h = config.hidden_size;

    let layers = stack(init, config, config.num_hidden_layers, |init, config| {
        layers::wav2vec2_layer(init, config, kind)
    });

    Ok(Module::block(format!("{prefix}Model"))
        .with_child(
            "feature_projection",
            Module::block(format!("{prefix}FeatureProjection"))
                .with_child("layer_norm", norm(init, config))
                .with_child("projection", Module::linear(init, h, h, true))
                .with_child("dropout", Module::dropout(0.1)),
        )
        .with_parameter("masked_spec_embed", init.weight(&[h]))
        .with_child(
            "encoder",
            Module::block(format!("{prefix}Encoder"))
                .with_child("layer_norm", norm(init, config))
                .with_child("dropout", Module::dropout(0.1))
                .with_child("layers", layers),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bert_structure() {
        let config = ModelConfig::tiny("bert").with_layers(3);
        let root = bert_like(&config, &mut Initializer::default(), "Bert", LayerKind::BertLayer).unwrap();
        assert_eq!(root.class_name(), "BertModel");
        let layers = root.get("encoder.layer").unwrap();
        assert!(layers.is_list());
        assert_eq!(layers.len(), 3);
        assert!(root.has_tensor("embeddings.position_ids"));
    }

    #[test]
    fn test_zero_width_rejected() {
        let config = ModelConfig::tiny("bert").with_attention(0, 4);
        assert!(bert_like(&config, &mut Initializer::default(), "Bert", LayerKind::BertLayer).is_err());
    }

    #[test]
    fn test_vit_patches() {
        let config = ModelConfig::tiny("vit");
        let root = vit_like(&config, &mut Initializer::default(), "ViT", LayerKind::ViTLayer).unwrap();
        // 32 / 8 = 4 patches per side, plus the class token
        assert_eq!(
            root.tensor("embeddings.position_embeddings").unwrap().shape(),
            &[1, 17, 32]
        );

        let mut bad = config;
        bad.patch_size = Some(5);
        assert!(vit_like(&bad, &mut Initializer::default(), "ViT", LayerKind::ViTLayer).is_err());
    }

    #[test]
    fn test_bart_decoder_depth() {
        let mut config = ModelConfig::tiny("bart");
        config.decoder_layers = Some(3);
        let root = bart(&config, &mut Initializer::default()).unwrap();
        assert_eq!(root.get("encoder.layers").unwrap().len(), 2);
        assert_eq!(root.get("decoder.layers").unwrap().len(), 3);
        assert_eq!(
            root.get("decoder.layers.0.encoder_attn").unwrap().layer_kind(),
            Some(LayerKind::BartAttention)
        );
    }

    #[test]
    fn test_opt_decoder_is_registered_kind() {
        let root = opt(&ModelConfig::tiny("opt"), &mut Initializer::default()).unwrap();
        assert_eq!(root.get("decoder").unwrap().layer_kind(), Some(LayerKind::OptDecoder));
    }
}
