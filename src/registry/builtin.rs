//! Builtin registry tables

use crate::fused::FusedKind;
use crate::model::ModelFamily;
use crate::module::{LayerKind, MethodOverride};

use super::{FamilySpec, Registry, RegistryBuilder};

/// Families whose fused layers do not need the last-layer tag
const NO_NESTED_TENSOR: &[ModelFamily] = &[
    ModelFamily::Bark,
    ModelFamily::Blenderbot,
    ModelFamily::Bloom,
    ModelFamily::Codegen,
    ModelFamily::Gpt2,
    ModelFamily::Gptj,
    ModelFamily::GptNeo,
    ModelFamily::GptNeoX,
    ModelFamily::Opt,
    ModelFamily::Pegasus,
    ModelFamily::T5,
];

/// Families whose fused layers skip encoder validation
const NO_STRICT_VALIDATION: &[ModelFamily] = &[
    ModelFamily::Blenderbot,
    ModelFamily::Blip2,
    ModelFamily::Bloom,
    ModelFamily::Codegen,
    ModelFamily::Gpt2,
    ModelFamily::Gptj,
    ModelFamily::GptNeo,
    ModelFamily::GptNeoX,
    ModelFamily::Opt,
    ModelFamily::Pegasus,
    ModelFamily::T5,
];

fn single(layer: LayerKind, fused: FusedKind) -> FamilySpec {
    FamilySpec::new([(layer, fused)])
}

fn bert(layer: LayerKind) -> FamilySpec {
    single(layer, FusedKind::Bert)
}

fn vit(layer: LayerKind) -> FamilySpec {
    single(layer, FusedKind::Vit)
}

fn families() -> Vec<(ModelFamily, FamilySpec)> {
    use FusedKind as F;
    use LayerKind as L;
    use ModelFamily as M;

    vec![
        (M::Albert, single(L::AlbertLayer, F::Albert)),
        (
            M::Bark,
            single(L::BarkSelfAttention, F::BarkAttention).exclude(&["codec_model"]),
        ),
        (
            M::Bart,
            FamilySpec::new([
                (L::BartEncoderLayer, F::BartEncoder),
                (L::BartAttention, F::BartAttention),
            ]),
        ),
        (M::Bert, bert(L::BertLayer)),
        (M::BertGeneration, bert(L::BertGenerationLayer)),
        (M::Blenderbot, single(L::BlenderbotAttention, F::BlenderbotAttention)),
        (M::Bloom, single(L::BloomAttention, F::BloomAttention)),
        (M::Camembert, bert(L::CamembertLayer)),
        (
            M::Blip2,
            single(L::T5Attention, F::T5Attention).exclude(&["vision_model.encoder"]),
        ),
        (
            M::Clip,
            single(L::ClipEncoderLayer, F::Clip).exclude(&["text_model"]),
        ),
        (M::Codegen, single(L::CodeGenAttention, F::CodegenAttention)),
        (M::Data2VecText, bert(L::Data2VecTextLayer)),
        (M::Deit, vit(L::DeiTLayer)),
        (M::DistilBert, single(L::DistilBertBlock, F::DistilBert)),
        (M::Electra, bert(L::ElectraLayer)),
        (M::Ernie, bert(L::ErnieLayer)),
        (M::Fsmt, single(L::FsmtEncoderLayer, F::FsmtEncoder)),
        (M::Gpt2, single(L::Gpt2Attention, F::Gpt2Attention)),
        (M::Gptj, single(L::GptjAttention, F::GptjAttention)),
        (M::GptNeo, single(L::GptNeoSelfAttention, F::GptNeoAttention)),
        (M::GptNeoX, single(L::GptNeoXAttention, F::GptNeoXAttention)),
        (M::Hubert, single(L::HubertEncoderLayer, F::Wav2Vec2Encoder)),
        (M::LayoutLm, bert(L::LayoutLmLayer)),
        (
            M::M2M100,
            FamilySpec::new([
                (L::M2M100EncoderLayer, F::M2M100Encoder),
                (L::M2M100Attention, F::M2M100Attention),
            ]),
        ),
        (
            M::Marian,
            FamilySpec::new([
                (L::MarianEncoderLayer, F::MarianEncoder),
                (L::MarianAttention, F::MarianAttention),
            ]),
        ),
        (M::MarkupLm, bert(L::MarkupLmLayer)),
        (M::MBart, single(L::MBartEncoderLayer, F::MBartEncoder)),
        (
            M::Opt,
            single(L::OptAttention, F::OptAttention)
                .override_method(L::OptDecoder, MethodOverride::SDPA_DECODER_MASK),
        ),
        (M::Pegasus, single(L::PegasusAttention, F::PegasusAttention)),
        (M::RemBert, bert(L::RemBertLayer)),
        (M::ProphetNet, single(L::ProphetNetEncoderLayer, F::ProphetNetEncoder)),
        (M::Roberta, bert(L::RobertaLayer)),
        (M::RoCBert, bert(L::RoCBertLayer)),
        (M::RoFormer, bert(L::RoFormerLayer)),
        (M::Splinter, bert(L::SplinterLayer)),
        (M::Tapas, bert(L::TapasLayer)),
        (M::T5, single(L::T5Attention, F::T5Attention)),
        (M::Vilt, single(L::ViltLayer, F::Vilt)),
        (M::Vit, vit(L::ViTLayer)),
        (M::VitMae, vit(L::ViTMaeLayer)),
        (M::VitMsn, vit(L::ViTMsnLayer)),
        (
            M::Wav2Vec2,
            FamilySpec::new([
                (L::Wav2Vec2EncoderLayer, F::Wav2Vec2Encoder),
                (L::Wav2Vec2EncoderLayerStableLayerNorm, F::Wav2Vec2Encoder),
            ]),
        ),
        (M::XlmRoberta, bert(L::XlmRobertaLayer)),
        (M::Yolos, vit(L::YolosLayer)),
    ]
}

pub(super) fn registry() -> Registry {
    let mut builder = RegistryBuilder::new()
        .cannot_support(
            ModelFamily::DebertaV2,
            "DebertaV2 uses disentangled attention with relative positions, which the fused encoder kernel does not support",
        )
        .cannot_support(
            ModelFamily::Glpn,
            "GLPN has a convolutional layer present between the first and second layer norms of each encoder layer",
        )
        .natively_supported(ModelFamily::Falcon)
        .natively_supported(ModelFamily::GptBigcode)
        .natively_supported(ModelFamily::Llama)
        .natively_supported(ModelFamily::Whisper);

    for (family, spec) in families() {
        let spec = spec
            .nested_tensor(!NO_NESTED_TENSOR.contains(&family))
            .strict_validation(!NO_STRICT_VALIDATION.contains(&family));
        builder = builder.family(family, spec);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_fused_kind_is_reachable() {
        let registry = registry();
        for kind in FusedKind::ALL {
            let used = registry
                .supported_families()
                .into_iter()
                .any(|family| {
                    registry
                        .target_layers(family)
                        .into_iter()
                        .any(|layer| registry.fused_kind(family, layer) == Some(*kind))
                });
            assert!(used, "{kind} is never registered");
        }
    }

    #[test]
    fn test_unsupported_families_are_disjoint() {
        let registry = registry();
        for family in [ModelFamily::DebertaV2, ModelFamily::Glpn, ModelFamily::Llama, ModelFamily::Falcon] {
            assert!(!registry.supports(&family), "{family}");
        }
    }

    #[test]
    fn test_every_target_has_a_layout() {
        use crate::fused::attention::AttentionLayout;
        use crate::fused::encoder::EncoderLayout;
        use crate::fused::FusedShape;

        let registry = registry();
        for family in registry.supported_families() {
            for layer in registry.target_layers(family) {
                let shape = registry.fused_kind(family, layer).map(|k| k.shape());
                let has_layout = match shape {
                    Some(FusedShape::Encoder) => EncoderLayout::of(layer).is_some(),
                    Some(FusedShape::Attention) => AttentionLayout::of(layer).is_some(),
                    None => false,
                };
                assert!(has_layout, "{family}: {layer}");
            }
        }
    }
}
