//! Reference architectures
//!
//! Constructors for the model classes this crate ships with. Each is exposed
//! as an [`Architecture`] constant; reversal uses the same constant to build a
//! fresh instance of the original class.
//!
//! - [`layers`]: single layers (`BertLayer`, `GPT2Attention`, ...)
//! - [`models`]: root modules (`BertModel`, `GPT2Model`, ...)
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::builder;
//! use bettertransformer::model::{Model, ModelConfig};
//!
//! let model = Model::new(builder::BERT, ModelConfig::tiny("bert"))?;
//! ```

pub mod layers;
pub mod models;

use crate::error::TransformResult;
use crate::model::{Architecture, ModelConfig};
use crate::module::{LayerKind, Module};
use crate::tensor::Initializer;

macro_rules! architectures {
    ($( $(#[$doc:meta])* $name:ident => ($class:literal, $family:literal, $build:expr) ),+ $(,)?) => {
        $(
            $(#[$doc])*
            pub const $name: Architecture = Architecture {
                class_name: $class,
                build: {
                    fn build(config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
                        ($build)(config, init)
                    }
                    build
                },
            };
        )+

        /// Every shipped architecture with the family it belongs to
        pub const ALL: &[(Architecture, &str)] = &[$( ($name, $family) ),+];
    };
}

architectures! {
    /// `BertModel`
    BERT => ("BertModel", "bert", |c, i| models::bert_like(c, i, "Bert", LayerKind::BertLayer)),
    /// `RobertaModel`
    ROBERTA => ("RobertaModel", "roberta", |c, i| models::bert_like(c, i, "Roberta", LayerKind::RobertaLayer)),
    /// `XLMRobertaModel`
    XLM_ROBERTA => ("XLMRobertaModel", "xlm-roberta", |c, i| models::bert_like(c, i, "XLMRoberta", LayerKind::XlmRobertaLayer)),
    /// `ElectraModel`
    ELECTRA => ("ElectraModel", "electra", |c, i| models::bert_like(c, i, "Electra", LayerKind::ElectraLayer)),
    /// `CamembertModel`
    CAMEMBERT => ("CamembertModel", "camembert", |c, i| models::bert_like(c, i, "Camembert", LayerKind::CamembertLayer)),
    /// `AlbertModel`
    ALBERT => ("AlbertModel", "albert", models::albert),
    /// `ViTModel`
    VIT => ("ViTModel", "vit", |c, i| models::vit_like(c, i, "ViT", LayerKind::ViTLayer)),
    /// `DeiTModel`
    DEIT => ("DeiTModel", "deit", |c, i| models::vit_like(c, i, "DeiT", LayerKind::DeiTLayer)),
    /// `BartModel`
    BART => ("BartModel", "bart", models::bart),
    /// `GPT2Model`
    GPT2 => ("GPT2Model", "gpt2", models::gpt2),
    /// `OPTModel`
    OPT => ("OPTModel", "opt", models::opt),
    /// `CLIPModel`
    CLIP => ("CLIPModel", "clip", models::clip),
    /// `DistilBertModel`
    DISTILBERT => ("DistilBertModel", "distilbert", models::distilbert),
    /// `Wav2Vec2Model`
    WAV2VEC2 => ("Wav2Vec2Model", "wav2vec2", |c, i| models::wav2vec2_like(c, i, "Wav2Vec2", LayerKind::Wav2Vec2EncoderLayer)),
    /// `HubertModel`
    HUBERT => ("HubertModel", "hubert", |c, i| models::wav2vec2_like(c, i, "Hubert", LayerKind::HubertEncoderLayer)),
}

/// Architecture by root class name
pub fn by_class_name(name: &str) -> Option<Architecture> {
    ALL.iter()
        .map(|(arch, _)| *arch)
        .find(|arch| arch.class_name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn test_all_architectures_build() {
        for (arch, family) in ALL {
            let model = Model::new(*arch, ModelConfig::tiny(*family)).unwrap();
            assert_eq!(model.root().class_name(), arch.class_name);
            assert!(model.root().num_parameters() > 0, "{}", arch.class_name);
        }
    }

    #[test]
    fn test_placeholder_build() {
        let mut init = Initializer::placeholder();
        let root = BERT.instantiate(&ModelConfig::tiny("bert"), &mut init).unwrap();
        assert!(root.state_dict().iter().all(|(_, t)| t.is_placeholder()));
    }

    #[test]
    fn test_by_class_name() {
        assert_eq!(by_class_name("GPT2Model"), Some(GPT2));
        assert_eq!(by_class_name("LlamaModel"), None);
    }
}
