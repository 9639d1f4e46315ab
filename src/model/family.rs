//! Model family identifiers
//!
//! Families are keyed by the `model_type` string of a model configuration.
//! Lookup normalizes `-` and `_` so `xlm-roberta` and `xlm_roberta` agree.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! model_families {
    ($( $variant:ident => $id:literal ),+ $(,)?) => {
        /// Model family (the `model_type` of a configuration)
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum ModelFamily {
            $(
                #[doc = concat!("`", $id, "`")]
                $variant,
            )+
            /// Any family this crate has no entry for
            Other(String),
        }

        impl ModelFamily {
            /// Canonical identifier
            pub fn as_str(&self) -> &str {
                match self {
                    $( ModelFamily::$variant => $id, )+
                    ModelFamily::Other(id) => id,
                }
            }

            /// Resolve an identifier, falling back to [`ModelFamily::Other`]
            pub fn from_id(id: &str) -> Self {
                let wanted = normalize(id);
                $(
                    if normalize($id) == wanted {
                        return ModelFamily::$variant;
                    }
                )+
                ModelFamily::Other(id.to_string())
            }
        }
    };
}

fn normalize(id: &str) -> String {
    id.trim().to_ascii_lowercase().replace('-', "_")
}

model_families! {
    Albert => "albert",
    Bark => "bark",
    Bart => "bart",
    Bert => "bert",
    BertGeneration => "bert-generation",
    Blenderbot => "blenderbot",
    Blip2 => "blip-2",
    Bloom => "bloom",
    Camembert => "camembert",
    Clip => "clip",
    Codegen => "codegen",
    Data2VecText => "data2vec-text",
    DebertaV2 => "deberta-v2",
    Deit => "deit",
    DistilBert => "distilbert",
    Electra => "electra",
    Ernie => "ernie",
    Falcon => "falcon",
    Fsmt => "fsmt",
    Glpn => "glpn",
    Gpt2 => "gpt2",
    GptBigcode => "gpt_bigcode",
    Gptj => "gptj",
    GptNeo => "gpt_neo",
    GptNeoX => "gpt_neox",
    Hubert => "hubert",
    LayoutLm => "layoutlm",
    Llama => "llama",
    M2M100 => "m2m_100",
    Marian => "marian",
    MarkupLm => "markuplm",
    MBart => "mbart",
    Opt => "opt",
    Pegasus => "pegasus",
    ProphetNet => "prophetnet",
    RemBert => "rembert",
    Roberta => "roberta",
    RoCBert => "roc_bert",
    RoFormer => "roformer",
    Splinter => "splinter",
    T5 => "t5",
    Tapas => "tapas",
    Vilt => "vilt",
    Vit => "vit",
    VitMae => "vit_mae",
    VitMsn => "vit_msn",
    Wav2Vec2 => "wav2vec2",
    Whisper => "whisper",
    XlmRoberta => "xlm-roberta",
    Yolos => "yolos",
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelFamily {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_id(s))
    }
}

impl From<String> for ModelFamily {
    fn from(id: String) -> Self {
        Self::from_id(&id)
    }
}

impl From<&str> for ModelFamily {
    fn from(id: &str) -> Self {
        Self::from_id(id)
    }
}

impl From<ModelFamily> for String {
    fn from(family: ModelFamily) -> Self {
        family.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id() {
        assert_eq!(ModelFamily::from_id("bert"), ModelFamily::Bert);
        assert_eq!(ModelFamily::from_id("xlm_roberta"), ModelFamily::XlmRoberta);
        assert_eq!(ModelFamily::from_id("gpt-neo"), ModelFamily::GptNeo);
        assert_eq!(
            ModelFamily::from_id("mamba"),
            ModelFamily::Other("mamba".to_string())
        );
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(ModelFamily::M2M100.to_string(), "m2m_100");
        assert_eq!(ModelFamily::Blip2.to_string(), "blip-2");
        assert_eq!(ModelFamily::from_id("custom").to_string(), "custom");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ModelFamily::VitMae).unwrap();
        assert_eq!(json, "\"vit_mae\"");
        let back: ModelFamily = serde_json::from_str("\"data2vec-text\"").unwrap();
        assert_eq!(back, ModelFamily::Data2VecText);
    }
}
