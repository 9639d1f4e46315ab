//! Capability registry
//!
//! Static tables describing what can be fused for each model family:
//!
//! | Table | Content |
//! |-------|---------|
//! | layers | original [`LayerKind`] → [`FusedKind`] |
//! | excluded | submodule names never walked into |
//! | overrides | [`LayerKind`] → [`MethodOverride`] attached per instance |
//! | nested tensor | whether the last fused layer must be tagged |
//! | strict validation | whether fused encoder layers are validated |
//!
//! plus the families that can never be fused and the families that have
//! native fused attention elsewhere. All lookups are read-only; unknown
//! families answer `None`, `false` or an empty slice.
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::registry::Registry;
//!
//! let registry = Registry::builtin();
//! assert!(registry.supports(&ModelFamily::Bert));
//! assert_eq!(registry.fused_kind(&ModelFamily::Bert, LayerKind::BertLayer), Some(FusedKind::Bert));
//! ```

mod builtin;

use std::sync::OnceLock;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::fused::FusedKind;
use crate::model::ModelFamily;
use crate::module::{LayerKind, MethodOverride};

/// Everything registered for one family
#[derive(Debug, Clone, PartialEq)]
pub struct FamilySpec {
    layers: IndexMap<LayerKind, FusedKind>,
    excluded: Vec<&'static str>,
    overrides: IndexMap<LayerKind, MethodOverride>,
    nested_tensor: bool,
    strict_validation: bool,
}

impl FamilySpec {
    /// Family fusing the given layers, with nested tensors and strict validation
    pub fn new(layers: impl IntoIterator<Item = (LayerKind, FusedKind)>) -> Self {
        Self {
            layers: layers.into_iter().collect(),
            excluded: Vec::new(),
            overrides: IndexMap::new(),
            nested_tensor: true,
            strict_validation: true,
        }
    }

    /// Never walk into submodules with these names
    pub fn exclude(mut self, names: &[&'static str]) -> Self {
        self.excluded.extend_from_slice(names);
        self
    }

    /// Attach `behavior` to every visited instance of `layer`
    pub fn override_method(mut self, layer: LayerKind, behavior: MethodOverride) -> Self {
        self.overrides.insert(layer, behavior);
        self
    }

    /// Set whether the last fused layer needs tagging
    pub fn nested_tensor(mut self, required: bool) -> Self {
        self.nested_tensor = required;
        self
    }

    /// Set whether fused encoder layers are validated
    pub fn strict_validation(mut self, required: bool) -> Self {
        self.strict_validation = required;
        self
    }
}

/// Capability registry
#[derive(Debug, Clone, Default)]
pub struct Registry {
    families: FxHashMap<ModelFamily, FamilySpec>,
    cannot_support: FxHashMap<ModelFamily, &'static str>,
    natively_supported: Vec<ModelFamily>,
}

/// Explicit construction of a registry
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a family
    pub fn family(mut self, family: ModelFamily, spec: FamilySpec) -> Self {
        self.registry.families.insert(family, spec);
        self
    }

    /// Declare a family that can never be fused
    pub fn cannot_support(mut self, family: ModelFamily, reason: &'static str) -> Self {
        self.registry.cannot_support.insert(family, reason);
        self
    }

    /// Declare a family with native fused attention
    pub fn natively_supported(mut self, family: ModelFamily) -> Self {
        if !self.registry.natively_supported.contains(&family) {
            self.registry.natively_supported.push(family);
        }
        self
    }

    /// Finish
    pub fn build(self) -> Registry {
        self.registry
    }
}

impl Registry {
    /// Process-wide builtin tables
    pub fn builtin() -> &'static Registry {
        static BUILTIN: OnceLock<Registry> = OnceLock::new();
        BUILTIN.get_or_init(builtin::registry)
    }

    /// Start an explicit registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Whether the family has any fused mapping
    pub fn supports(&self, family: &ModelFamily) -> bool {
        self.families.contains_key(family)
    }

    /// Whether the last fused layer must be tagged for nested-tensor batching
    pub fn requires_nested_tensor(&self, family: &ModelFamily) -> bool {
        self.families.get(family).is_some_and(|spec| spec.nested_tensor)
    }

    /// Whether fused encoder layers of this family are validated
    pub fn requires_strict_validation(&self, family: &ModelFamily) -> bool {
        self.families
            .get(family)
            .is_some_and(|spec| spec.strict_validation)
    }

    /// Fused replacement of `layer` in this family
    pub fn fused_kind(&self, family: &ModelFamily, layer: LayerKind) -> Option<FusedKind> {
        self.families.get(family)?.layers.get(&layer).copied()
    }

    /// Original layers fused in this family, in registration order
    pub fn target_layers(&self, family: &ModelFamily) -> Vec<LayerKind> {
        self.families
            .get(family)
            .map(|spec| spec.layers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Submodule names never walked into
    pub fn excluded_submodules(&self, family: &ModelFamily) -> &[&'static str] {
        self.families
            .get(family)
            .map(|spec| spec.excluded.as_slice())
            .unwrap_or(&[])
    }

    /// Method override attached to instances of `layer`
    pub fn method_override(&self, family: &ModelFamily, layer: LayerKind) -> Option<&MethodOverride> {
        self.families.get(family)?.overrides.get(&layer)
    }

    /// Why the family can never be fused, if it cannot
    pub fn cannot_support(&self, family: &ModelFamily) -> Option<&'static str> {
        self.cannot_support.get(family).copied()
    }

    /// Whether the family has native fused attention
    pub fn is_natively_supported(&self, family: &ModelFamily) -> bool {
        self.natively_supported.contains(family)
    }

    /// Supported families, sorted by identifier
    pub fn supported_families(&self) -> Vec<&ModelFamily> {
        let mut families: Vec<&ModelFamily> = self.families.keys().collect();
        families.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        families
    }

    /// Comma separated list of supported families
    pub fn supported_list(&self) -> String {
        self.supported_families()
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookups() {
        let registry = Registry::builtin();
        assert!(registry.supports(&ModelFamily::Bert));
        assert!(registry.requires_nested_tensor(&ModelFamily::Bert));
        assert!(registry.requires_strict_validation(&ModelFamily::Bert));
        assert_eq!(
            registry.fused_kind(&ModelFamily::Bert, LayerKind::BertLayer),
            Some(FusedKind::Bert)
        );
        assert_eq!(registry.fused_kind(&ModelFamily::Bert, LayerKind::RobertaLayer), None);
        assert!(registry.excluded_submodules(&ModelFamily::Bert).is_empty());
    }

    #[test]
    fn test_unknown_family() {
        let registry = Registry::builtin();
        let family = ModelFamily::from_id("mamba");
        assert!(!registry.supports(&family));
        assert!(!registry.requires_nested_tensor(&family));
        assert!(registry.target_layers(&family).is_empty());
        assert!(registry.excluded_submodules(&family).is_empty());
        assert!(registry.method_override(&family, LayerKind::OptDecoder).is_none());
        assert!(registry.cannot_support(&family).is_none());
    }

    #[test]
    fn test_decoder_families() {
        let registry = Registry::builtin();
        assert!(!registry.requires_nested_tensor(&ModelFamily::Gpt2));
        assert!(!registry.requires_strict_validation(&ModelFamily::Gpt2));
        assert!(registry.requires_strict_validation(&ModelFamily::Bark));
        assert!(!registry.requires_nested_tensor(&ModelFamily::Bark));
        assert_eq!(
            registry.target_layers(&ModelFamily::Bart),
            vec![LayerKind::BartEncoderLayer, LayerKind::BartAttention]
        );
    }

    #[test]
    fn test_exclusions_and_overrides() {
        let registry = Registry::builtin();
        assert_eq!(registry.excluded_submodules(&ModelFamily::Clip), &["text_model"]);
        assert_eq!(
            registry.excluded_submodules(&ModelFamily::Blip2),
            &["vision_model.encoder"]
        );
        assert_eq!(
            registry.method_override(&ModelFamily::Opt, LayerKind::OptDecoder),
            Some(&MethodOverride::SDPA_DECODER_MASK)
        );
    }

    #[test]
    fn test_unsupported_tables() {
        let registry = Registry::builtin();
        assert!(registry.cannot_support(&ModelFamily::DebertaV2).is_some());
        assert!(!registry.supports(&ModelFamily::DebertaV2));
        assert!(registry.is_natively_supported(&ModelFamily::Llama));
        assert!(!registry.supports(&ModelFamily::Llama));
        assert!(!registry.is_natively_supported(&ModelFamily::Bert));
    }

    #[test]
    fn test_supported_list_sorted() {
        let list = Registry::builtin().supported_list();
        assert!(list.starts_with("albert, bark, bart, bert"));
        assert!(!list.contains("llama"));
    }

    #[test]
    fn test_builder() {
        let registry = Registry::builder()
            .family(
                ModelFamily::Bert,
                FamilySpec::new([(LayerKind::BertLayer, FusedKind::Bert)])
                    .exclude(&["pooler"])
                    .nested_tensor(false),
            )
            .natively_supported(ModelFamily::Llama)
            .build();
        assert!(registry.supports(&ModelFamily::Bert));
        assert!(!registry.requires_nested_tensor(&ModelFamily::Bert));
        assert_eq!(registry.excluded_submodules(&ModelFamily::Bert), &["pooler"]);
        assert!(!registry.supports(&ModelFamily::Gpt2));
    }
}
