//! Layer substitution
//!
//! Walks the module tree depth-first in declaration order and swaps every
//! registered layer for its fused counterpart. The walk is split in two:
//!
//! 1. [`plan_substitution`] reads the tree, builds every fused node and
//!    collects the instance overrides. All failures happen here.
//! 2. [`SubstitutionPlan::apply`] installs the result and cannot fail.
//!
//! A caller therefore never observes a half-substituted tree.

use tracing::{debug, warn};

use crate::error::{TransformError, TransformResult};
use crate::model::{ModelConfig, ModelFamily};
use crate::module::{is_under, join_path, MethodOverride, Module, PATH_SEPARATOR};
use crate::registry::Registry;

/// Counters of one substitution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionStats {
    /// Registered layers replaced by fused layers
    pub replaced: usize,
    /// Instances that received a method override
    pub overridden: usize,
    /// Submodules skipped because the family excludes them
    pub excluded: usize,
}

/// Fused nodes and overrides ready to be installed
#[derive(Debug, Clone, Default)]
pub struct SubstitutionPlan {
    replacements: Vec<(String, Module)>,
    overrides: Vec<(String, MethodOverride)>,
    excluded: usize,
}

impl SubstitutionPlan {
    /// Paths that will hold fused layers, in walk order
    pub fn replaced_paths(&self) -> impl Iterator<Item = &str> {
        self.replacements.iter().map(|(path, _)| path.as_str())
    }

    /// Whether `path` will hold a fused layer
    pub fn replaces(&self, path: &str) -> bool {
        self.replacements.iter().any(|(p, _)| p == path)
    }

    /// Paths that will receive an instance override
    pub fn overridden_paths(&self) -> impl Iterator<Item = &str> {
        self.overrides.iter().map(|(path, _)| path.as_str())
    }

    /// Whether nothing would change
    pub fn is_empty(&self) -> bool {
        self.replacements.is_empty() && self.overrides.is_empty()
    }

    /// Install the plan into the tree it was computed from
    pub fn apply(self, root: &mut Module) -> SubstitutionStats {
        let mut stats = SubstitutionStats {
            excluded: self.excluded,
            ..Default::default()
        };

        for (path, behavior) in self.overrides {
            match root.get_mut(&path) {
                Some(node) => {
                    node.set_behavior(behavior);
                    stats.overridden += 1;
                }
                None => warn!(path = %path, "override target vanished"),
            }
        }

        for (path, fused) in self.replacements {
            let class = fused.class_name().to_string();
            match root.set_module(&path, fused) {
                Ok(original) => {
                    debug!(path = %path, original = original.class_name(), fused = %class, "replaced layer");
                    stats.replaced += 1;
                }
                Err(err) => warn!(path = %path, error = %err, "replacement target vanished"),
            }
        }

        stats
    }
}

/// Whether `path` is an excluded submodule or lies below one
///
/// Entries match either a single path segment (`text_model`) or a dotted
/// prefix (`vision_model.encoder`).
pub fn is_excluded(path: &str, excluded: &[&str]) -> bool {
    excluded.iter().any(|name| {
        is_under(path, name) || path.split(PATH_SEPARATOR).any(|segment| segment == *name)
    })
}

struct Walk<'a> {
    config: &'a ModelConfig,
    registry: &'a Registry,
    family: &'a ModelFamily,
    excluded: &'a [&'static str],
    strict: bool,
    plan: SubstitutionPlan,
}

impl Walk<'_> {
    fn visit(&mut self, node: &Module, prefix: &str) -> TransformResult<()> {
        for (name, child) in node.children() {
            let path = join_path(prefix, name);

            if child.quantization().is_some_and(|q| q.conflicts_with_fusion()) {
                return Err(TransformError::ConfigurationConflict { path });
            }

            let layer = child.layer_kind();
            if let Some(kind) = layer.and_then(|l| self.registry.fused_kind(self.family, l)) {
                check_quantized_descendants(child, &path)?;
                let fused = kind.build(child, self.config, self.strict)?;
                self.plan.replacements.push((path, fused));
                continue;
            }

            if let Some(behavior) = layer.and_then(|l| self.registry.method_override(self.family, l)) {
                self.plan.overrides.push((path.clone(), *behavior));
            }

            if !child.has_children() || child.is_fused() {
                continue;
            }
            if is_excluded(&path, self.excluded) {
                debug!(path = %path, "skipping excluded submodule");
                self.plan.excluded += 1;
                continue;
            }
            self.visit(child, &path)?;
        }
        Ok(())
    }
}

fn check_quantized_descendants(layer: &Module, path: &str) -> TransformResult<()> {
    match layer
        .named_modules()
        .find(|(_, m)| m.quantization().is_some_and(|q| q.conflicts_with_fusion()))
    {
        Some((inner, _)) => Err(TransformError::ConfigurationConflict {
            path: join_path(path, &inner),
        }),
        None => Ok(()),
    }
}

/// Compute the substitution of `root` without touching it
pub fn plan_substitution(
    root: &Module,
    config: &ModelConfig,
    registry: &Registry,
) -> TransformResult<SubstitutionPlan> {
    let family = &config.model_type;
    let mut walk = Walk {
        config,
        registry,
        family,
        excluded: registry.excluded_submodules(family),
        strict: registry.requires_strict_validation(family),
        plan: SubstitutionPlan::default(),
    };
    walk.visit(root, "")?;
    Ok(walk.plan)
}

/// Plan and apply in one step
///
/// On error `root` is left as it was.
pub fn replace_layers(
    root: &mut Module,
    config: &ModelConfig,
    registry: &Registry,
) -> TransformResult<SubstitutionStats> {
    let plan = plan_substitution(root, config, registry)?;
    Ok(plan.apply(root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::fused::FusedKind;
    use crate::model::Model;
    use crate::module::{LayerKind, MethodKind, Quantization};

    fn bert(layers: usize) -> Model {
        Model::new(builder::BERT, ModelConfig::tiny("bert").with_layers(layers)).unwrap()
    }

    #[test]
    fn test_replace_bert_layers() {
        let mut model = bert(3);
        let config = model.config().clone();
        let stats = replace_layers(model.root_mut(), &config, Registry::builtin()).unwrap();

        assert_eq!(stats.replaced, 3);
        for i in 0..3 {
            let node = model.root().get(&format!("encoder.layer.{i}")).unwrap();
            assert_eq!(node.fused_layer().unwrap().kind(), FusedKind::Bert);
        }
        assert_eq!(model.root().get("pooler").unwrap().class_name(), "BertPooler");
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let model = bert(2);
        let plan = plan_substitution(model.root(), model.config(), Registry::builtin()).unwrap();
        assert_eq!(
            plan.replaced_paths().collect::<Vec<_>>(),
            vec!["encoder.layer.0", "encoder.layer.1"]
        );
        assert!(plan.replaces("encoder.layer.1"));
        assert!(!model.root().named_modules().any(|(_, m)| m.is_fused()));
    }

    #[test]
    fn test_quantized_layer_conflicts() {
        let mut model = bert(2);
        let quantized = model
            .root()
            .get("encoder.layer.1.output.dense")
            .unwrap()
            .clone()
            .with_quantization(Quantization::LlmInt8);
        model
            .root_mut()
            .set_module("encoder.layer.1.output.dense", quantized)
            .unwrap();
        let before = model.clone();

        let config = model.config().clone();
        let err = replace_layers(model.root_mut(), &config, Registry::builtin()).unwrap_err();
        match err {
            TransformError::ConfigurationConflict { path } => {
                assert_eq!(path, "encoder.layer.1.output.dense")
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(model, before);
    }

    #[test]
    fn test_excluded_submodule_untouched() {
        let model = Model::new(builder::CLIP, ModelConfig::tiny("clip")).unwrap();
        let plan = plan_substitution(model.root(), model.config(), Registry::builtin()).unwrap();
        assert!(plan.replaced_paths().all(|p| p.starts_with("vision_model.")));
        assert!(plan.replaced_paths().count() > 0);
    }

    #[test]
    fn test_override_attached_per_instance() {
        let mut model = Model::new(builder::OPT, ModelConfig::tiny("opt")).unwrap();
        let config = model.config().clone();
        let stats = replace_layers(model.root_mut(), &config, Registry::builtin()).unwrap();

        assert_eq!(stats.overridden, 1);
        let decoder = model.root().get("decoder").unwrap();
        assert_eq!(
            decoder.behavior().map(|b| b.method()),
            Some(MethodKind::PrepareDecoderAttentionMask)
        );
        let fresh = Model::new(builder::OPT, ModelConfig::tiny("opt")).unwrap();
        assert!(fresh.root().get("decoder").unwrap().behavior().is_none());
        assert_eq!(
            model.root().get("decoder.layers.0.self_attn").unwrap().fused_layer().unwrap().original(),
            LayerKind::OptAttention
        );
    }

    #[test]
    fn test_unsupported_family_plans_nothing() {
        let model = bert(1);
        let config = model.config().clone().with_family("llama");
        let plan = plan_substitution(model.root(), &config, Registry::builtin()).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_is_excluded() {
        assert!(is_excluded("text_model", &["text_model"]));
        assert!(is_excluded("text_model.encoder.layers", &["text_model"]));
        assert!(is_excluded("vision_model.encoder", &["vision_model.encoder"]));
        assert!(is_excluded("vision_model.encoder.layers.0", &["vision_model.encoder"]));
        assert!(!is_excluded("vision_model", &["vision_model.encoder"]));
        assert!(!is_excluded("text_model_extra", &["text_model"]));
    }
}
