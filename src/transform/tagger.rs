//! Last-layer tagging
//!
//! Nested-tensor execution needs to know which fused layer closes the encoder
//! stack. The target is the first fused node (pre-order) inside the last
//! element of the largest `List` whose path mentions `encoder`. Only when no
//! such list exists is the first list made only of fused layers used instead,
//! with its last element tagged. An encoder list without a fused node in its
//! last element has no target at all.

use tracing::debug;

use crate::error::{TransformError, TransformResult};
use crate::model::ModelFamily;
use crate::module::{join_path, Module, NamedModules};
use crate::registry::Registry;

use super::substitute::{is_excluded, SubstitutionPlan};

const ENCODER_MARKER: &str = "encoder";

/// Find the path of the layer to tag
///
/// `fused` tells whether the node at a path is (or will be) a fused layer, so
/// the search also works on a tree whose substitution is only planned.
pub fn locate_last_layer<F>(root: &Module, excluded: &[&str], fused: F) -> Option<String>
where
    F: Fn(&str, &Module) -> bool,
{
    let lists: Vec<(String, &Module)> = root
        .named_modules()
        .filter(|(path, m)| m.is_list() && !is_excluded(path, excluded))
        .collect();

    let mut largest: Option<&(String, &Module)> = None;
    for entry in lists.iter().filter(|(path, _)| path.contains(ENCODER_MARKER)) {
        if largest.map_or(true, |(_, best)| entry.1.len() > best.len()) {
            largest = Some(entry);
        }
    }

    if let Some((path, list)) = largest {
        let (name, last) = list.last_child()?;
        let last_path = join_path(path, name);
        return NamedModules::new(last, &last_path)
            .find(|(p, m)| fused(p, m))
            .map(|(p, _)| p);
    }

    lists
        .iter()
        .find(|(path, list)| {
            !list.is_empty()
                && list
                    .children()
                    .all(|(name, child)| fused(&join_path(path, name), child))
        })
        .and_then(|(path, list)| list.last_child().map(|(name, _)| join_path(path, name)))
}

/// [`locate_last_layer`] over a tree whose substitution is planned
pub fn locate_planned(root: &Module, plan: &SubstitutionPlan, excluded: &[&str]) -> Option<String> {
    locate_last_layer(root, excluded, |path, m| m.is_fused() || plan.replaces(path))
}

/// Set `is_last_layer` on the fused node at `path`
///
/// Returns `false` when no fused node lives there.
pub fn mark_last_layer(root: &mut Module, path: &str) -> bool {
    match root.get_mut(path).and_then(Module::fused_layer_mut) {
        Some(layer) => {
            layer.is_last_layer = true;
            debug!(path, "tagged last layer");
            true
        }
        None => false,
    }
}

/// Tag the last fused layer of an already substituted tree
///
/// Returns the tagged path.
pub fn tag_last_layer(
    root: &mut Module,
    model_class: &str,
    family: &ModelFamily,
    registry: &Registry,
) -> TransformResult<String> {
    let excluded = registry.excluded_submodules(family);
    let defect = || TransformError::IntegrationDefect {
        model_class: model_class.to_string(),
    };

    let path = locate_last_layer(root, excluded, |_, m| m.is_fused()).ok_or_else(defect)?;
    if mark_last_layer(root, &path) {
        Ok(path)
    } else {
        Err(defect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::fused::{FusedKind, FusedLayer};
    use crate::model::{Model, ModelConfig};
    use crate::module::LayerKind;
    use crate::transform::substitute::{plan_substitution, replace_layers};

    fn substituted(arch: crate::model::Architecture, config: ModelConfig) -> Model {
        let mut model = Model::new(arch, config).unwrap();
        let config = model.config().clone();
        replace_layers(model.root_mut(), &config, Registry::builtin()).unwrap();
        model
    }

    fn fused_node() -> Module {
        let config = ModelConfig::tiny("bert");
        Module::fused(FusedLayer::new(FusedKind::Bert, LayerKind::BertLayer, &config))
    }

    fn fused_list(len: usize) -> Module {
        Module::list((0..len).map(|_| fused_node()))
    }

    fn tagged(model: &Model) -> Vec<String> {
        model
            .root()
            .named_modules()
            .filter(|(_, m)| m.fused_layer().is_some_and(|f| f.is_last_layer))
            .map(|(p, _)| p)
            .collect()
    }

    #[test]
    fn test_tag_bert() {
        let mut model = substituted(builder::BERT, ModelConfig::tiny("bert").with_layers(3));
        let family = model.family().clone();
        let path = tag_last_layer(model.root_mut(), "BertModel", &family, Registry::builtin()).unwrap();
        assert_eq!(path, "encoder.layer.2");
        assert_eq!(tagged(&model), vec!["encoder.layer.2"]);
    }

    #[test]
    fn test_planned_matches_applied() {
        let model = Model::new(builder::BART, ModelConfig::tiny("bart")).unwrap();
        let plan = plan_substitution(model.root(), model.config(), Registry::builtin()).unwrap();
        let planned = locate_planned(model.root(), &plan, &[]);

        let mut applied = model.clone();
        plan.apply(applied.root_mut());
        let located = locate_last_layer(applied.root(), &[], |_, m| m.is_fused());
        assert_eq!(planned, located);
        assert_eq!(planned.as_deref(), Some("encoder.layers.1"));
    }

    #[test]
    fn test_fallback_without_encoder_list() {
        let mut model = substituted(builder::DISTILBERT, ModelConfig::tiny("distilbert").with_layers(2));
        let family = model.family().clone();
        let path = tag_last_layer(model.root_mut(), "DistilBertModel", &family, Registry::builtin()).unwrap();
        assert_eq!(path, "transformer.layer.1");
    }

    #[test]
    fn test_excluded_lists_ignored() {
        let mut model = substituted(builder::CLIP, ModelConfig::tiny("clip").with_layers(2));
        let family = model.family().clone();
        let path = tag_last_layer(model.root_mut(), "CLIPModel", &family, Registry::builtin()).unwrap();
        assert_eq!(path, "vision_model.encoder.layers.1");
    }

    #[test]
    fn test_untransformed_tree_is_a_defect() {
        let mut model = Model::new(builder::BERT, ModelConfig::tiny("bert")).unwrap();
        let family = model.family().clone();
        let err = tag_last_layer(model.root_mut(), "BertModel", &family, Registry::builtin()).unwrap_err();
        assert!(matches!(
            err,
            TransformError::IntegrationDefect { ref model_class } if model_class == "BertModel"
        ));
    }

    #[test]
    fn test_mark_requires_fused_node() {
        let mut model = Model::new(builder::BERT, ModelConfig::tiny("bert")).unwrap();
        assert!(!mark_last_layer(model.root_mut(), "encoder.layer.0"));
        assert!(!mark_last_layer(model.root_mut(), "missing"));
    }

    #[test]
    fn test_encoder_list_without_target_skips_fallback() {
        let root = Module::block("Model")
            .with_child(
                "encoder",
                Module::block("Encoder")
                    .with_child("blocks", Module::list(vec![fused_node(), Module::dropout(0.1)])),
            )
            .with_child("stack", fused_list(2));
        assert_eq!(locate_last_layer(&root, &[], |_, m| m.is_fused()), None);

        let mut root = root;
        let err = tag_last_layer(&mut root, "Model", &ModelFamily::Bert, Registry::builtin()).unwrap_err();
        assert!(matches!(err, TransformError::IntegrationDefect { .. }));
        assert!(root.named_modules().all(|(_, m)| m.fused_layer().map_or(true, |f| !f.is_last_layer)));
    }

    #[test]
    fn test_largest_encoder_list_first_wins_ties() {
        let root = Module::block("Model")
            .with_child("encoder_a", fused_list(2))
            .with_child("encoder_b", fused_list(3))
            .with_child("encoder_c", fused_list(3));
        assert_eq!(
            locate_last_layer(&root, &[], |_, m| m.is_fused()).as_deref(),
            Some("encoder_b.2")
        );

        let root = root.with_child("encoder_d", fused_list(4));
        assert_eq!(
            locate_last_layer(&root, &[], |_, m| m.is_fused()).as_deref(),
            Some("encoder_d.3")
        );
    }
}
