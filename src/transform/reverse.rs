//! Reversal of a transform
//!
//! A fresh instance of the original architecture is built on placeholder
//! storage, every fused layer is reverted into the matching fresh layer and
//! the remaining tensors are copied over from the fused model. The result has
//! no dispatch hooks and no device map, and all of its tensors live on `cpu`.

use tracing::{debug, warn};

use crate::error::{TransformError, TransformResult};
use crate::model::{Model, ModelFamily};
use crate::module::LayerKind;
use crate::registry::Registry;
use crate::tensor::{Device, Initializer};

use super::substitute::is_excluded;

// These cannot be built on placeholder storage
fn materialized(family: &ModelFamily) -> bool {
    matches!(family, ModelFamily::Wav2Vec2 | ModelFamily::Hubert | ModelFamily::Bark)
}

/// Counters of one reversal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverseStats {
    /// Fused layers turned back into their original class
    pub layers_reverted: usize,
    /// Tensors copied outside the reverted layers
    pub tensors_copied: usize,
    /// Registered layers left alone because no fused node was found
    pub layers_skipped: usize,
}

fn fresh_initializer(family: &ModelFamily) -> Initializer {
    if materialized(family) {
        warn!(
            family = %family,
            "this architecture cannot be rebuilt on placeholder storage; the model \
             is materialized in memory during reversal, expect a peak of twice its size"
        );
        Initializer::default_values()
    } else {
        Initializer::placeholder()
    }
}

fn under_any(path: &str, covered: &[String]) -> bool {
    covered.iter().any(|prefix| path.starts_with(prefix.as_str()))
}

/// Rebuild the original model from `fused`
pub(crate) fn rebuild(fused: &Model, registry: &Registry) -> TransformResult<(Model, ReverseStats)> {
    let family = fused.family();
    let excluded = registry.excluded_submodules(family);

    let mut init = fresh_initializer(family);
    let mut restored = Model::build(fused.architecture(), fused.config().clone(), &mut init)?;
    restored.root_mut().set_training(fused.is_training());

    let mut stats = ReverseStats::default();
    let modules: Vec<(String, Option<LayerKind>)> = restored
        .root()
        .named_modules()
        .map(|(path, m)| (path, m.layer_kind()))
        .collect();

    let mut covered: Vec<String> = Vec::new();
    for (path, layer) in modules {
        if path.is_empty() || under_any(&path, &covered) || is_excluded(&path, excluded) {
            continue;
        }
        let Some(layer) = layer.filter(|l| registry.fused_kind(family, *l).is_some()) else {
            continue;
        };

        let node = match fused.root().get(&path) {
            Some(node) if node.is_fused() => node,
            _ => {
                debug!(path = %path, layer = %layer, "no fused layer to revert");
                stats.layers_skipped += 1;
                continue;
            }
        };

        let template = restored
            .root()
            .get(&path)
            .cloned()
            .ok_or_else(|| TransformError::ModuleNotFound(path.clone()))?;
        let original = node.revert_fused(template)?;
        restored.root_mut().set_module(&path, original)?;

        debug!(path = %path, layer = %layer, "reverted layer");
        stats.layers_reverted += 1;
        covered.push(format!("{path}."));
    }

    let pending: Vec<String> = restored
        .root()
        .state_dict()
        .into_iter()
        .filter(|(path, tensor)| !under_any(path, &covered) || tensor.is_placeholder())
        .map(|(path, _)| path)
        .collect();

    for path in pending {
        let tensor = fused
            .root()
            .tensor(&path)
            .cloned()
            .ok_or_else(|| TransformError::TensorNotFound(path.clone()))?;
        restored.root_mut().set_tensor(&path, tensor)?;
        stats.tensors_copied += 1;
    }

    restored.root_mut().remove_hooks();
    restored.root_mut().to_device(Device::Cpu);
    Ok((restored, stats))
}
