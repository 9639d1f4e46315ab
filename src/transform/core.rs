//! Transform orchestrator
//!
//! Checks the preconditions, drives the substitution and the last-layer
//! tagging, marks the model, re-dispatches it across devices and installs the
//! save guard.

use std::fmt;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::dispatch::{LocalDispatcher, MaxMemory};
use crate::error::{Rejected, TransformError, TransformResult};
use crate::model::{Model, SaveGuard};
use crate::registry::Registry;
use crate::runtime::{require_runtime, FixedRuntime, MIN_RUNTIME_FOR_REVERSE, MIN_RUNTIME_FOR_TRANSFORM};
use crate::traits::{DeviceOrchestrator, RuntimeProbe};

use super::reverse::{rebuild, ReverseStats};
use super::substitute::{plan_substitution, SubstitutionPlan};
use super::tagger::{locate_planned, mark_last_layer};

/// Options of a transform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Budget used when the device map has to be recomputed
    pub max_memory: Option<MaxMemory>,
    /// Directory for disk-offloaded tensors
    pub offload_dir: Option<PathBuf>,
}

impl TransformOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the memory budget
    pub fn max_memory(mut self, max_memory: MaxMemory) -> Self {
        self.max_memory = Some(max_memory);
        self
    }

    /// Set the offload directory
    pub fn offload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.offload_dir = Some(dir.into());
        self
    }
}

/// Statistics from a transform run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformStats {
    /// Layers replaced by fused layers
    pub layers_replaced: usize,
    /// Instances that received a method override
    pub methods_overridden: usize,
    /// Submodules skipped because the family excludes them
    pub submodules_excluded: usize,
    /// Path of the layer tagged as last, for nested-tensor families
    pub last_layer: Option<String>,
    /// Dispatch hooks removed before substitution
    pub hooks_removed: usize,
    /// Whether the model was re-dispatched
    pub redispatched: bool,
}

struct Prepared {
    plan: SubstitutionPlan,
    last_layer: Option<String>,
}

/// Layer substitution engine
///
/// Holds the capability registry and the two collaborators it consults: the
/// runtime probe for version gates and the device orchestrator for models
/// spread across devices.
///
/// # Example
///
/// ```ignore
/// use bettertransformer::transform::{BetterTransformer, TransformOptions};
///
/// let engine = BetterTransformer::new();
/// let fused = engine.transform(model, &TransformOptions::default())?;
/// let original = engine.reverse(&fused)?;
/// ```
pub struct BetterTransformer<'r> {
    registry: &'r Registry,
    runtime: Box<dyn RuntimeProbe>,
    orchestrator: Box<dyn DeviceOrchestrator>,
}

impl BetterTransformer<'static> {
    /// Engine over the builtin registry, the native runtime and a local dispatcher
    pub fn new() -> Self {
        Self {
            registry: Registry::builtin(),
            runtime: Box::new(FixedRuntime::native()),
            orchestrator: Box::new(LocalDispatcher::new()),
        }
    }
}

impl Default for BetterTransformer<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BetterTransformer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BetterTransformer")
            .field("families", &self.registry.supported_families().len())
            .field("runtime", &self.runtime.version())
            .finish_non_exhaustive()
    }
}

impl<'r> BetterTransformer<'r> {
    /// Use another registry
    pub fn with_registry<'s>(self, registry: &'s Registry) -> BetterTransformer<'s> {
        BetterTransformer {
            registry,
            runtime: self.runtime,
            orchestrator: self.orchestrator,
        }
    }

    /// Use another runtime probe
    pub fn with_runtime(mut self, runtime: impl RuntimeProbe + 'static) -> Self {
        self.runtime = Box::new(runtime);
        self
    }

    /// Use another device orchestrator
    pub fn with_orchestrator(mut self, orchestrator: impl DeviceOrchestrator + 'static) -> Self {
        self.orchestrator = Box::new(orchestrator);
        self
    }

    /// Registry in use
    pub fn registry(&self) -> &Registry {
        self.registry
    }

    // ========================================================================
    // Transform
    // ========================================================================

    /// Replace every registered layer of `model` with its fused counterpart
    ///
    /// The model is consumed. Any failure detected before the tree is touched
    /// hands it back inside [`Rejected`]; only a failing re-dispatch loses it.
    pub fn transform(&self, model: Model, options: &TransformOptions) -> Result<Model, Rejected> {
        self.transform_with_stats(model, options).map(|(model, _)| model)
    }

    /// [`BetterTransformer::transform`] reporting what was done
    pub fn transform_with_stats(
        &self,
        model: Model,
        options: &TransformOptions,
    ) -> Result<(Model, TransformStats), Rejected> {
        let prepared = match self.check(&model).and_then(|_| self.prepare(&model)) {
            Ok(prepared) => prepared,
            Err(error) => return Err(Rejected::with_model(error, model)),
        };
        self.execute(model, prepared, options).map_err(Rejected::consumed)
    }

    /// Transform a deep copy of `model`, leaving it usable
    pub fn transform_keep_original(&self, model: &Model, options: &TransformOptions) -> TransformResult<Model> {
        self.check(model)?;
        let prepared = self.prepare(model)?;
        let (fused, _) = self.execute(model.clone(), prepared, options)?;
        Ok(fused)
    }

    fn check(&self, model: &Model) -> TransformResult<()> {
        require_runtime(self.runtime.as_ref(), "transform", MIN_RUNTIME_FOR_TRANSFORM)?;

        let family = model.family();
        if self.registry.is_natively_supported(family) {
            return Err(TransformError::NativelySupported {
                family: family.clone(),
            });
        }

        if model.use_bettertransformer() || model.root().named_modules().any(|(_, m)| m.is_fused()) {
            return Err(TransformError::AlreadyTransformed);
        }

        if let Some(reason) = self.registry.cannot_support(family) {
            return Err(TransformError::CannotSupport {
                family: family.clone(),
                reason,
            });
        }
        if !self.registry.supports(family) {
            return Err(TransformError::UnsupportedFamily {
                family: family.clone(),
                supported: self.registry.supported_list(),
            });
        }
        Ok(())
    }

    fn prepare(&self, model: &Model) -> TransformResult<Prepared> {
        let plan = plan_substitution(model.root(), model.config(), self.registry)?;

        let family = model.family();
        let last_layer = if self.registry.requires_nested_tensor(family) {
            let excluded = self.registry.excluded_submodules(family);
            let path = locate_planned(model.root(), &plan, excluded).ok_or_else(|| {
                TransformError::IntegrationDefect {
                    model_class: model.class_name().to_string(),
                }
            })?;
            Some(path)
        } else {
            None
        };

        Ok(Prepared { plan, last_layer })
    }

    fn execute(
        &self,
        mut model: Model,
        prepared: Prepared,
        options: &TransformOptions,
    ) -> TransformResult<(Model, TransformStats)> {
        let training = model.is_training();
        let mut stats = TransformStats::default();

        if model.device_map.is_some() {
            stats.hooks_removed = self.orchestrator.remove_hooks(&mut model);
        }

        let substitution = prepared.plan.apply(model.root_mut());
        stats.layers_replaced = substitution.replaced;
        stats.methods_overridden = substitution.overridden;
        stats.submodules_excluded = substitution.excluded;

        if let Some(path) = prepared.last_layer {
            if !mark_last_layer(model.root_mut(), &path) {
                return Err(TransformError::IntegrationDefect {
                    model_class: model.class_name().to_string(),
                });
            }
            stats.last_layer = Some(path);
        }

        model.use_bettertransformer = true;

        if let Some(previous) = model.device_map.take() {
            let map = if previous.covers_all(model.root()) {
                previous
            } else {
                self.orchestrator
                    .infer_device_map(&model, options.max_memory.as_ref())?
            };
            model = self
                .orchestrator
                .dispatch(model, &map, options.offload_dir.as_deref())?;
            stats.redispatched = true;
        }

        model.save_guard = SaveGuard::Blocked;

        if training {
            warn!(
                "The model is in training mode. Fused layers only speed up inference: \
                 padded batches are not supported while training, call eval() for the fast path"
            );
        }
        model.root_mut().set_training(training);

        info!(
            model = model.class_name(),
            family = %model.family(),
            replaced = stats.layers_replaced,
            overridden = stats.methods_overridden,
            last_layer = stats.last_layer.as_deref().unwrap_or("-"),
            "converted model to fused layers"
        );
        Ok((model, stats))
    }

    // ========================================================================
    // Reverse
    // ========================================================================

    /// Rebuild the original architecture from a transformed model
    pub fn reverse(&self, model: &Model) -> TransformResult<Model> {
        self.reverse_with_stats(model).map(|(model, _)| model)
    }

    /// [`BetterTransformer::reverse`] reporting what was done
    pub fn reverse_with_stats(&self, model: &Model) -> TransformResult<(Model, ReverseStats)> {
        if !model.use_bettertransformer() {
            return Err(TransformError::InvalidReversalTarget);
        }
        require_runtime(self.runtime.as_ref(), "reverse", MIN_RUNTIME_FOR_REVERSE)?;

        let (restored, stats) = rebuild(model, self.registry)?;
        info!(
            model = restored.class_name(),
            reverted = stats.layers_reverted,
            copied = stats.tensors_copied,
            "reverted fused layers"
        );
        Ok((restored, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::dispatch::DeviceMap;
    use crate::model::ModelConfig;
    use crate::runtime::RuntimeVersion;
    use crate::tensor::Device;

    fn bert(layers: usize) -> Model {
        Model::new(builder::BERT, ModelConfig::tiny("bert").with_layers(layers)).unwrap()
    }

    #[test]
    fn test_transform_bert() {
        let engine = BetterTransformer::new();
        let (fused, stats) = engine
            .transform_with_stats(bert(3), &TransformOptions::default())
            .unwrap();

        assert_eq!(stats.layers_replaced, 3);
        assert_eq!(stats.last_layer.as_deref(), Some("encoder.layer.2"));
        assert!(fused.use_bettertransformer());
        assert_eq!(fused.save_guard(), SaveGuard::Blocked);
        assert!(!stats.redispatched);
    }

    #[test]
    fn test_precondition_order() {
        let old = BetterTransformer::new().with_runtime(FixedRuntime::new(RuntimeVersion::new(1, 12, 1)));
        let llama = bert(1);
        let llama = Model::from_parts(
            builder::BERT,
            llama.config().clone().with_family("llama"),
            llama.root().clone(),
        );
        let err = old.transform(llama.clone(), &TransformOptions::default()).unwrap_err();
        assert!(matches!(err.error, TransformError::VersionTooOld { .. }));

        let err = BetterTransformer::new()
            .transform(llama, &TransformOptions::default())
            .unwrap_err();
        assert!(matches!(err.error, TransformError::NativelySupported { .. }));
    }

    #[test]
    fn test_rejected_hands_model_back() {
        let model = bert(1);
        let model = Model::from_parts(
            builder::BERT,
            model.config().clone().with_family("deberta-v2"),
            model.root().clone(),
        );
        let before = model.clone();

        let rejected = BetterTransformer::new()
            .transform(model, &TransformOptions::default())
            .unwrap_err();
        assert!(matches!(rejected.error, TransformError::CannotSupport { .. }));
        assert_eq!(rejected.into_model(), Some(before));
    }

    #[test]
    fn test_transform_twice() {
        let engine = BetterTransformer::new();
        let fused = engine.transform(bert(1), &TransformOptions::default()).unwrap();
        let err = engine.transform_keep_original(&fused, &TransformOptions::default()).unwrap_err();
        assert!(matches!(err, TransformError::AlreadyTransformed));
    }

    #[test]
    fn test_training_mode_restored() {
        let engine = BetterTransformer::new();
        let mut model = bert(2);
        model.eval();
        let fused = engine.transform(model, &TransformOptions::default()).unwrap();
        assert!(!fused.is_training());
        assert!(fused.root().named_modules().all(|(_, m)| !m.is_training()));
    }

    #[test]
    fn test_redispatch_reuses_covering_map() {
        let engine = BetterTransformer::new();
        let map = DeviceMap::new()
            .with("embeddings", Device::Cuda(0))
            .with("encoder", Device::Cuda(1))
            .with("pooler", Device::Cpu);
        let model = LocalDispatcher::new().dispatch(bert(2), &map, None).unwrap();
        assert!(model.root().get("encoder").unwrap().hook().is_some());

        let (fused, stats) = engine
            .transform_with_stats(model, &TransformOptions::default())
            .unwrap();
        assert_eq!(stats.hooks_removed, 3);
        assert!(stats.redispatched);
        assert_eq!(fused.device_map(), Some(&map));
        assert_eq!(
            fused.root().tensor("encoder.layer.1.in_proj_weight").unwrap().device(),
            Device::Cuda(1)
        );
    }

    #[test]
    fn test_reverse_requires_marker() {
        let err = BetterTransformer::new().reverse(&bert(1)).unwrap_err();
        assert!(matches!(err, TransformError::InvalidReversalTarget));
    }

    #[test]
    fn test_reverse_version_gate() {
        let fused = BetterTransformer::new()
            .transform(bert(1), &TransformOptions::default())
            .unwrap();
        let old = BetterTransformer::new().with_runtime(FixedRuntime::new(RuntimeVersion::new(1, 13, 1)));
        let err = old.reverse(&fused).unwrap_err();
        assert!(matches!(
            err,
            TransformError::VersionTooOld { operation: "reverse", .. }
        ));
    }
}
