//! In-process greedy device orchestrator

use std::collections::VecDeque;
use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::{TransformError, TransformResult};
use crate::io::offload::{offload_tensor, write_index, OffloadIndex};
use crate::model::Model;
use crate::module::{join_path, split_last, Module, ModuleKind};
use crate::tensor::Device;
use crate::traits::DeviceOrchestrator;

use super::{DeviceHook, DeviceMap, MaxMemory};

/// Greedy placement in declaration order
///
/// Top-level modules are assigned to the first device with room left.
/// Composite modules that do not fit are split into their children;
/// registered and fused layers are never split. What fits nowhere goes to
/// [`Device::Disk`].
#[derive(Debug, Clone, Default)]
pub struct LocalDispatcher;

impl LocalDispatcher {
    /// Create a dispatcher
    pub fn new() -> Self {
        Self
    }
}

enum Unit<'a> {
    Module(String, &'a Module),
    Tensor(String, usize),
}

impl Unit<'_> {
    fn size(&self) -> usize {
        match self {
            Unit::Module(_, m) => m.nbytes(),
            Unit::Tensor(_, size) => *size,
        }
    }

    fn path(&self) -> &str {
        match self {
            Unit::Module(path, _) | Unit::Tensor(path, _) => path,
        }
    }
}

fn splittable(module: &Module) -> bool {
    module.has_children() && !matches!(module.kind(), ModuleKind::Layer(_) | ModuleKind::Fused(_))
}

/// Children and own tensors of `module` as placement units
fn units_of<'a>(prefix: &str, module: &'a Module) -> Vec<Unit<'a>> {
    let mut units: Vec<Unit<'a>> = module
        .parameters()
        .chain(module.buffers())
        .map(|(name, t)| Unit::Tensor(join_path(prefix, name), t.nbytes()))
        .collect();
    units.extend(
        module
            .children()
            .map(|(name, child)| Unit::Module(join_path(prefix, name), child)),
    );
    units
}

impl DeviceOrchestrator for LocalDispatcher {
    fn infer_device_map(&self, model: &Model, max_memory: Option<&MaxMemory>) -> TransformResult<DeviceMap> {
        let Some(max_memory) = max_memory else {
            return Ok(DeviceMap::single(Device::Cpu));
        };

        let budgets: Vec<(Device, usize)> = max_memory.compute_devices().collect();
        let mut map = DeviceMap::new();
        let mut queue: VecDeque<Unit<'_>> = units_of("", model.root()).into();
        let mut slot = 0;
        let mut remaining = budgets.first().map(|(_, b)| *b).unwrap_or(0);

        while let Some(unit) = queue.pop_front() {
            let size = unit.size();
            loop {
                let Some((device, _)) = budgets.get(slot) else {
                    map.insert(unit.path(), Device::Disk);
                    break;
                };
                if size <= remaining {
                    map.insert(unit.path(), *device);
                    remaining -= size;
                    break;
                }
                if let Unit::Module(path, module) = &unit {
                    let module = *module;
                    if splittable(module) {
                        for part in units_of(path, module).into_iter().rev() {
                            queue.push_front(part);
                        }
                        break;
                    }
                }
                slot += 1;
                remaining = budgets.get(slot).map(|(_, b)| *b).unwrap_or(0);
            }
        }

        debug!(entries = map.len(), disk = map.uses_disk(), "inferred device map");
        Ok(map)
    }

    fn dispatch(&self, mut model: Model, map: &DeviceMap, offload_dir: Option<&Path>) -> TransformResult<Model> {
        let mut placement: FxHashMap<String, Device> = FxHashMap::default();
        let mut index = OffloadIndex::new();

        for (path, tensor) in model.root().state_dict() {
            let device = map
                .device_for(&path)
                .ok_or_else(|| TransformError::Dispatch(format!("'{path}' is not covered by the device map")))?;

            if device == Device::Disk && !tensor.is_placeholder() {
                let dir = offload_dir.ok_or_else(|| {
                    TransformError::Dispatch(
                        "the device map offloads to disk but no offload directory was given".to_string(),
                    )
                })?;
                index.insert(path.clone(), offload_tensor(dir, &path, tensor)?);
            }
            placement.insert(path, device);
        }

        if let Some(dir) = offload_dir.filter(|_| !index.is_empty()) {
            write_index(dir, &index)?;
        }

        model
            .root_mut()
            .for_each_tensor_mut("", &mut |path, tensor| {
                if let Some(device) = placement.get(path) {
                    tensor.to_device(*device);
                }
            });

        let mut hooks = 0;
        for (prefix, device) in map.iter() {
            let root = model.root_mut();
            let target = if root.get(prefix).is_some() {
                root.get_mut(prefix)
            } else {
                // Tensor-level entry: hook its owner
                root.get_mut(split_last(prefix).0)
            };
            if let Some(module) = target {
                module.attach_hook(DeviceHook::new(device));
                hooks += 1;
            }
        }

        info!(
            tensors = placement.len(),
            offloaded = index.len(),
            hooks,
            "dispatched model"
        );
        model.device_map = Some(map.clone());
        Ok(model)
    }

    fn remove_hooks(&self, model: &mut Model) -> usize {
        model.root_mut().remove_hooks()
    }
}
