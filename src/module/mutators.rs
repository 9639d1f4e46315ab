//! Module tree mutation operations
//!
//! Methods for modifying the tree: swapping children, overwriting tensors,
//! switching modes and attaching per-instance state.

use crate::dispatch::DeviceHook;
use crate::error::{TransformError, TransformResult};
use crate::tensor::{Device, Tensor};

use super::behavior::MethodOverride;
use super::maps::split_last;
use super::node::Module;

impl Module {
    // ========================================================================
    // Child mutation
    // ========================================================================

    /// Replace an existing child, keeping its position
    ///
    /// Returns the previous child, or `None` (and inserts nothing) when no
    /// child has that name.
    pub fn replace_child(&mut self, name: &str, child: Module) -> Option<Module> {
        let slot = self.children.get_mut(name)?;
        Some(std::mem::replace(slot, child))
    }

    /// Replace the submodule at a dotted path
    pub fn set_module(&mut self, path: &str, module: Module) -> TransformResult<Module> {
        if path.is_empty() {
            return Ok(std::mem::replace(self, module));
        }
        let (parent_path, name) = split_last(path);
        let parent = self
            .get_mut(parent_path)
            .ok_or_else(|| TransformError::ModuleNotFound(parent_path.to_string()))?;
        parent
            .replace_child(name, module)
            .ok_or_else(|| TransformError::ModuleNotFound(path.to_string()))
    }

    // ========================================================================
    // Tensor mutation
    // ========================================================================

    /// Overwrite an existing parameter or buffer at a dotted path
    pub fn set_tensor(&mut self, path: &str, tensor: Tensor) -> TransformResult<Tensor> {
        let (module_path, name) = split_last(path);
        let module = self
            .get_mut(module_path)
            .ok_or_else(|| TransformError::ModuleNotFound(module_path.to_string()))?;

        if let Some(slot) = module.parameters.get_mut(name) {
            return Ok(std::mem::replace(slot, tensor));
        }
        if let Some(slot) = module.buffers.get_mut(name) {
            return Ok(std::mem::replace(slot, tensor));
        }
        Err(TransformError::TensorNotFound(path.to_string()))
    }

    /// Insert or overwrite an own parameter
    pub fn set_parameter(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.parameters.insert(name.into(), tensor);
    }

    /// Insert or overwrite an own buffer
    pub fn set_buffer(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.buffers.insert(name.into(), tensor);
    }

    /// Visit every parameter and buffer below this node with its path
    pub fn for_each_tensor_mut<F>(&mut self, prefix: &str, f: &mut F)
    where
        F: FnMut(&str, &mut Tensor),
    {
        for (name, tensor) in self
            .parameters
            .iter_mut()
            .chain(self.buffers.iter_mut())
        {
            let path = super::maps::join_path(prefix, name);
            f(&path, tensor);
        }
        for (name, child) in self.children.iter_mut() {
            let path = super::maps::join_path(prefix, name);
            child.for_each_tensor_mut(&path, f);
        }
    }

    /// Move every tensor below this node to `device`
    pub fn to_device(&mut self, device: Device) {
        self.for_each_tensor_mut("", &mut |_, t| t.to_device(device));
    }

    // ========================================================================
    // Modes and per-instance state
    // ========================================================================

    /// Set training mode on this node and all descendants
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        if let Some(fused) = self.fused_layer_mut() {
            fused.training = training;
        }
        for child in self.children.values_mut() {
            child.set_training(training);
        }
    }

    /// Switch to training mode
    pub fn train(&mut self) {
        self.set_training(true);
    }

    /// Switch to evaluation mode
    pub fn eval(&mut self) {
        self.set_training(false);
    }

    /// Attach an instance-level behaviour override
    pub fn set_behavior(&mut self, behavior: MethodOverride) {
        self.behavior = Some(behavior);
    }

    /// Attach a dispatch hook to this node
    pub fn attach_hook(&mut self, hook: DeviceHook) {
        self.hook = Some(hook);
    }

    /// Remove dispatch hooks from this node and all descendants
    ///
    /// Returns the number of hooks removed.
    pub fn remove_hooks(&mut self) -> usize {
        let mut removed = usize::from(self.hook.take().is_some());
        for child in self.children.values_mut() {
            removed += child.remove_hooks();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Initializer;

    fn make_tree() -> Module {
        let mut init = Initializer::default();
        Module::block("Root").with_child(
            "layers",
            Module::list(vec![
                Module::linear(&mut init, 2, 2, true),
                Module::linear(&mut init, 2, 2, true),
            ]),
        )
    }

    #[test]
    fn test_replace_child_keeps_order() {
        let mut tree = make_tree();
        let layers = tree.child_mut("layers").unwrap();
        let old = layers.replace_child("0", Module::dropout(0.5)).unwrap();
        assert_eq!(old.class_name(), "Linear");

        let names: Vec<(&str, &str)> = layers.children().map(|(n, m)| (n, m.class_name())).collect();
        assert_eq!(names, vec![("0", "Dropout"), ("1", "Linear")]);

        assert!(layers.replace_child("7", Module::dropout(0.5)).is_none());
        assert_eq!(layers.len(), 2);
    }

    #[test]
    fn test_set_module_by_path() {
        let mut tree = make_tree();
        tree.set_module("layers.1", Module::dropout(0.1)).unwrap();
        assert_eq!(tree.get("layers.1").unwrap().class_name(), "Dropout");
        assert!(tree.set_module("layers.9", Module::dropout(0.1)).is_err());
        assert!(tree.set_module("missing.0", Module::dropout(0.1)).is_err());
    }

    #[test]
    fn test_set_tensor() {
        let mut tree = make_tree();
        let replacement = Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap();
        tree.set_tensor("layers.0.bias", replacement.clone()).unwrap();
        assert!(tree.tensor("layers.0.bias").unwrap().bitwise_eq(&replacement));

        let err = tree.set_tensor("layers.0.scale", replacement).unwrap_err();
        assert!(matches!(err, TransformError::TensorNotFound(_)));
    }

    #[test]
    fn test_training_mode_recursive() {
        let mut tree = make_tree();
        tree.eval();
        assert!(tree.named_modules().all(|(_, m)| !m.is_training()));
        tree.train();
        assert!(tree.named_modules().all(|(_, m)| m.is_training()));
    }

    #[test]
    fn test_hooks() {
        let mut tree = make_tree();
        tree.attach_hook(DeviceHook::new(Device::Cpu));
        tree.child_mut("layers")
            .unwrap()
            .attach_hook(DeviceHook::new(Device::Cuda(0)));
        assert_eq!(tree.remove_hooks(), 2);
        assert!(tree.named_modules().all(|(_, m)| m.hook().is_none()));
    }

    #[test]
    fn test_to_device() {
        let mut tree = make_tree();
        tree.to_device(Device::Cuda(1));
        assert!(tree
            .named_parameters()
            .iter()
            .all(|(_, t)| t.device() == Device::Cuda(1)));
    }
}
