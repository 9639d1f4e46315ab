//! Module tree traversal
//!
//! Pre-order depth-first iteration over named submodules and their tensors.
//! The root is yielded first with the empty path.

use crate::tensor::Tensor;

use super::maps::{join_path, split_last, PATH_SEPARATOR};
use super::node::Module;

/// Pre-order DFS iterator over `(path, module)` pairs
pub struct NamedModules<'a> {
    stack: Vec<(String, &'a Module)>,
}

impl<'a> NamedModules<'a> {
    /// Start a traversal at `root`, reporting paths relative to `prefix`
    pub fn new(root: &'a Module, prefix: &str) -> Self {
        Self {
            stack: vec![(prefix.to_string(), root)],
        }
    }
}

impl<'a> Iterator for NamedModules<'a> {
    type Item = (String, &'a Module);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, module) = self.stack.pop()?;

        // Push in reverse so the first child is visited next
        for (name, child) in module.children.iter().rev() {
            self.stack.push((join_path(&path, name), child));
        }

        Some((path, module))
    }
}

impl Module {
    // ========================================================================
    // Traversal
    // ========================================================================

    /// All submodules (root included, path `""`) in pre-order
    pub fn named_modules(&self) -> NamedModules<'_> {
        NamedModules::new(self, "")
    }

    /// All parameters with dotted paths, module by module in pre-order
    pub fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        self.named_modules()
            .flat_map(|(prefix, m)| {
                m.parameters
                    .iter()
                    .map(move |(name, t)| (join_path(&prefix, name), t))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// All buffers with dotted paths, module by module in pre-order
    pub fn named_buffers(&self) -> Vec<(String, &Tensor)> {
        self.named_modules()
            .flat_map(|(prefix, m)| {
                m.buffers
                    .iter()
                    .map(move |(name, t)| (join_path(&prefix, name), t))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Parameters then buffers of each module, in pre-order
    pub fn state_dict(&self) -> Vec<(String, &Tensor)> {
        self.named_modules()
            .flat_map(|(prefix, m)| {
                m.parameters
                    .iter()
                    .chain(m.buffers.iter())
                    .map(move |(name, t)| (join_path(&prefix, name), t))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Total number of parameter elements
    pub fn num_parameters(&self) -> usize {
        self.named_parameters().iter().map(|(_, t)| t.numel()).sum()
    }

    /// Bytes of all parameters and buffers below (and in) this node
    pub fn nbytes(&self) -> usize {
        self.state_dict().iter().map(|(_, t)| t.nbytes()).sum()
    }

    // ========================================================================
    // Path lookup
    // ========================================================================

    /// Submodule at a dotted path (`""` is this node)
    pub fn get(&self, path: &str) -> Option<&Module> {
        if path.is_empty() {
            return Some(self);
        }
        path.split(PATH_SEPARATOR)
            .try_fold(self, |node, name| node.children.get(name))
    }

    /// Mutable submodule at a dotted path
    pub fn get_mut(&mut self, path: &str) -> Option<&mut Module> {
        if path.is_empty() {
            return Some(self);
        }
        path.split(PATH_SEPARATOR)
            .try_fold(self, |node, name| node.children.get_mut(name))
    }

    /// Parameter or buffer at a dotted path
    pub fn tensor(&self, path: &str) -> Option<&Tensor> {
        let (module_path, name) = split_last(path);
        let module = self.get(module_path)?;
        module
            .parameters
            .get(name)
            .or_else(|| module.buffers.get(name))
    }

    /// Whether a parameter or buffer exists at a dotted path
    pub fn has_tensor(&self, path: &str) -> bool {
        self.tensor(path).is_some()
    }
}
