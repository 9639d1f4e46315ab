//! Serializable state-dict snapshots

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::module::Module;
use crate::tensor::{Device, Tensor};

/// One tensor of a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    /// Shape
    pub shape: Vec<usize>,
    /// Device at snapshot time
    pub device: Device,
    /// Row-major data, absent for placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<f32>>,
}

impl TensorRecord {
    /// Record `tensor`
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            device: tensor.device(),
            data: tensor.data().map(|a| a.iter().copied().collect()),
        }
    }

    /// Rebuild the tensor
    pub fn to_tensor(&self) -> TransformResult<Tensor> {
        match &self.data {
            Some(data) => Ok(Tensor::from_vec(data.clone(), &self.shape)?.on(self.device)),
            None => Ok(Tensor::placeholder(&self.shape)),
        }
    }
}

/// Parameters and buffers keyed by dotted path, in tree order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateSnapshot {
    tensors: IndexMap<String, TensorRecord>,
}

impl StateSnapshot {
    /// Snapshot every parameter and buffer of `root`
    pub fn of(root: &Module) -> Self {
        Self {
            tensors: root
                .state_dict()
                .into_iter()
                .map(|(path, tensor)| (path, TensorRecord::of(tensor)))
                .collect(),
        }
    }

    /// Number of tensors
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Record by path
    pub fn get(&self, path: &str) -> Option<&TensorRecord> {
        self.tensors.get(path)
    }

    /// Records in tree order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorRecord)> {
        self.tensors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overwrite the tensors of `root` with this snapshot
    ///
    /// Every path must already exist in `root`.
    pub fn restore_into(&self, root: &mut Module) -> TransformResult<usize> {
        for (path, record) in &self.tensors {
            let tensor = record.to_tensor()?;
            let current = root
                .tensor(path)
                .ok_or_else(|| TransformError::TensorNotFound(path.clone()))?;
            if current.shape() != tensor.shape() {
                return Err(TransformError::ShapeMismatch {
                    name: path.clone(),
                    expected: current.shape().to_vec(),
                    actual: tensor.shape().to_vec(),
                });
            }
            root.set_tensor(path, tensor)?;
        }
        Ok(self.tensors.len())
    }

    /// Serialize to JSON bytes
    pub fn to_json(&self) -> TransformResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Read a snapshot written by `save_pretrained`
    pub fn read<P: AsRef<Path>>(path: P) -> TransformResult<Self> {
        let bytes = fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Initializer;

    fn tree(init: &mut Initializer) -> Module {
        Module::block("Root")
            .with_child("proj", Module::linear(init, 3, 2, true))
            .with_buffer("ids", Tensor::zeros(&[1, 3]))
    }

    #[test]
    fn test_snapshot_order() {
        let snapshot = StateSnapshot::of(&tree(&mut Initializer::default()));
        let paths: Vec<&str> = snapshot.iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["ids", "proj.weight", "proj.bias"]);
    }

    #[test]
    fn test_restore_into() {
        let source = tree(&mut Initializer::seeded(5));
        let snapshot = StateSnapshot::of(&source);

        let mut target = tree(&mut Initializer::placeholder());
        assert_eq!(snapshot.restore_into(&mut target).unwrap(), 3);
        assert!(target
            .tensor("proj.weight")
            .unwrap()
            .bitwise_eq(source.tensor("proj.weight").unwrap()));
    }

    #[test]
    fn test_restore_rejects_unknown_path() {
        let snapshot = StateSnapshot::of(&tree(&mut Initializer::default()));
        let mut other = Module::block("Root").with_child("proj", Module::dropout(0.1));
        assert!(snapshot.restore_into(&mut other).is_err());
    }

    #[test]
    fn test_placeholder_record() {
        let record = TensorRecord::of(&Tensor::placeholder(&[2, 2]));
        assert!(record.data.is_none());
        assert!(record.to_tensor().unwrap().is_placeholder());
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("data"));
    }
}
