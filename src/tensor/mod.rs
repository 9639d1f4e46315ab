//! Tensor storage for module parameters and buffers
//!
//! This module provides the storage layer the module tree is built on:
//! - Dense `f32` data backed by `ndarray` ([`Tensor`])
//! - Device tags ([`device`])
//! - Placeholder ("meta") storage that records a shape but holds no data
//! - Row-wise stacking used by fused projections ([`shape`])
//! - Weight initializers for freshly built architectures ([`init`])
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::tensor::{Tensor, concat_rows, split_rows};
//!
//! let q = Tensor::from_vec(vec![1.0; 4], &[2, 2])?;
//! let k = Tensor::from_vec(vec![2.0; 4], &[2, 2])?;
//! let qk = concat_rows(&[&q, &k])?;
//! let parts = split_rows(&qk, 2)?;
//! ```

pub mod device;
pub mod init;
pub mod shape;

pub use device::Device;
pub use init::{InitMode, Initializer};
pub use shape::{concat_rows, numel, split_rows, Shape};

use ndarray::{ArrayD, IxDyn};

use crate::error::{TransformError, TransformResult};

/// Bytes per stored element
pub const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

#[derive(Debug, Clone, PartialEq)]
enum Storage {
    Dense(ArrayD<f32>),
    Placeholder,
}

/// A parameter or buffer
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    storage: Storage,
    device: Device,
}

impl Tensor {
    /// Wrap an existing array, placed on the CPU
    pub fn from_array(data: ArrayD<f32>) -> Self {
        Self {
            shape: data.shape().iter().copied().collect(),
            storage: Storage::Dense(data),
            device: Device::Cpu,
        }
    }

    /// Create from a flat vector and a shape
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> TransformResult<Self> {
        let expected = numel(shape);
        if data.len() != expected {
            return Err(TransformError::ShapeMismatch {
                name: "from_vec".to_string(),
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        let array = ArrayD::from_shape_vec(IxDyn(shape), data)
            .map_err(|e| TransformError::Internal(e.to_string()))?;
        Ok(Self::from_array(array))
    }

    /// Zero-filled tensor
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    /// Shape-only tensor on the `meta` device
    pub fn placeholder(shape: &[usize]) -> Self {
        Self {
            shape: shape.iter().copied().collect(),
            storage: Storage::Placeholder,
            device: Device::Meta,
        }
    }

    /// Tensor shape
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of elements
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Storage size in bytes (placeholders count as if materialized)
    pub fn nbytes(&self) -> usize {
        self.numel() * ELEMENT_SIZE
    }

    /// Current device
    pub fn device(&self) -> Device {
        self.device
    }

    /// Whether this tensor holds no data yet
    pub fn is_placeholder(&self) -> bool {
        matches!(self.storage, Storage::Placeholder)
    }

    /// Borrow the data, if materialized
    pub fn data(&self) -> Option<&ArrayD<f32>> {
        match &self.storage {
            Storage::Dense(array) => Some(array),
            Storage::Placeholder => None,
        }
    }

    /// Borrow the data or fail for placeholders
    pub fn array(&self) -> TransformResult<&ArrayD<f32>> {
        self.data().ok_or_else(|| {
            TransformError::Internal(format!(
                "tensor of shape {:?} is a placeholder without data",
                self.shape()
            ))
        })
    }

    /// Move to another device
    ///
    /// Placeholders stay on `meta` whatever the target.
    pub fn to_device(&mut self, device: Device) {
        if !self.is_placeholder() {
            self.device = device;
        }
    }

    /// Builder variant of [`Tensor::to_device`]
    pub fn on(mut self, device: Device) -> Self {
        self.to_device(device);
        self
    }

    /// Bit-exact equality of shape and data (placeholders compare by shape)
    pub fn bitwise_eq(&self, other: &Tensor) -> bool {
        if self.shape != other.shape {
            return false;
        }
        match (&self.storage, &other.storage) {
            (Storage::Dense(a), Storage::Dense(b)) => a
                .iter()
                .zip(b.iter())
                .all(|(x, y)| x.to_bits() == y.to_bits()),
            (Storage::Placeholder, Storage::Placeholder) => true,
            _ => false,
        }
    }

    /// Flat little-endian bytes of the data
    pub fn to_le_bytes(&self) -> TransformResult<Vec<u8>> {
        let array = self.array()?;
        let mut bytes = Vec::with_capacity(array.len() * ELEMENT_SIZE);
        for value in array.iter() {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_shape_check() {
        assert!(Tensor::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
        let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.numel(), 4);
        assert_eq!(t.nbytes(), 16);
        assert_eq!(t.device(), Device::Cpu);
    }

    #[test]
    fn test_placeholder() {
        let mut t = Tensor::placeholder(&[3, 4]);
        assert!(t.is_placeholder());
        assert_eq!(t.device(), Device::Meta);
        assert!(t.data().is_none());
        assert!(t.array().is_err());

        t.to_device(Device::Cuda(0));
        assert_eq!(t.device(), Device::Meta);
    }

    #[test]
    fn test_bitwise_eq() {
        let a = Tensor::from_vec(vec![0.0, 1.5], &[2]).unwrap();
        let b = Tensor::from_vec(vec![-0.0, 1.5], &[2]).unwrap();
        assert!(a.bitwise_eq(&a.clone()));
        // 0.0 == -0.0 numerically but not bitwise
        assert!(!a.bitwise_eq(&b));
        assert!(!a.bitwise_eq(&Tensor::placeholder(&[2])));
    }

    #[test]
    fn test_le_bytes() {
        let t = Tensor::from_vec(vec![1.0], &[1]).unwrap();
        assert_eq!(t.to_le_bytes().unwrap(), 1.0f32.to_le_bytes().to_vec());
    }
}
