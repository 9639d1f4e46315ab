//! Weight initialization for freshly constructed architectures

use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Tensor;

/// How new tensors are filled
#[derive(Debug, Clone)]
pub enum InitMode {
    /// Shape only, no data (the `meta` device)
    Placeholder,
    /// Zero weights, unit norm scales
    Default,
    /// Uniform noise from a seeded generator
    Random(StdRng),
}

/// Source of parameter and buffer tensors for architecture builders
#[derive(Debug, Clone)]
pub struct Initializer {
    mode: InitMode,
    range: f32,
}

impl Initializer {
    /// Placeholder tensors for every parameter and buffer
    pub fn placeholder() -> Self {
        Self {
            mode: InitMode::Placeholder,
            range: 0.0,
        }
    }

    /// Deterministic default values
    pub fn default_values() -> Self {
        Self {
            mode: InitMode::Default,
            range: 0.0,
        }
    }

    /// Uniform noise in `[-0.05, 0.05)` from `seed`
    pub fn seeded(seed: u64) -> Self {
        Self {
            mode: InitMode::Random(StdRng::seed_from_u64(seed)),
            range: 0.05,
        }
    }

    /// Whether tensors come out as placeholders
    pub fn is_placeholder(&self) -> bool {
        matches!(self.mode, InitMode::Placeholder)
    }

    /// Projection / embedding weight
    pub fn weight(&mut self, shape: &[usize]) -> Tensor {
        self.fill(shape, 0.0)
    }

    /// Bias vector
    pub fn bias(&mut self, len: usize) -> Tensor {
        self.fill(&[len], 0.0)
    }

    /// Normalization scale, centered on one
    pub fn scale(&mut self, len: usize) -> Tensor {
        self.fill(&[len], 1.0)
    }

    /// Buffer with fixed content (position ids, causal masks)
    pub fn buffer(&mut self, data: ArrayD<f32>) -> Tensor {
        if self.is_placeholder() {
            return Tensor::placeholder(data.shape());
        }
        Tensor::from_array(data)
    }

    fn fill(&mut self, shape: &[usize], center: f32) -> Tensor {
        let range = self.range;
        match &mut self.mode {
            InitMode::Placeholder => Tensor::placeholder(shape),
            InitMode::Default => Tensor::from_array(ArrayD::from_elem(IxDyn(shape), center)),
            InitMode::Random(rng) => {
                let array =
                    ArrayD::from_shape_simple_fn(IxDyn(shape), || center + rng.gen_range(-range..range));
                Tensor::from_array(array)
            }
        }
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::default_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_mode() {
        let mut init = Initializer::placeholder();
        assert!(init.weight(&[4, 4]).is_placeholder());
        assert!(init.buffer(ArrayD::zeros(IxDyn(&[1, 8]))).is_placeholder());
    }

    #[test]
    fn test_default_mode() {
        let mut init = Initializer::default();
        let scale = init.scale(3);
        assert!(scale.data().unwrap().iter().all(|&v| v == 1.0));
        let bias = init.bias(3);
        assert!(bias.data().unwrap().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = Initializer::seeded(7).weight(&[3, 5]);
        let b = Initializer::seeded(7).weight(&[3, 5]);
        let c = Initializer::seeded(8).weight(&[3, 5]);
        assert!(a.bitwise_eq(&b));
        assert!(!a.bitwise_eq(&c));
        assert!(a.data().unwrap().iter().all(|v| v.abs() < 0.05));
    }
}
