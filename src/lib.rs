//! # BetterTransformer
//!
//! Swap the encoder layers and attention blocks of a transformer model for
//! fused inference layers, and swap them back.
//!
//! A model is an owned tree of named modules. Registered layer classes (for
//! example `BertLayer` or `GPT2Attention`) are replaced in place by fused
//! layers that carry their parameters in a packed layout together with the
//! mapping needed to restore the original layout exactly.
//!
//! ## Features
//!
//! - **Capability registry**: which layer of which model family fuses into what
//! - **Layer substitution**: planned on the untouched tree, applied without failure
//! - **Last-layer tagging**: for nested-tensor execution
//! - **Reversal**: bit-identical round trip back to the original classes
//! - **Device dispatch**: re-placement of models spread across devices
//! - **Persistence guards**: fused models refuse to be saved or published
//!
//! ## Example
//!
//! ```ignore
//! use bettertransformer::prelude::*;
//!
//! let model = Model::new(builder::BERT, ModelConfig::tiny("bert"))?;
//! let fused = transform(model)?;
//! let restored = reverse(&fused)?;
//! restored.save_pretrained("out/")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// ============================================================================
// Module declarations
// ============================================================================

pub mod builder;
pub mod dispatch;
pub mod error;
pub mod fused;
pub mod io;
pub mod model;
pub mod module;
pub mod registry;
pub mod runtime;
pub mod tensor;
pub mod traits;
pub mod transform;

// ============================================================================
// Prelude module for convenient imports
// ============================================================================

/// Prelude module - import commonly used types with `use bettertransformer::prelude::*`
pub mod prelude {
    pub use crate::builder;
    pub use crate::dispatch::{DeviceMap, LocalDispatcher, MaxMemory};
    pub use crate::error::{Rejected, TransformError, TransformResult};
    pub use crate::fused::{FusedKind, FusedLayer};
    pub use crate::model::{Model, ModelConfig, ModelFamily, SaveGuard};
    pub use crate::module::{LayerKind, Module};
    pub use crate::registry::Registry;
    pub use crate::runtime::{FixedRuntime, RuntimeVersion};
    pub use crate::tensor::{Device, Initializer, Tensor};
    pub use crate::traits::{DeviceOrchestrator, Publisher, RuntimeProbe};
    pub use crate::transform::{BetterTransformer, TransformOptions, TransformStats};
    pub use crate::{reverse, transform, transform_keep_original};
}

// ============================================================================
// Crate-level re-exports
// ============================================================================

pub use error::{Rejected, TransformError, TransformResult};
pub use model::Model;
pub use transform::{BetterTransformer, TransformOptions};

// ============================================================================
// Default entry points
// ============================================================================

/// Transform `model` with the default engine, consuming it
///
/// On failure before any mutation the model is handed back in [`Rejected`].
pub fn transform(model: Model) -> Result<Model, Rejected> {
    BetterTransformer::new().transform(model, &TransformOptions::default())
}

/// Transform a copy of `model` with the default engine
pub fn transform_keep_original(model: &Model) -> TransformResult<Model> {
    BetterTransformer::new().transform_keep_original(model, &TransformOptions::default())
}

/// Reverse a transformed model with the default engine
pub fn reverse(model: &Model) -> TransformResult<Model> {
    BetterTransformer::new().reverse(model)
}

// ============================================================================
// Version information
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_free_functions() {
        let model = Model::new(builder::BERT, model::ModelConfig::tiny("bert")).unwrap();
        let fused = transform_keep_original(&model).unwrap();
        let restored = reverse(&fused).unwrap();
        assert!(restored.state_eq(&model));
        assert!(transform(model).is_ok());
    }
}
