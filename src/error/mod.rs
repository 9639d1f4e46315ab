//! Error types for bettertransformer
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

use crate::model::{Model, ModelFamily};
use crate::runtime::RuntimeVersion;

/// Main error type for layer substitution and reversal
#[derive(Error, Debug)]
pub enum TransformError {
    /// A node scheduled for fusion carries a quantization mode fused layers cannot hold
    #[error(
        "`load_in_8bit` and BetterTransformer are mutually exclusive: module '{path}' is \
         quantized, please pass a model that is not loaded in 8-bit"
    )]
    ConfigurationConflict {
        /// Dotted path of the quantized module
        path: String,
    },

    /// Model family absent from the registry
    #[error(
        "The model type {family} is not yet supported to be used with BetterTransformer. \
         Feel free to open an issue if you would like this model type to be supported. \
         Currently supported models are: {supported}"
    )]
    UnsupportedFamily {
        /// Family of the rejected model
        family: ModelFamily,
        /// Comma separated list of supported families
        supported: String,
    },

    /// Model family that can never be expressed with fused layers
    #[error(
        "The model type {family} can not be supported to be used with BetterTransformer. \
         The identified reason is: {reason}"
    )]
    CannotSupport {
        /// Family of the rejected model
        family: ModelFamily,
        /// Why the architecture cannot be fused
        reason: &'static str,
    },

    /// Transform called on a model already carrying the transformed marker
    #[error(
        "transform() was called on a model already using BetterTransformer modeling; \
         reverse it first"
    )]
    AlreadyTransformed,

    /// Family has first-class fused attention elsewhere
    #[error(
        "The model type {family} natively supports scaled dot product attention. \
         Load the model with the native attention implementation instead of converting it"
    )]
    NativelySupported {
        /// Family of the rejected model
        family: ModelFamily,
    },

    /// Numeric runtime older than the pinned minimum
    #[error("{operation} requires runtime >= {required} but {found} is installed, please upgrade")]
    VersionTooOld {
        /// Operation that was gated
        operation: &'static str,
        /// Version reported by the probe
        found: RuntimeVersion,
        /// Minimum accepted version
        required: RuntimeVersion,
    },

    /// Last-layer tagging found no eligible target
    #[error(
        "The transformation of the model {model_class} to BetterTransformer failed while it \
         should not: no fused layer could be tagged as last layer. The registry entry for \
         this model type is likely inconsistent with its architecture, please file a bug report"
    )]
    IntegrationDefect {
        /// Class name of the root model
        model_class: String,
    },

    /// Reverse called on a model that was never transformed
    #[error(
        "reverse() should be used on a model already transformed to the BetterTransformer \
         format, which appears to not be the case"
    )]
    InvalidReversalTarget,

    /// Save or publish attempted on a fused model
    #[error(
        "You are trying to save or push a model that has been converted with BetterTransformer. \
         Please revert the model to its original state before calling `save_pretrained` or \
         `push_to_hub`, by calling `reverse(&model)` first"
    )]
    IrreversibleOperationBlocked,

    /// Fused layer validation failed
    #[error("Invalid layer for BetterTransformer: {0}")]
    InvalidLayer(String),

    /// Module path not present in the tree
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    /// Parameter or buffer path not present in the tree
    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    /// Tensor shapes do not line up
    #[error("Shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Tensor name
        name: String,
        /// Expected shape
        expected: Vec<usize>,
        /// Actual shape
        actual: Vec<usize>,
    },

    /// Device placement failed
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Version string could not be parsed
    #[error("Invalid runtime version: {0}")]
    InvalidVersion(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for transform operations
pub type TransformResult<T> = Result<T, TransformError>;

/// A transform that failed before the input model was touched.
///
/// Returned by [`crate::transform::BetterTransformer::transform`], which takes
/// its input by value. `model` holds the caller's model back whenever the
/// failure happened before any mutation, which covers every precondition and
/// planning failure. It is `None` only when the external dispatcher failed
/// after the tree had already been fused.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct Rejected {
    /// What went wrong
    #[source]
    pub error: TransformError,
    /// The untouched input model, when it could be handed back
    pub model: Option<Box<Model>>,
}

impl Rejected {
    /// Failure that hands the untouched input back
    pub fn with_model(error: TransformError, model: Model) -> Self {
        Self {
            error,
            model: Some(Box::new(model)),
        }
    }

    /// Failure after the input was consumed
    pub fn consumed(error: TransformError) -> Self {
        Self { error, model: None }
    }

    /// Take the model back out, if it survived
    pub fn into_model(self) -> Option<Model> {
        self.model.map(|m| *m)
    }
}

impl From<Rejected> for TransformError {
    fn from(rejected: Rejected) -> Self {
        rejected.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransformError::ConfigurationConflict {
            path: "encoder.layer.0".to_string(),
        };
        assert!(err.to_string().contains("encoder.layer.0"));
        assert!(err.to_string().contains("8-bit"));
    }

    #[test]
    fn test_version_too_old() {
        let err = TransformError::VersionTooOld {
            operation: "reverse",
            found: RuntimeVersion::new(1, 13, 1),
            required: RuntimeVersion::new(2, 0, 0),
        };
        let msg = err.to_string();
        assert!(msg.contains("1.13.1"));
        assert!(msg.contains("2.0.0"));
    }

    #[test]
    fn test_integration_defect_names_class() {
        let err = TransformError::IntegrationDefect {
            model_class: "BertModel".to_string(),
        };
        assert!(err.to_string().contains("BertModel"));
        assert!(err.to_string().contains("registry"));
    }

    #[test]
    fn test_rejected_into_error() {
        let rejected = Rejected::consumed(TransformError::AlreadyTransformed);
        assert!(rejected.model.is_none());
        let err: TransformError = rejected.into();
        assert!(matches!(err, TransformError::AlreadyTransformed));
    }
}
