//! Layer substitution and its reversal
//!
//! - [`BetterTransformer`]: the orchestrator (preconditions, marker, dispatch, guards)
//! - [`substitute`]: plan and apply the layer swap over the module tree
//! - [`tagger`]: mark the last fused layer for nested-tensor execution
//! - [`reverse`]: rebuild the original architecture from a fused model
//!
//! # Overview
//!
//! A transform never leaves a model half converted. Every check and every
//! fused layer is computed on the untouched tree first; only then is the tree
//! mutated, which cannot fail. The typical workflow is:
//!
//! 1. Build or load a [`Model`](crate::model::Model)
//! 2. Call [`BetterTransformer::transform`] (consumes it) or
//!    [`BetterTransformer::transform_keep_original`] (borrows it)
//! 3. Call [`BetterTransformer::reverse`] to get the original classes back
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::transform::{BetterTransformer, TransformOptions};
//!
//! let engine = BetterTransformer::new();
//! let fused = match engine.transform(model, &TransformOptions::default()) {
//!     Ok(fused) => fused,
//!     Err(rejected) => {
//!         eprintln!("{}", rejected.error);
//!         return Ok(rejected.into_model());
//!     }
//! };
//! let original = engine.reverse(&fused)?;
//! ```

pub mod core;
pub mod reverse;
pub mod substitute;
pub mod tagger;

pub use core::{BetterTransformer, TransformOptions, TransformStats};
pub use reverse::ReverseStats;
pub use substitute::{is_excluded, plan_substitution, replace_layers, SubstitutionPlan, SubstitutionStats};
pub use tagger::{locate_last_layer, locate_planned, mark_last_layer, tag_last_layer};
