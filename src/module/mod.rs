//! Module tree
//!
//! An owned, ordered tree of named nodes. Each node is a container, a leaf
//! computational layer, a registered original layer or a fused layer, and
//! owns its parameters and buffers.
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::module::Module;
//! use bettertransformer::tensor::Initializer;
//!
//! let mut init = Initializer::default();
//! let root = Module::block("Encoder")
//!     .with_child("layer", Module::list(vec![Module::linear(&mut init, 4, 4, true)]));
//!
//! for (path, module) in root.named_modules() {
//!     println!("{path}: {}", module.class_name());
//! }
//! ```

pub mod behavior;
pub mod kind;
pub mod maps;
pub mod mutators;
pub mod node;
pub mod traversal;

pub use behavior::{MaskFn, MaskRequest, MethodKind, MethodOverride};
pub use kind::{LayerKind, LeafKind, ModuleKind, Quantization};
pub use maps::{is_under, join_path, split_last, ChildMap, TensorMap, PATH_SEPARATOR};
pub use node::Module;
pub use traversal::NamedModules;
