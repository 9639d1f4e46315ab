//! Persistence
//!
//! - [`writer`]: guarded `save_pretrained` / `push_to_hub`
//! - [`snapshot`]: JSON state-dict snapshots
//! - [`offload`]: raw tensor files for disk offload
//!
//! # Example
//!
//! ```ignore
//! use bettertransformer::io::{read_config, StateSnapshot, WEIGHTS_NAME};
//!
//! model.save_pretrained("out/")?;
//! let config = read_config("out/")?;
//! let weights = StateSnapshot::read("out/weights.json")?;
//! ```

pub mod offload;
pub mod snapshot;
pub mod writer;

pub use offload::{
    load_offloaded, offload_file, offload_tensor, read_index, write_index, OffloadEntry,
    OffloadIndex, OFFLOAD_INDEX_NAME,
};
pub use snapshot::{StateSnapshot, TensorRecord};
pub use writer::{read_config, SaveStats, CONFIG_NAME, WEIGHTS_NAME};
