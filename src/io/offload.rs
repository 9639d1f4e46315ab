//! Disk offload files
//!
//! Offloaded tensors are written as raw little-endian `f32` files named after
//! their dotted path, next to an `offload_index.json` describing each one.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{TransformError, TransformResult};
use crate::tensor::Tensor;

/// Name of the index file
pub const OFFLOAD_INDEX_NAME: &str = "offload_index.json";

/// Index entry of one offloaded tensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffloadEntry {
    /// Element type
    pub dtype: String,
    /// Shape
    pub shape: Vec<usize>,
}

/// Path → entry, in write order
pub type OffloadIndex = IndexMap<String, OffloadEntry>;

/// File holding the data of `path`
pub fn offload_file(dir: &Path, path: &str) -> PathBuf {
    dir.join(format!("{path}.dat"))
}

/// Write one tensor under `dir`
pub fn offload_tensor(dir: &Path, path: &str, tensor: &Tensor) -> TransformResult<OffloadEntry> {
    let bytes = tensor.to_le_bytes()?;
    let file = File::create(offload_file(dir, path))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&bytes)?;
    writer.flush()?;

    Ok(OffloadEntry {
        dtype: "float32".to_string(),
        shape: tensor.shape().to_vec(),
    })
}

/// Write the index, merging with an existing one
pub fn write_index(dir: &Path, index: &OffloadIndex) -> TransformResult<()> {
    let target = dir.join(OFFLOAD_INDEX_NAME);
    let mut merged = if target.exists() {
        read_index(dir)?
    } else {
        OffloadIndex::new()
    };
    for (path, entry) in index {
        merged.insert(path.clone(), entry.clone());
    }
    fs::write(target, serde_json::to_vec_pretty(&merged)?)?;
    Ok(())
}

/// Read the index of `dir`
pub fn read_index(dir: &Path) -> TransformResult<OffloadIndex> {
    let bytes = fs::read(dir.join(OFFLOAD_INDEX_NAME))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Load an offloaded tensor back into memory
pub fn load_offloaded(dir: &Path, path: &str, entry: &OffloadEntry) -> TransformResult<Tensor> {
    if entry.dtype != "float32" {
        return Err(TransformError::Dispatch(format!(
            "offloaded tensor '{path}' has unsupported dtype {}",
            entry.dtype
        )));
    }
    let bytes = fs::read(offload_file(dir, path))?;
    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Tensor::from_vec(data, &entry.shape)
}
