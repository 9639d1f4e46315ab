//! Device tags for tensor storage
//!
//! Maps between textual device identifiers (`"cpu"`, `"cuda:1"`, `"disk"`,
//! `"meta"`) and [`Device`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TransformError;

/// Where a tensor lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Device {
    /// Host memory
    Cpu,
    /// Accelerator with the given ordinal
    Cuda(usize),
    /// Offloaded to disk storage
    Disk,
    /// Placeholder storage with shape only, no data
    Meta,
}

impl Device {
    /// Whether tensors on this device can execute kernels
    pub fn is_compute(&self) -> bool {
        matches!(self, Device::Cpu | Device::Cuda(_))
    }
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Cuda(index) => write!(f, "cuda:{index}"),
            Device::Disk => f.write_str("disk"),
            Device::Meta => f.write_str("meta"),
        }
    }
}

impl FromStr for Device {
    type Err = TransformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "cpu" => Ok(Device::Cpu),
            "disk" => Ok(Device::Disk),
            "meta" => Ok(Device::Meta),
            "cuda" => Ok(Device::Cuda(0)),
            other => {
                let index = other
                    .strip_prefix("cuda:")
                    .or_else(|| other.strip_prefix("cuda"))
                    .and_then(|i| i.parse::<usize>().ok())
                    .or_else(|| other.parse::<usize>().ok())
                    .ok_or_else(|| TransformError::Dispatch(format!("unknown device '{other}'")))?;
                Ok(Device::Cuda(index))
            }
        }
    }
}

impl TryFrom<String> for Device {
    type Error = TransformError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Device> for String {
    fn from(device: Device) -> Self {
        device.to_string()
    }
}
