//! Device placement
//!
//! Types shared with device orchestrators:
//!
//! - [`DeviceMap`]: module or tensor path prefix → device
//! - [`MaxMemory`]: byte budget per device
//! - [`DeviceHook`]: per-module state attached by a dispatch
//!
//! and [`LocalDispatcher`], a greedy in-process orchestrator that places
//! modules in declaration order and offloads what does not fit to disk.

pub mod local;

pub use local::LocalDispatcher;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::module::{is_under, Module};
use crate::tensor::Device;

/// Path prefix → device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceMap {
    entries: IndexMap<String, Device>,
}

impl DeviceMap {
    /// Empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything on one device
    pub fn single(device: Device) -> Self {
        let mut map = Self::new();
        map.insert("", device);
        map
    }

    /// Builder variant of [`DeviceMap::insert`]
    pub fn with(mut self, prefix: impl Into<String>, device: Device) -> Self {
        self.insert(prefix, device);
        self
    }

    /// Place everything under `prefix` on `device`
    pub fn insert(&mut self, prefix: impl Into<String>, device: Device) {
        self.entries.insert(prefix.into(), device);
    }

    /// Device of the longest prefix covering `path`
    pub fn device_for(&self, path: &str) -> Option<Device> {
        self.entries
            .iter()
            .filter(|(prefix, _)| is_under(path, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, device)| *device)
    }

    /// Whether some prefix covers `path`
    pub fn covers(&self, path: &str) -> bool {
        self.device_for(path).is_some()
    }

    /// Whether every parameter and buffer of `root` is covered
    pub fn covers_all(&self, root: &Module) -> bool {
        root.state_dict().iter().all(|(path, _)| self.covers(path))
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Device)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry is offloaded to disk
    pub fn uses_disk(&self) -> bool {
        self.entries.values().any(|d| *d == Device::Disk)
    }
}

/// Byte budget per device, in fill order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxMemory {
    budgets: IndexMap<Device, usize>,
}

impl MaxMemory {
    /// Empty budget
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device with `bytes` of capacity
    pub fn with(mut self, device: Device, bytes: usize) -> Self {
        self.budgets.insert(device, bytes);
        self
    }

    /// Compute devices with their budgets, in fill order
    pub fn compute_devices(&self) -> impl Iterator<Item = (Device, usize)> + '_ {
        self.budgets
            .iter()
            .filter(|(device, _)| device.is_compute())
            .map(|(device, bytes)| (*device, *bytes))
    }
}

/// State attached to a module by a dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceHook {
    /// Device the module executes on
    pub execution_device: Device,
    /// Whether weights are loaded from disk on use
    pub offload: bool,
}

impl DeviceHook {
    /// Hook executing on `device`; disk placement executes on the CPU
    pub fn new(device: Device) -> Self {
        match device {
            Device::Disk => Self {
                execution_device: Device::Cpu,
                offload: true,
            },
            other => Self {
                execution_device: other,
                offload: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let map = DeviceMap::new()
            .with("encoder", Device::Cuda(0))
            .with("encoder.layer.1", Device::Cuda(1))
            .with("pooler", Device::Cpu);
        assert_eq!(map.device_for("encoder.layer.0.weight"), Some(Device::Cuda(0)));
        assert_eq!(map.device_for("encoder.layer.1.weight"), Some(Device::Cuda(1)));
        assert_eq!(map.device_for("encoder.layer.10.weight"), Some(Device::Cuda(0)));
        assert_eq!(map.device_for("embeddings.weight"), None);
        assert!(DeviceMap::single(Device::Cpu).covers("anything.at.all"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let map = DeviceMap::new().with("encoder", Device::Cuda(0)).with("pooler", Device::Disk);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"encoder":"cuda:0","pooler":"disk"}"#);
        let back: DeviceMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
        assert!(back.uses_disk());
    }

    #[test]
    fn test_max_memory_skips_disk() {
        let budget = MaxMemory::new()
            .with(Device::Cuda(0), 100)
            .with(Device::Disk, 1000)
            .with(Device::Cpu, 50);
        let devices: Vec<_> = budget.compute_devices().collect();
        assert_eq!(devices, vec![(Device::Cuda(0), 100), (Device::Cpu, 50)]);
    }

    #[test]
    fn test_hook_for_disk() {
        let hook = DeviceHook::new(Device::Disk);
        assert!(hook.offload);
        assert_eq!(hook.execution_device, Device::Cpu);
        assert!(!DeviceHook::new(Device::Cuda(2)).offload);
    }
}
