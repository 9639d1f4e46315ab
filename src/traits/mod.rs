//! Collaborator traits
//!
//! The seams where the orchestrator talks to the outside world:
//!
//! - [`RuntimeProbe`]: reports the numeric runtime version
//! - [`DeviceOrchestrator`]: infers device maps and (re)dispatches models
//! - [`Publisher`]: uploads serialized models

use std::path::Path;

use crate::dispatch::{DeviceMap, MaxMemory};
use crate::error::TransformResult;
use crate::model::Model;
use crate::runtime::RuntimeVersion;

/// Source of the host numeric runtime version
///
/// # Example
///
/// ```ignore
/// struct Pinned;
///
/// impl RuntimeProbe for Pinned {
///     fn version(&self) -> RuntimeVersion {
///         RuntimeVersion::new(2, 0, 1)
///     }
/// }
/// ```
pub trait RuntimeProbe {
    /// Installed version
    fn version(&self) -> RuntimeVersion;
}

/// Device placement service
///
/// Implementations are treated as black boxes by the orchestrator: they
/// receive the whole model and hand back the redistributed one.
pub trait DeviceOrchestrator {
    /// Compute a placement for `model` within `max_memory`
    fn infer_device_map(&self, model: &Model, max_memory: Option<&MaxMemory>) -> TransformResult<DeviceMap>;

    /// Move `model` according to `map`, offloading disk entries under `offload_dir`
    fn dispatch(&self, model: Model, map: &DeviceMap, offload_dir: Option<&Path>) -> TransformResult<Model>;

    /// Detach all dispatch hooks, returning how many were removed
    fn remove_hooks(&self, model: &mut Model) -> usize;
}

/// Destination for `push_to_hub`
pub trait Publisher {
    /// Upload `files` (name, content) to `repo_id`
    fn publish(&self, repo_id: &str, files: &[(String, Vec<u8>)]) -> TransformResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder {
        uploads: RefCell<Vec<String>>,
    }

    impl Publisher for Recorder {
        fn publish(&self, repo_id: &str, files: &[(String, Vec<u8>)]) -> TransformResult<()> {
            for (name, _) in files {
                self.uploads.borrow_mut().push(format!("{repo_id}/{name}"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_publisher_object_safe() {
        let recorder = Recorder {
            uploads: RefCell::new(Vec::new()),
        };
        let publisher: &dyn Publisher = &recorder;
        publisher
            .publish("org/model", &[("config.json".to_string(), b"{}".to_vec())])
            .unwrap();
        assert_eq!(recorder.uploads.borrow().as_slice(), ["org/model/config.json"]);
    }

    #[test]
    fn test_probe_object_safe() {
        struct Pinned;
        impl RuntimeProbe for Pinned {
            fn version(&self) -> RuntimeVersion {
                RuntimeVersion::new(1, 12, 0)
            }
        }
        let probe: Box<dyn RuntimeProbe> = Box::new(Pinned);
        assert_eq!(probe.version().minor, 12);
    }
}
