//! Model root
//!
//! A [`Model`] couples the root of a module tree with its configuration, the
//! [`Architecture`] able to rebuild it from scratch, and the transform state:
//! the `use_bettertransformer` marker and the save guard.

pub mod config;
pub mod family;

pub use config::ModelConfig;
pub use family::ModelFamily;

use std::fmt;

use crate::dispatch::DeviceMap;
use crate::error::TransformResult;
use crate::module::Module;
use crate::tensor::{Initializer, Tensor};

/// Constructor of a model class from its configuration
pub type BuildFn = fn(&ModelConfig, &mut Initializer) -> TransformResult<Module>;

/// A model class: its name and a constructor
#[derive(Clone, Copy)]
pub struct Architecture {
    /// Class name of the root module (`BertModel`, `GPT2Model`, ...)
    pub class_name: &'static str,
    /// Builds a fresh root module
    pub build: BuildFn,
}

impl Architecture {
    /// Build a fresh root module
    pub fn instantiate(&self, config: &ModelConfig, init: &mut Initializer) -> TransformResult<Module> {
        (self.build)(config, init)
    }
}

impl fmt::Debug for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Architecture").field(&self.class_name).finish()
    }
}

impl PartialEq for Architecture {
    fn eq(&self, other: &Self) -> bool {
        self.class_name == other.class_name
    }
}

/// Whether persistence entry points are open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveGuard {
    /// Save and publish work normally
    #[default]
    Open,
    /// Save and publish always fail
    Blocked,
}

/// A model: root module, configuration and transform state
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    config: ModelConfig,
    root: Module,
    architecture: Architecture,
    pub(crate) device_map: Option<DeviceMap>,
    pub(crate) use_bettertransformer: bool,
    pub(crate) save_guard: SaveGuard,
}

impl Model {
    /// Build a model with default-valued weights
    pub fn new(architecture: Architecture, config: ModelConfig) -> TransformResult<Self> {
        Self::build(architecture, config, &mut Initializer::default())
    }

    /// Build a model drawing weights from `init`
    pub fn build(
        architecture: Architecture,
        config: ModelConfig,
        init: &mut Initializer,
    ) -> TransformResult<Self> {
        let root = architecture.instantiate(&config, init)?;
        Ok(Self::from_parts(architecture, config, root))
    }

    /// Assemble a model around an existing tree
    pub fn from_parts(architecture: Architecture, config: ModelConfig, root: Module) -> Self {
        Self {
            config,
            root,
            architecture,
            device_map: None,
            use_bettertransformer: false,
            save_guard: SaveGuard::Open,
        }
    }

    /// Configuration
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Family of the configuration
    pub fn family(&self) -> &ModelFamily {
        &self.config.model_type
    }

    /// Class name of the root module
    pub fn class_name(&self) -> &'static str {
        self.architecture.class_name
    }

    /// Architecture able to rebuild this model
    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Root of the module tree
    pub fn root(&self) -> &Module {
        &self.root
    }

    /// Mutable root of the module tree
    pub fn root_mut(&mut self) -> &mut Module {
        &mut self.root
    }

    /// Device placement recorded by the last dispatch
    pub fn device_map(&self) -> Option<&DeviceMap> {
        self.device_map.as_ref()
    }

    /// Whether the tree holds fused layers
    pub fn use_bettertransformer(&self) -> bool {
        self.use_bettertransformer
    }

    /// Current save guard
    pub fn save_guard(&self) -> SaveGuard {
        self.save_guard
    }

    /// Whether the root is in training mode
    pub fn is_training(&self) -> bool {
        self.root.is_training()
    }

    /// Switch the whole tree to training mode
    pub fn train(&mut self) {
        self.root.train();
    }

    /// Switch the whole tree to evaluation mode
    pub fn eval(&mut self) {
        self.root.eval();
    }

    /// Parameters then buffers of every module, in tree order
    pub fn state_dict(&self) -> Vec<(String, &Tensor)> {
        self.root.state_dict()
    }

    /// Whether both models hold the same tensors bit for bit
    pub fn state_eq(&self, other: &Model) -> bool {
        let mine = self.state_dict();
        let theirs = other.state_dict();
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|((pa, ta), (pb, tb))| pa == pb && ta.bitwise_eq(tb))
    }
}
