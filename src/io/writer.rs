//! Model persistence
//!
//! `save_pretrained` and `push_to_hub`, both refused once a model carries
//! fused layers.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{TransformError, TransformResult};
use crate::model::{Model, SaveGuard};
use crate::traits::Publisher;

use super::snapshot::StateSnapshot;

/// Name of the configuration file
pub const CONFIG_NAME: &str = "config.json";

/// Name of the weights file
pub const WEIGHTS_NAME: &str = "weights.json";

/// What a save wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveStats {
    /// Files written
    pub files: usize,
    /// Bytes written
    pub bytes: usize,
    /// Tensors stored
    pub tensors: usize,
}

impl Model {
    fn check_save_guard(&self) -> TransformResult<()> {
        match self.save_guard {
            SaveGuard::Open => Ok(()),
            SaveGuard::Blocked => Err(TransformError::IrreversibleOperationBlocked),
        }
    }

    fn serialized_files(&self) -> TransformResult<(Vec<(String, Vec<u8>)>, usize)> {
        let snapshot = StateSnapshot::of(self.root());
        let files = vec![
            (
                CONFIG_NAME.to_string(),
                serde_json::to_vec_pretty(self.config())?,
            ),
            (WEIGHTS_NAME.to_string(), snapshot.to_json()?),
        ];
        Ok((files, snapshot.len()))
    }

    /// Write `config.json` and `weights.json` under `dir`
    ///
    /// Fails with [`TransformError::IrreversibleOperationBlocked`] on a fused
    /// model, whatever `dir` is.
    pub fn save_pretrained<P: AsRef<Path>>(&self, dir: P) -> TransformResult<SaveStats> {
        self.check_save_guard()?;

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let (files, tensors) = self.serialized_files()?;
        let mut stats = SaveStats {
            tensors,
            ..Default::default()
        };
        for (name, bytes) in &files {
            fs::write(dir.join(name), bytes)?;
            stats.files += 1;
            stats.bytes += bytes.len();
        }

        info!(
            model = self.class_name(),
            dir = %dir.display(),
            files = stats.files,
            bytes = stats.bytes,
            "saved model"
        );
        Ok(stats)
    }

    /// Serialize and hand the files to `publisher`
    ///
    /// Fails with [`TransformError::IrreversibleOperationBlocked`] on a fused
    /// model, whatever the arguments are.
    pub fn push_to_hub(&self, repo_id: &str, publisher: &dyn Publisher) -> TransformResult<()> {
        self.check_save_guard()?;
        let (files, _) = self.serialized_files()?;
        publisher.publish(repo_id, &files)?;
        info!(model = self.class_name(), repo = repo_id, "pushed model");
        Ok(())
    }
}

/// Read a configuration written by `save_pretrained`
pub fn read_config<P: AsRef<Path>>(dir: P) -> TransformResult<crate::model::ModelConfig> {
    let bytes = fs::read(dir.as_ref().join(CONFIG_NAME))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::model::ModelConfig;
    use crate::tensor::Initializer;

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig::tiny("bert").with_layers(1);
        let model = Model::build(builder::BERT, config.clone(), &mut Initializer::seeded(11)).unwrap();

        let stats = model.save_pretrained(dir.path()).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.tensors, model.state_dict().len());

        assert_eq!(read_config(dir.path()).unwrap(), config);

        let snapshot = StateSnapshot::read(dir.path().join(WEIGHTS_NAME)).unwrap();
        let mut fresh = Model::build(builder::BERT, config, &mut Initializer::placeholder()).unwrap();
        snapshot.restore_into(fresh.root_mut()).unwrap();
        assert!(fresh.state_eq(&model));
    }

    #[test]
    fn test_blocked_guard() {
        let dir = tempfile::tempdir().unwrap();
        let mut model = Model::new(builder::BERT, ModelConfig::tiny("bert")).unwrap();
        model.save_guard = SaveGuard::Blocked;

        let err = model.save_pretrained(dir.path().join("out")).unwrap_err();
        assert!(matches!(err, TransformError::IrreversibleOperationBlocked));
        assert!(!dir.path().join("out").exists());
    }
}
