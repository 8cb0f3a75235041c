use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::data::loader::TableSchema;
use crate::error::{ModelError, ModelResult};
use crate::surrogate::Architecture;
use crate::train::TrainConfig;

/// Settings shared by the trainer binary and the viewer. Every field has a
/// default, so a config file only needs the values it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StardusterConfig {
    pub schema: TableSchema,
    pub architecture: Architecture,
    pub train: TrainConfig,
}

impl StardusterConfig {
    pub fn load(path: &Path) -> ModelResult<Self> {
        let file = File::open(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> ModelResult<()> {
        write_json(path, self)
    }

    pub fn validate(&self) -> ModelResult<()> {
        self.architecture.validate()?;
        self.train.validate()
    }
}

/// Write `value` as pretty JSON, surfacing errors from the final flush.
pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ModelResult<()> {
    let io_err = |source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = BufWriter::new(File::create(path).map_err(io_err)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_in_defaults() {
        let text = r#"{ "train": { "epochs": 12, "optimizer": { "learning_rate": 0.005 } },
                        "schema": { "params": ["tau_v"] } }"#;
        let config: StardusterConfig = serde_json::from_str(text).unwrap();
        assert_eq!(config.train.epochs, 12);
        assert_eq!(config.train.optimizer.learning_rate, 0.005);
        assert_eq!(config.train.optimizer.beta1, 0.9);
        assert_eq!(config.train.batch_size, TrainConfig::default().batch_size);
        assert_eq!(config.schema.params, vec!["tau_v".to_string()]);
        assert_eq!(config.schema.att, "att");
        assert_eq!(config.architecture, Architecture::default());
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starduster.json");
        let mut config = StardusterConfig::default();
        config.architecture.hidden = vec![32, 16, 8];
        config.train.seed = 9;
        config.save(&path).unwrap();
        assert_eq!(StardusterConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn round_trip_keeps_every_float_bit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("starduster.json");
        let mut config = StardusterConfig::default();
        config.train.optimizer.learning_rate = 0.1 + 0.2;
        config.train.tolerance = 1.0 / 3.0 * 1e-3;
        config.train.weights.emission = std::f64::consts::PI.sqrt();
        config.save(&path).unwrap();
        let back = StardusterConfig::load(&path).unwrap();
        assert_eq!(
            back.train.optimizer.learning_rate.to_bits(),
            config.train.optimizer.learning_rate.to_bits()
        );
        assert_eq!(back, config);
    }

    // A short file stays in the write buffer, so the error only shows on flush.
    #[cfg(target_os = "linux")]
    #[test]
    fn flush_failure_is_an_io_error() {
        let config = StardusterConfig::default();
        assert!(matches!(
            config.save(Path::new("/dev/full")),
            Err(ModelError::Io { .. })
        ));
    }

    #[test]
    fn invalid_values_are_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "train": { "batch_size": 0 } }"#).unwrap();
        assert!(matches!(
            StardusterConfig::load(&path),
            Err(ModelError::InvalidConfig(_))
        ));
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(StardusterConfig::load(&path), Err(ModelError::Json(_))));
    }
}
