//! Experiment configuration files.

use std::{fs, path::Path};

use anyhow::{Context, Result};
use baseg_model::SegmentorConfig;
use baseg_train::{MultiTaskConfig, SlidingWindowTilerConfig, TrainerConfig};
use burn::config::Config;
use serde_json::Value;

/// Everything needed to train, test and predict with one model.
///
/// Loaded from a JSON file via [`ExperimentConfig::load`]. Only
/// `dataset.root` is required: every other field, at any depth, falls back
/// to its default.
#[derive(Config, Debug)]
pub struct ExperimentConfig {
    /// Network architecture, including the auxiliary head and its weight.
    #[config(default = "SegmentorConfig::new()")]
    pub model: SegmentorConfig,

    /// Step policy: delineation variant, loss, masking and log names.
    #[config(default = "MultiTaskConfig::new()")]
    pub module: MultiTaskConfig,

    /// Optimizer and loop settings.
    #[config(default = "TrainerConfig::new()")]
    pub trainer: TrainerConfig,

    pub dataset: DatasetConfig,

    /// Full-image prediction.
    #[config(default = "SlidingWindowTilerConfig::new()")]
    pub tiler: SlidingWindowTilerConfig,
}

/// Dataset location.
///
/// Every split directory holds one sub-directory per batch key, with image
/// and label files sharing their file stem.
#[derive(Config, Debug)]
pub struct DatasetConfig {
    /// Root directory containing the split directories.
    pub root: String,

    #[config(default = "String::from(\"train\")")]
    pub train_split: String,

    #[config(default = "String::from(\"val\")")]
    pub val_split: String,

    #[config(default = "String::from(\"test\")")]
    pub test_split: String,
}

impl ExperimentConfig {
    /// Loads an experiment configuration from a JSON file, overlaid onto
    /// the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or lacks
    /// `dataset.root`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)?;
        let file: Value = serde_json::from_str(&config_str)?;
        let root = file
            .pointer("/dataset/root")
            .and_then(Value::as_str)
            .with_context(|| format!("{}: missing `dataset.root`", path.display()))?;

        let mut config = serde_json::to_value(Self::new(DatasetConfig::new(root.to_owned())))?;
        merge(&mut config, file);
        Ok(serde_json::from_value(config)?)
    }

    /// Saves this configuration to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let config_str = serde_json::to_string_pretty(self)?;
        fs::write(path, config_str)?;
        Ok(())
    }

    /// Directory of the named split.
    pub fn split_dir(&self, split: &str) -> std::path::PathBuf {
        Path::new(&self.dataset.root).join(split)
    }
}

/// Overlays `patch` onto `base`, recursing into objects.
fn merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                merge(base.entry(key).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch,
    }
}

#[cfg(test)]
mod tests {
    use baseg_loss::DecodeLossKind;

    use super::*;

    #[test]
    fn minimal_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        fs::write(
            &path,
            r#"{
                "dataset": { "root": "data" },
                "module": { "severity": true, "mask_lc": true },
                "model": { "decode_head": { "num_classes": 5, "aux_factor": 0.5 } }
            }"#,
        )
        .unwrap();

        let config = ExperimentConfig::load(&path).unwrap();

        assert!(config.module.severity && config.module.mask_lc);
        assert_eq!(config.module.loss, DecodeLossKind::Bce);
        assert_eq!(config.module.keys.land_cover, "ESA_LC");
        assert_eq!(config.model.decode_head.num_classes, 5);
        assert_eq!(config.model.decode_head.aux_classes, 11);
        assert_eq!(config.model.decode_head.aux_factor, 0.5);
        assert_eq!(config.trainer.learning_rate, 1e-4);
        assert_eq!(config.split_dir("val"), Path::new("data").join("val"));
    }

    #[test]
    fn saved_configuration_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        let config = ExperimentConfig::new(DatasetConfig::new("data".to_owned()))
            .with_module(MultiTaskConfig::legacy());

        config.save(&path).unwrap();
        let loaded = ExperimentConfig::load(&path).unwrap();

        assert_eq!(loaded.module.total_loss_name, "loss_tot");
        assert_eq!(loaded.module.decode_metric_suffix, "_del");
        assert_eq!(loaded.tiler.tile_size, 512);
    }

    #[test]
    fn nested_sections_keep_defaults_of_omitted_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        fs::write(
            &path,
            r#"{
                "dataset": { "root": "data", "test_split": "holdout" },
                "trainer": { "num_epochs": 3 },
                "tiler": { "tile_size": 256 },
                "model": { "encoder": { "channels": [8, 16] } }
            }"#,
        )
        .unwrap();

        let config = ExperimentConfig::load(&path).unwrap();

        assert_eq!(config.trainer.num_epochs, 3);
        assert_eq!(config.trainer.batch_size, 8);
        assert_eq!(config.trainer.artifact_dir, "artifacts");
        assert_eq!(config.tiler.tile_size, 256);
        assert_eq!(config.tiler.overlap, SlidingWindowTilerConfig::new().overlap);
        assert_eq!(config.model.encoder.channels, vec![8, 16]);
        assert_eq!(config.model.decode_head.aux_classes, 11);
        assert_eq!(config.dataset.test_split, "holdout");
        assert_eq!(config.dataset.train_split, "train");
    }

    #[test]
    fn file_without_dataset_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("experiment.json");
        fs::write(&path, r#"{ "trainer": { "num_epochs": 3 } }"#).unwrap();

        let err = ExperimentConfig::load(&path).unwrap_err();

        assert!(err.to_string().contains("dataset.root"));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(ExperimentConfig::load("/nonexistent/experiment.json").is_err());
    }
}
