//! Training and evaluation entry points.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use baseg_train::{
    load_model, Batch, EpochSummary, MetricLogger, MultiTaskRunner, SegmentationBatcher,
    SegmentationDataset, Trainer,
};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::{
    backend::burn_backend_types::{InferenceBackend, InferenceDevice, TrainingBackend, NAME},
    ExperimentConfig,
};

/// Trains a model and writes its checkpoint and configuration to the
/// artifact directory. Returns the checkpoint path.
///
/// # Errors
///
/// Returns an error if the model configuration is invalid, a split cannot
/// be loaded, a step fails or the artifacts cannot be written.
pub fn run_training_on_device<B: AutodiffBackend>(
    device: B::Device,
    config: &ExperimentConfig,
) -> Result<PathBuf> {
    tracing::info!(?device, "initializing training");
    B::seed(config.trainer.seed);

    let head = &config.model.decode_head;
    let model = config.model.init::<B>(&device)?;
    let module = config.module.init(model, head)?;

    let fit_keys = vec![
        config.module.keys.delineation.clone(),
        config.module.keys.land_cover.clone(),
    ];
    let train_loader = create_dataloader::<B>(
        config,
        &config.split_dir(&config.dataset.train_split),
        &fit_keys,
        true,
        &device,
    )?;
    let valid_loader = create_dataloader::<B::InnerBackend>(
        config,
        &config.split_dir(&config.dataset.val_split),
        &fit_keys,
        false,
        &device,
    )?;

    std::fs::create_dir_all(&config.trainer.artifact_dir)?;
    config.save(Path::new(&config.trainer.artifact_dir).join("config.json"))?;

    let trainer = Trainer::new(config.trainer.clone());
    trainer.fit(module, train_loader, valid_loader, &device)?;
    Ok(trainer.checkpoint_path())
}

/// Evaluates a checkpoint on the test split.
///
/// # Errors
///
/// Returns an error if the checkpoint or the test split cannot be loaded
/// or a step fails.
pub fn run_test_on_device<B: Backend>(
    device: B::Device,
    config: &ExperimentConfig,
    checkpoint: PathBuf,
) -> Result<EpochSummary> {
    let head = &config.model.decode_head;
    let model = load_model(config.model.init::<B>(&device)?, checkpoint, &device)?;
    let mut runner = MultiTaskRunner::new(config.module.init(model, head)?);

    let mut keys = vec![config.module.keys.delineation.clone()];
    if config.module.evaluate_auxiliary_on_test {
        keys.push(config.module.keys.land_cover.clone());
    }
    let loader = create_dataloader::<B>(
        config,
        &config.split_dir(&config.dataset.test_split),
        &keys,
        false,
        &device,
    )?;

    let mut logger = MetricLogger::new();
    let summary = Trainer::new(config.trainer.clone()).test(&mut runner, loader, &mut logger)?;
    for (key, value) in &summary.values {
        tracing::info!(key = %key, value, "test result");
    }
    Ok(summary)
}

/// Builds a data loader over one split directory.
pub(crate) fn create_dataloader<B: Backend>(
    config: &ExperimentConfig,
    split_dir: &Path,
    label_keys: &[String],
    shuffle: bool,
    device: &B::Device,
) -> Result<Arc<dyn DataLoader<B, Batch<B>>>> {
    let image_key = &config.module.keys.image;
    let dataset = SegmentationDataset::new(split_dir, image_key, label_keys)?;

    let mut builder = DataLoaderBuilder::new(SegmentationBatcher::<B>::new(image_key.clone()))
        .batch_size(config.trainer.batch_size)
        .set_device(device.clone());
    if config.trainer.num_workers > 0 {
        builder = builder.num_workers(config.trainer.num_workers);
    }
    if shuffle {
        builder = builder.shuffle(config.trainer.seed);
    }
    Ok(builder.build(dataset))
}

/// Runs training from a configuration file on the selected backend.
///
/// # Errors
///
/// Returns an error if the configuration file is missing or invalid or
/// training fails.
pub fn run_training(config_path: &Path) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!("Configuration file not found: {}", config_path.display());
    }
    let config = ExperimentConfig::load(config_path)?;
    tracing::info!(
        severity = config.module.severity,
        loss = ?config.module.loss,
        mask_lc = config.module.mask_lc,
        learning_rate = config.trainer.learning_rate,
        epochs = config.trainer.num_epochs,
        root = %config.dataset.root,
        "configuration loaded",
    );

    tracing::info!(backend = NAME, "starting training on backend");
    run_training_on_device::<TrainingBackend>(InferenceDevice::default(), &config)?;
    Ok(())
}

/// Runs the test loop from a configuration file on the selected backend.
///
/// # Errors
///
/// Returns an error if the configuration or checkpoint is missing or
/// evaluation fails.
pub fn run_test(config_path: &Path, checkpoint: Option<PathBuf>) -> Result<EpochSummary> {
    let config = ExperimentConfig::load(config_path)?;
    let checkpoint = checkpoint
        .unwrap_or_else(|| Trainer::new(config.trainer.clone()).checkpoint_path());
    tracing::info!(backend = NAME, checkpoint = %checkpoint.display(), "starting test");
    run_test_on_device::<InferenceBackend>(InferenceDevice::default(), &config, checkpoint)
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;
    use crate::tests::{experiment, write_split};

    fn batch_sizes(config: &ExperimentConfig) -> Vec<usize> {
        let keys = vec!["DEL".to_owned()];
        let loader = create_dataloader::<NdArray>(
            config,
            &config.split_dir("train"),
            &keys,
            true,
            &Default::default(),
        )
        .unwrap();
        let mut sizes: Vec<usize> = loader.iter().map(|batch| batch.batch_size()).collect();
        sizes.sort_unstable();
        sizes
    }

    #[test]
    fn zero_workers_load_on_the_calling_thread() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", &["a", "b", "c"]);
        let config = experiment(dir.path());
        assert_eq!(config.trainer.num_workers, 0);

        assert_eq!(batch_sizes(&config), vec![1, 2]);
    }

    #[test]
    fn worker_threads_load_every_sample() {
        let dir = tempfile::tempdir().unwrap();
        write_split(dir.path(), "train", &["a", "b", "c"]);
        let mut config = experiment(dir.path());
        config.trainer.num_workers = 2;

        assert_eq!(batch_sizes(&config).iter().sum::<usize>(), 3);
    }
}
