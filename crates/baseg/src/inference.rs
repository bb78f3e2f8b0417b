//! Full-image prediction.

use std::path::{Path, PathBuf};

use anyhow::Result;
use baseg_train::{load_model, MultiTaskRunner, PredictionWriterConfig, Trainer};
use burn::prelude::*;

use crate::{
    backend::burn_backend_types::{InferenceBackend, InferenceDevice, NAME},
    training::create_dataloader,
    ExperimentConfig,
};

/// Inputs and outputs of a prediction run.
#[derive(Config, Debug)]
pub struct PredictionConfig {
    /// Directory with one sub-directory per batch key; only the image key is read.
    pub input_dir: String,
    /// Directory receiving one PNG mask per image.
    pub output_dir: String,
    /// Model checkpoint, without the recorder extension.
    pub checkpoint: String,
    /// Probability above which a pixel is burned. Default: none, probabilities are written
    #[config(default = "None")]
    pub threshold: Option<f64>,
}

/// Predicts every image of `input_dir` with the sliding-window tiler and
/// writes the masks. Returns the number of images written.
///
/// # Errors
///
/// Returns an error if the checkpoint or images cannot be loaded, the
/// tiler configuration is invalid or a mask cannot be written.
pub fn run_prediction_on_device<B: Backend>(
    device: B::Device,
    config: &ExperimentConfig,
    prediction: &PredictionConfig,
) -> Result<usize> {
    let model = load_model(
        config.model.init::<B>(&device)?,
        PathBuf::from(&prediction.checkpoint),
        &device,
    )?;
    let writer = PredictionWriterConfig::new(prediction.output_dir.clone())
        .with_threshold(prediction.threshold)
        .init()?;
    let mut runner = MultiTaskRunner::new(config.module.init(model, &config.model.decode_head)?)
        .with_tiler(config.tiler.init()?)
        .with_predict_callback(writer);

    // predict_step takes one full image per batch
    let single = ExperimentConfig {
        trainer: config.trainer.clone().with_batch_size(1),
        ..config.clone()
    };
    let loader = create_dataloader::<B>(
        &single,
        Path::new(&prediction.input_dir),
        &[],
        false,
        &device,
    )?;

    Ok(Trainer::new(single.trainer).predict(&mut runner, loader)?)
}

/// Runs prediction on the selected backend.
///
/// # Errors
///
/// Returns an error if the configuration file is missing or prediction fails.
pub fn run_prediction(config_path: &Path, prediction: &PredictionConfig) -> Result<usize> {
    let config = ExperimentConfig::load(config_path)?;
    tracing::info!(
        backend = NAME,
        input = %prediction.input_dir,
        output = %prediction.output_dir,
        tile_size = config.tiler.tile_size,
        "starting prediction"
    );
    run_prediction_on_device::<InferenceBackend>(InferenceDevice::default(), &config, prediction)
}
