//! Consumers of reconstructed predictions.

use std::{fs, path::PathBuf};

use burn::{prelude::*, tensor::DType};
use image::GrayImage;

use crate::{Batch, StepError, StepResult};

/// Receives every batch after its prediction has been attached.
pub trait PredictCallback<B: Backend> {
    fn on_prediction(&mut self, batch: &Batch<B>) -> StepResult<()>;
}

/// Configuration for creating a [prediction writer](PredictionWriter).
#[derive(Config, Debug)]
pub struct PredictionWriterConfig {
    /// Directory receiving one PNG per sample.
    pub output_dir: String,
    /// Probability above which a pixel is written as 255, all others as 0.
    /// Without a threshold probabilities are scaled to `[0, 255]`. Default: none
    #[config(default = "None")]
    pub threshold: Option<f64>,
}

impl PredictionWriterConfig {
    pub fn init(&self) -> StepResult<PredictionWriter> {
        let output_dir = PathBuf::from(&self.output_dir);
        fs::create_dir_all(&output_dir).map_err(|source| StepError::Io {
            path: output_dir.clone(),
            source,
        })?;

        Ok(PredictionWriter {
            output_dir,
            threshold: self.threshold,
            written: 0,
        })
    }
}

/// Writes predictions as 8-bit grayscale PNG files named after the sample.
#[derive(Debug)]
pub struct PredictionWriter {
    output_dir: PathBuf,
    threshold: Option<f64>,
    written: usize,
}

impl PredictionWriter {
    /// Number of images written so far.
    pub const fn written(&self) -> usize {
        self.written
    }

    fn to_pixel(&self, probability: f32) -> u8 {
        match self.threshold {
            Some(threshold) => {
                if f64::from(probability) > threshold {
                    u8::MAX
                } else {
                    0
                }
            }
            None => (probability.clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    }
}

impl<B: Backend> PredictCallback<B> for PredictionWriter {
    fn on_prediction(&mut self, batch: &Batch<B>) -> StepResult<()> {
        let prediction = batch.prediction()?.clone();
        let [_, height, width] = prediction.dims();

        let data = prediction
            .into_data()
            .convert_dtype(DType::F32)
            .to_vec::<f32>()
            .map_err(|e| StepError::TensorData {
                reason: format!("{e:?}"),
            })?;
        let pixels = data.into_iter().map(|p| self.to_pixel(p)).collect();
        let image = GrayImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
            StepError::TensorData {
                reason: format!("prediction does not fill a {width}x{height} image"),
            }
        })?;

        let name = batch
            .names()
            .first()
            .cloned()
            .unwrap_or_else(|| format!("prediction_{:05}", self.written));
        let path = self.output_dir.join(format!("{name}.png"));
        image
            .save(&path)
            .map_err(|source| StepError::PredictionWrite {
                path: path.clone(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "prediction written");
        self.written += 1;
        Ok(())
    }
}
