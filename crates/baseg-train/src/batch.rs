//! Keyed batches flowing from the data loader into the steps.

use std::collections::HashMap;

use burn::{prelude::*, tensor::Int};

use crate::{StepError, StepResult};

/// Label value excluded from every loss and metric.
pub const IGNORE_INDEX: i64 = 255;

/// Key under which the reconstructed prediction is reported.
pub const PREDICTION_KEY: &str = "pred";

/// Names of the batch entries read by the steps.
#[derive(Config, Debug, PartialEq, Eq)]
pub struct BatchKeys {
    /// Input imagery. Default: `S2L2A`
    #[config(default = "String::from(\"S2L2A\")")]
    pub image: String,
    /// Delineation ground truth. Default: `DEL`
    #[config(default = "String::from(\"DEL\")")]
    pub delineation: String,
    /// Land-cover ground truth. Default: `ESA_LC`
    #[config(default = "String::from(\"ESA_LC\")")]
    pub land_cover: String,
}

/// A batch of samples keyed by channel name.
///
/// Images have shape `[batch_size, channels, height, width]`, labels
/// `[batch_size, height, width]`.
#[derive(Debug, Clone)]
pub struct Batch<B: Backend> {
    images: HashMap<String, Tensor<B, 4>>,
    labels: HashMap<String, Tensor<B, 3, Int>>,
    prediction: Option<Tensor<B, 3>>,
    names: Vec<String>,
}

impl<B: Backend> Default for Batch<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Batch<B> {
    pub fn new() -> Self {
        Self {
            images: HashMap::new(),
            labels: HashMap::new(),
            prediction: None,
            names: Vec::new(),
        }
    }

    pub fn with_image(mut self, key: impl Into<String>, image: Tensor<B, 4>) -> Self {
        self.images.insert(key.into(), image);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, label: Tensor<B, 3, Int>) -> Self {
        self.labels.insert(key.into(), label);
        self
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }

    pub fn image(&self, key: &str) -> StepResult<Tensor<B, 4>> {
        self.images
            .get(key)
            .cloned()
            .ok_or_else(|| StepError::MissingBatchKey { key: key.to_owned() })
    }

    pub fn label(&self, key: &str) -> StepResult<Tensor<B, 3, Int>> {
        self.labels
            .get(key)
            .cloned()
            .ok_or_else(|| StepError::MissingBatchKey { key: key.to_owned() })
    }

    /// Replaces the label stored under `key`.
    pub fn set_label(&mut self, key: impl Into<String>, label: Tensor<B, 3, Int>) {
        self.labels.insert(key.into(), label);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.images.contains_key(key) || self.labels.contains_key(key)
    }

    /// Reconstructed probabilities `[1, height, width]`, once predicted.
    pub fn prediction(&self) -> StepResult<&Tensor<B, 3>> {
        self.prediction
            .as_ref()
            .ok_or_else(|| StepError::MissingBatchKey {
                key: PREDICTION_KEY.to_owned(),
            })
    }

    pub fn set_prediction(&mut self, prediction: Tensor<B, 3>) {
        self.prediction = Some(prediction);
    }

    /// Sample names in batch order, empty when the source had none.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Leading dimension of the stored tensors.
    pub fn batch_size(&self) -> usize {
        self.images
            .values()
            .map(|image| image.dims()[0])
            .chain(self.labels.values().map(|label| label.dims()[0]))
            .next()
            .unwrap_or(self.names.len())
    }
}
