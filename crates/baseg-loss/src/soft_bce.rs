//! Binary cross-entropy on logits with soft targets.
//!
//! For logits `x` and targets `y` the element-wise loss is:
//! ```text
//! y' = (1 - y) * s + y * (1 - s)                      (label smoothing s)
//! L  = (1 - y') * x + (1 + (w - 1) * y') * log(1 + exp(-x))  (positive weight w)
//! ```
//! with `log(1 + exp(-x))` evaluated in its numerically stable form.
//! Ignored pixels get a loss of zero but still count in the mean.

use burn::{
    nn::loss::Reduction,
    prelude::*,
    tensor::backend::Backend,
};

use crate::BinaryCriterion;

/// Configuration for creating a [soft BCE loss](SoftBceWithLogitsLoss).
#[derive(Config, Debug)]
pub struct SoftBceWithLogitsLossConfig {
    /// Target value excluded from the loss. Default: 255
    #[config(default = "Some(255)")]
    pub ignore_index: Option<i64>,
    /// Label smoothing factor in `[0, 1)`. Default: none
    #[config(default = "None")]
    pub smooth_factor: Option<f64>,
    /// Weight of the positive class. Default: none
    #[config(default = "None")]
    pub pos_weight: Option<f64>,
}

impl SoftBceWithLogitsLossConfig {
    /// Initialize [soft BCE loss](SoftBceWithLogitsLoss).
    pub fn init(&self) -> SoftBceWithLogitsLoss {
        self.assertions();
        SoftBceWithLogitsLoss {
            ignore_index: self.ignore_index,
            smooth_factor: self.smooth_factor,
            pos_weight: self.pos_weight,
        }
    }

    fn assertions(&self) {
        if let Some(smooth) = self.smooth_factor {
            assert!(
                (0.0..1.0).contains(&smooth),
                "Smooth factor for SoftBceWithLogitsLoss must be in [0, 1), got {smooth}"
            );
        }
        if let Some(weight) = self.pos_weight {
            assert!(
                weight > 0.0,
                "Positive weight for SoftBceWithLogitsLoss must be positive, got {weight}"
            );
        }
    }
}

/// Binary cross-entropy with logits, label smoothing and an ignore index.
#[derive(Clone, Debug)]
pub struct SoftBceWithLogitsLoss {
    pub ignore_index: Option<i64>,
    pub smooth_factor: Option<f64>,
    pub pos_weight: Option<f64>,
}

impl Default for SoftBceWithLogitsLoss {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBceWithLogitsLoss {
    /// Create a new loss with default configuration.
    pub fn new() -> Self {
        SoftBceWithLogitsLossConfig::new().init()
    }

    /// Compute the criterion with reduction.
    ///
    /// # Shapes
    ///
    /// - logits: `[...]`
    /// - targets: same shape as `logits`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        targets: Tensor<B, D>,
        reduction: Reduction,
    ) -> Tensor<B, 1> {
        let loss = self.forward_no_reduction(logits, targets);
        match reduction {
            Reduction::Mean | Reduction::Auto => loss.mean(),
            Reduction::Sum => loss.sum(),
        }
    }

    /// Compute the element-wise criterion.
    pub fn forward_no_reduction<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, D> {
        self.assertions(&logits, &targets);

        let ignored = self
            .ignore_index
            .map(|index| targets.clone().equal_elem(index as f64));
        let targets = match &ignored {
            Some(mask) => targets.mask_fill(mask.clone(), 0.0),
            None => targets,
        };
        let targets = match self.smooth_factor {
            Some(smooth) => targets.mul_scalar(1.0 - 2.0 * smooth).add_scalar(smooth),
            None => targets,
        };

        // log(1 + exp(-x)) = log(1 + exp(-|x|)) + max(-x, 0)
        let log_sigmoid_neg = logits.clone().abs().neg().exp().add_scalar(1.0).log()
            + logits.clone().neg().clamp_min(0.0);
        let negative_term = targets.clone().neg().add_scalar(1.0) * logits;
        let loss = match self.pos_weight {
            Some(weight) => {
                let log_weight = targets.mul_scalar(weight - 1.0).add_scalar(1.0);
                negative_term + log_weight * log_sigmoid_neg
            }
            None => negative_term + log_sigmoid_neg,
        };

        match ignored {
            Some(mask) => loss.mask_fill(mask, 0.0),
            None => loss,
        }
    }

    fn assertions<B: Backend, const D: usize>(&self, logits: &Tensor<B, D>, targets: &Tensor<B, D>) {
        let logits_dims = logits.dims();
        let targets_dims = targets.dims();
        assert_eq!(
            logits_dims, targets_dims,
            "Shape of logits ({logits_dims:?}) must match targets ({targets_dims:?})"
        );
    }
}

impl<B: Backend> BinaryCriterion<B> for SoftBceWithLogitsLoss {
    fn forward(&self, logits: Tensor<B, 3>, targets: Tensor<B, 3>) -> Tensor<B, 1> {
        SoftBceWithLogitsLoss::forward(self, logits, targets, Reduction::Mean)
    }
}
