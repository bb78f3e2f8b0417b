//! Binary Dice loss.
//!
//! ```text
//! score = (2 * |P ∩ T| + smooth) / (|P| + |T| + smooth)
//! loss  = 1 - max(score, eps)
//! ```
//! Probabilities and targets of ignored pixels are zeroed before the sums.
//! A batch whose targets hold no positive pixel contributes zero loss.

use burn::{prelude::*, tensor::activation::sigmoid};

use crate::BinaryCriterion;

/// Configuration for creating a [Dice loss](DiceLoss).
#[derive(Config, Debug)]
pub struct DiceLossConfig {
    /// Target value excluded from the loss. Default: 255
    #[config(default = "Some(255)")]
    pub ignore_index: Option<i64>,
    /// Added to numerator and denominator. Default: 0.0
    #[config(default = 0.0)]
    pub smooth: f64,
    /// Lower bound of the score. Default: 1e-7
    #[config(default = 1e-7)]
    pub eps: f64,
    /// Apply a sigmoid to the input first. Default: true
    #[config(default = true)]
    pub from_logits: bool,
}

impl DiceLossConfig {
    /// Initialize [Dice loss](DiceLoss).
    pub fn init(&self) -> DiceLoss {
        assert!(
            self.smooth >= 0.0,
            "Smooth term for DiceLoss must be non-negative, got {}",
            self.smooth
        );
        DiceLoss {
            ignore_index: self.ignore_index,
            smooth: self.smooth,
            eps: self.eps,
            from_logits: self.from_logits,
        }
    }
}

/// Dice loss over the whole batch.
#[derive(Clone, Debug)]
pub struct DiceLoss {
    pub ignore_index: Option<i64>,
    pub smooth: f64,
    pub eps: f64,
    pub from_logits: bool,
}

impl Default for DiceLoss {
    fn default() -> Self {
        DiceLossConfig::new().init()
    }
}

impl DiceLoss {
    /// Compute the criterion.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, ...]`
    /// - targets: same shape as `logits`
    /// - output: `[1]`
    pub fn forward<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
        targets: Tensor<B, D>,
    ) -> Tensor<B, 1> {
        let logits_dims = logits.dims();
        let targets_dims = targets.dims();
        assert_eq!(
            logits_dims, targets_dims,
            "Shape of logits ({logits_dims:?}) must match targets ({targets_dims:?})"
        );

        let probs = if self.from_logits {
            sigmoid(logits)
        } else {
            logits
        };

        let (probs, targets) = match self.ignore_index {
            Some(index) => {
                let ignored = targets.clone().equal_elem(index as f64);
                (
                    probs.mask_fill(ignored.clone(), 0.0),
                    targets.mask_fill(ignored, 0.0),
                )
            }
            None => (probs, targets),
        };

        let intersection = (probs.clone() * targets.clone()).sum();
        let cardinality = probs.sum() + targets.clone().sum();
        let score = intersection
            .mul_scalar(2.0)
            .add_scalar(self.smooth)
            .div(cardinality.add_scalar(self.smooth).clamp_min(self.eps));
        let loss = score.neg().add_scalar(1.0);

        // Zero out the loss when there is nothing to segment.
        let present = targets.sum().greater_elem(0.0).float();
        loss * present
    }
}

impl<B: Backend> BinaryCriterion<B> for DiceLoss {
    fn forward(&self, logits: Tensor<B, 3>, targets: Tensor<B, 3>) -> Tensor<B, 1> {
        DiceLoss::forward(self, logits, targets)
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{ElementConversion, TensorData};

    use super::*;
    use crate::tests::TestBackend;

    fn run(loss: &DiceLoss, logits: TensorData, targets: TensorData) -> f32 {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 3>::from_data(logits, &device);
        let targets = Tensor::<TestBackend, 3>::from_data(targets, &device);
        loss.forward(logits, targets).into_scalar().elem::<f32>()
    }

    #[test]
    fn dice_uniform_logits_half_overlap() {
        let loss = DiceLoss::default();

        // p = 0.5 everywhere: 2 * 1.0 / (2.0 + 2.0)
        let value = run(
            &loss,
            TensorData::from([[[0.0, 0.0], [0.0, 0.0]]]),
            TensorData::from([[[1.0, 1.0], [0.0, 0.0]]]),
        );

        assert!((value - 0.5).abs() < 1e-5, "{value}");
    }

    #[test]
    fn dice_empty_target_gives_zero_loss() {
        let loss = DiceLoss::default();

        let value = run(
            &loss,
            TensorData::from([[[4.0, -2.0], [1.0, 3.0]]]),
            TensorData::from([[[0.0, 0.0], [0.0, 0.0]]]),
        );

        assert_eq!(value, 0.0);
    }

    #[test]
    fn dice_ignored_pixels_leave_the_sums() {
        let loss = DiceLoss::default();

        // The ignored pixel would otherwise add 0.5 to the cardinality.
        let value = run(
            &loss,
            TensorData::from([[[0.0, 0.0], [0.0, 0.0]]]),
            TensorData::from([[[1.0, 1.0], [0.0, 255.0]]]),
        );

        let expected = 1.0 - 2.0 / 3.5;
        assert!((value - expected).abs() < 1e-5, "{value} != {expected}");
    }

    #[test]
    fn dice_perfect_probabilities_give_zero_loss() {
        let loss = DiceLossConfig::new().with_from_logits(false).init();

        let value = run(
            &loss,
            TensorData::from([[[1.0, 0.0], [0.0, 1.0]]]),
            TensorData::from([[[1.0, 0.0], [0.0, 1.0]]]),
        );

        assert!(value.abs() < 1e-6);
    }
}
