//! Per-pixel cross-entropy with an ignore label.
//!
//! ```text
//! Loss = -Σ_valid log_softmax(x)[target] / |valid|
//! ```
//! Pixels whose target equals the ignore index, or falls outside
//! `[0, num_classes)`, are excluded from both sum and count. A batch with no
//! valid pixel yields a loss of zero.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, Int},
};

use crate::MulticlassCriterion;

/// Configuration for creating a [pixel cross-entropy loss](PixelCrossEntropyLoss).
#[derive(Config, Debug)]
pub struct PixelCrossEntropyLossConfig {
    /// Target value excluded from the loss. Default: 255
    #[config(default = "Some(255)")]
    pub ignore_index: Option<i64>,
}

impl PixelCrossEntropyLossConfig {
    /// Initialize [pixel cross-entropy loss](PixelCrossEntropyLoss).
    pub fn init(&self) -> PixelCrossEntropyLoss {
        PixelCrossEntropyLoss {
            ignore_index: self.ignore_index,
        }
    }
}

/// Cross-entropy over the class axis of dense logits.
#[derive(Clone, Debug)]
pub struct PixelCrossEntropyLoss {
    pub ignore_index: Option<i64>,
}

impl Default for PixelCrossEntropyLoss {
    fn default() -> Self {
        PixelCrossEntropyLossConfig::new().init()
    }
}

impl PixelCrossEntropyLoss {
    /// Compute the criterion averaged over the valid pixels.
    ///
    /// # Shapes
    ///
    /// - logits: `[batch_size, num_classes, height, width]`
    /// - targets: `[batch_size, height, width]`
    /// - output: `[1]`
    pub fn forward<B: Backend>(
        &self,
        logits: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
    ) -> Tensor<B, 1> {
        let [batch_size, num_classes, height, width] = logits.dims();
        let targets_dims = targets.dims();
        assert_eq!(
            [batch_size, height, width],
            targets_dims,
            "Spatial shape of logits ({:?}) must match targets ({targets_dims:?})",
            [batch_size, height, width]
        );

        let pixels = batch_size * height * width;
        let log_probs = log_softmax(
            logits.permute([0, 2, 3, 1]).reshape([pixels, num_classes]),
            1,
        );
        let targets = targets.reshape([pixels]);

        let mut invalid = targets
            .clone()
            .greater_equal_elem(num_classes as i64)
            .bool_or(targets.clone().lower_elem(0));
        if let Some(index) = self.ignore_index {
            invalid = invalid.bool_or(targets.clone().equal_elem(index));
        }

        let safe_targets = targets.mask_fill(invalid.clone(), 0);
        let picked = log_probs
            .gather(1, safe_targets.reshape([pixels, 1]))
            .reshape([pixels]);
        let nll = picked.neg().mask_fill(invalid.clone(), 0.0);

        let valid = invalid.bool_not().float().sum();
        nll.sum().div(valid.clamp_min(1.0))
    }
}

impl<B: Backend> MulticlassCriterion<B> for PixelCrossEntropyLoss {
    fn forward(&self, logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        PixelCrossEntropyLoss::forward(self, logits, targets)
    }
}

#[cfg(test)]
mod tests {
    use burn::{
        nn::loss::CrossEntropyLossConfig,
        tensor::{ElementConversion, TensorData, Tolerance, Transaction},
    };

    use super::*;
    use crate::tests::TestBackend;

    #[test]
    fn pixel_ce_uniform_logits_give_log_num_classes() {
        let device = Default::default();
        let loss = PixelCrossEntropyLoss::default();

        let logits = Tensor::<TestBackend, 4>::zeros([2, 4, 3, 3], &device);
        let targets = Tensor::<TestBackend, 3, Int>::ones([2, 3, 3], &device);

        let value = loss.forward(logits, targets).into_scalar().elem::<f32>();

        assert!((value - 4.0_f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn pixel_ce_matches_flat_cross_entropy_without_ignored_pixels() {
        let device = Default::default();
        let loss = PixelCrossEntropyLoss::default();

        // [1, 3, 1, 2] logits, one pixel per column
        let logits = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[2.0, 0.1]], [[1.0, 3.0]], [[0.5, 0.2]]]]),
            &device,
        );
        let targets =
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 1]]]), &device);

        let flat_logits = Tensor::<TestBackend, 2>::from_data(
            TensorData::from([[2.0, 1.0, 0.5], [0.1, 3.0, 0.2]]),
            &device,
        );
        let flat_targets =
            Tensor::<TestBackend, 1, Int>::from_data(TensorData::from([0, 1]), &device);
        let expected = CrossEntropyLossConfig::new()
            .init(&device)
            .forward(flat_logits, flat_targets);

        let [actual, expected]: [TensorData; 2] = Transaction::default()
            .register(loss.forward(logits, targets))
            .register(expected)
            .execute()
            .try_into()
            .expect("Correct amount of tensor data");

        actual.assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn pixel_ce_averages_over_valid_pixels_only() {
        let device = Default::default();
        let loss = PixelCrossEntropyLoss::default();

        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 1, 4], &device);
        let targets = Tensor::<TestBackend, 3, Int>::from_data(
            TensorData::from([[[0, 255, 1, 255]]]),
            &device,
        );

        let value = loss.forward(logits, targets).into_scalar().elem::<f32>();

        assert!((value - 2.0_f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn pixel_ce_all_ignored_gives_zero() {
        let device = Default::default();
        let loss = PixelCrossEntropyLoss::default();

        let logits = Tensor::<TestBackend, 4>::ones([1, 3, 2, 2], &device);
        let targets = Tensor::<TestBackend, 3, Int>::full([1, 2, 2], 255, &device);

        let value = loss.forward(logits, targets).into_scalar().elem::<f32>();

        assert_eq!(value, 0.0);
    }

    #[test]
    #[should_panic = "Spatial shape of logits"]
    fn pixel_ce_shape_mismatch_panics() {
        let device = Default::default();
        let loss = PixelCrossEntropyLoss::default();

        let logits = Tensor::<TestBackend, 4>::zeros([1, 3, 2, 2], &device);
        let targets = Tensor::<TestBackend, 3, Int>::zeros([1, 3, 3], &device);

        let _ = loss.forward(logits, targets);
    }
}
