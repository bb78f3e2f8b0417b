//! Per-class confusion counts.

use burn::{
    prelude::*,
    tensor::{activation::sigmoid, cast::ToElement, Int},
};

/// Running true positive, false positive and false negative counts per class.
///
/// Binary statistics hold a single entry for the positive class.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfusionStats {
    pub true_positives: Vec<u64>,
    pub false_positives: Vec<u64>,
    pub false_negatives: Vec<u64>,
}

impl ConfusionStats {
    /// Empty counts for `num_classes` classes.
    pub fn zeros(num_classes: usize) -> Self {
        Self {
            true_positives: vec![0; num_classes],
            false_positives: vec![0; num_classes],
            false_negatives: vec![0; num_classes],
        }
    }

    pub fn num_classes(&self) -> usize {
        self.true_positives.len()
    }

    /// Adds the counts of `other` class by class.
    ///
    /// # Panics
    ///
    /// If the class counts differ.
    pub fn merge(&mut self, other: &Self) {
        assert_eq!(
            self.num_classes(),
            other.num_classes(),
            "Cannot merge confusion counts over different class counts"
        );
        let pairs = [
            (&mut self.true_positives, &other.true_positives),
            (&mut self.false_positives, &other.false_positives),
            (&mut self.false_negatives, &other.false_negatives),
        ];
        for (acc, add) in pairs {
            acc.iter_mut().zip(add).for_each(|(a, b)| *a += b);
        }
    }

    /// Counts from binary logits.
    ///
    /// A pixel is predicted positive when `sigmoid(logit) > threshold` and is
    /// a positive target when its target exceeds 0.5.
    pub fn binary<B: Backend>(
        logits: Tensor<B, 3>,
        targets: Tensor<B, 3>,
        threshold: f64,
        ignore_index: Option<i64>,
    ) -> Self {
        let logits_dims = logits.dims();
        let targets_dims = targets.dims();
        assert_eq!(
            logits_dims, targets_dims,
            "Shape of logits ({logits_dims:?}) must match targets ({targets_dims:?})"
        );

        let valid = match ignore_index {
            Some(index) => targets.clone().not_equal_elem(index as f64).float(),
            None => targets.ones_like(),
        };
        let predicted = sigmoid(logits).greater_elem(threshold).float() * valid.clone();
        let actual = targets.greater_elem(0.5).float() * valid;

        let (tp, fp, fn_) = count(predicted, actual);
        Self {
            true_positives: vec![tp],
            false_positives: vec![fp],
            false_negatives: vec![fn_],
        }
    }

    /// Counts from class logits via arg-max.
    ///
    /// Targets outside `[0, num_classes)` are treated like the ignore index.
    pub fn multiclass<B: Backend>(
        logits: Tensor<B, 4>,
        targets: Tensor<B, 3, Int>,
        num_classes: usize,
        ignore_index: Option<i64>,
    ) -> Self {
        let [batch_size, channels, height, width] = logits.dims();
        let targets_dims = targets.dims();
        assert_eq!(
            [batch_size, height, width],
            targets_dims,
            "Spatial shape of logits ({:?}) must match targets ({targets_dims:?})",
            [batch_size, height, width]
        );
        assert_eq!(
            channels, num_classes,
            "Logits carry {channels} classes, metric expects {num_classes}"
        );

        let predictions = logits.argmax(1).reshape([batch_size, height, width]);
        let mut valid = targets
            .clone()
            .greater_equal_elem(0)
            .bool_and(targets.clone().lower_elem(num_classes as i64));
        if let Some(index) = ignore_index {
            valid = valid.bool_and(targets.clone().not_equal_elem(index));
        }

        let mut stats = Self::zeros(num_classes);
        for class in 0..num_classes {
            let predicted = predictions
                .clone()
                .equal_elem(class as i64)
                .bool_and(valid.clone())
                .float();
            let actual = targets
                .clone()
                .equal_elem(class as i64)
                .bool_and(valid.clone())
                .float();
            let (tp, fp, fn_) = count(predicted, actual);
            stats.true_positives[class] = tp;
            stats.false_positives[class] = fp;
            stats.false_negatives[class] = fn_;
        }
        stats
    }

    /// Macro-averaged F1: `2tp / (2tp + fp + fn)`.
    pub fn f1(&self) -> f64 {
        self.macro_average(|tp, fp, fn_| 2.0 * tp / (2.0 * tp + fp + fn_))
    }

    /// Macro-averaged IoU: `tp / (tp + fp + fn)`.
    pub fn iou(&self) -> f64 {
        self.macro_average(|tp, fp, fn_| tp / (tp + fp + fn_))
    }

    /// Averages `score` over classes with a non-zero `tp + fp + fn`.
    /// Returns 0 when no class qualifies.
    fn macro_average(&self, score: impl Fn(f64, f64, f64) -> f64) -> f64 {
        let scores: Vec<f64> = (0..self.num_classes())
            .filter_map(|class| {
                let tp = self.true_positives[class] as f64;
                let fp = self.false_positives[class] as f64;
                let fn_ = self.false_negatives[class] as f64;
                (tp + fp + fn_ > 0.0).then(|| score(tp, fp, fn_))
            })
            .collect();

        if scores.is_empty() {
            0.0
        } else {
            scores.iter().sum::<f64>() / scores.len() as f64
        }
    }
}

/// `(tp, fp, fn)` from 0/1 prediction and target masks.
fn count<B: Backend, const D: usize>(predicted: Tensor<B, D>, actual: Tensor<B, D>) -> (u64, u64, u64) {
    let tp = (predicted.clone() * actual.clone()).sum().into_scalar().to_f64();
    let predicted = predicted.sum().into_scalar().to_f64();
    let actual = actual.sum().into_scalar().to_f64();

    let tp_count = tp.round() as u64;
    (
        tp_count,
        (predicted.round() as u64).saturating_sub(tp_count),
        (actual.round() as u64).saturating_sub(tp_count),
    )
}
