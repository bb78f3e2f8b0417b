//! F1 and Jaccard scores over [`ConfusionStats`].

use core::marker::PhantomData;

use burn::{
    prelude::*,
    train::metric::{
        state::{FormatOptions, NumericMetricState},
        Metric, MetricEntry, MetricMetadata, Numeric,
    },
};

use crate::{ConfusionStats, SegmentationInput, StreamingMetric, DEFAULT_IGNORE_INDEX};

/// How predictions are turned into classes.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricTask {
    /// Positive when `sigmoid(logit) > threshold`.
    Binary { threshold: f64 },
    /// Arg-max over `num_classes` channels.
    Multiclass { num_classes: usize },
}

impl MetricTask {
    fn num_classes(&self) -> usize {
        match self {
            Self::Binary { .. } => 1,
            Self::Multiclass { num_classes } => *num_classes,
        }
    }

    fn collect<B: Backend>(
        &self,
        input: &SegmentationInput<B>,
        ignore_index: Option<i64>,
    ) -> ConfusionStats {
        match (self, input) {
            (Self::Binary { threshold }, SegmentationInput::Binary { logits, targets }) => {
                ConfusionStats::binary(logits.clone(), targets.clone(), *threshold, ignore_index)
            }
            (
                Self::Multiclass { num_classes },
                SegmentationInput::Multiclass { logits, targets },
            ) => ConfusionStats::multiclass(
                logits.clone(),
                targets.clone(),
                *num_classes,
                ignore_index,
            ),
            (task, input) => panic!(
                "{task:?} metric cannot score a {} input",
                if input.is_binary() { "binary" } else { "multiclass" }
            ),
        }
    }
}

macro_rules! confusion_metric {
    ($(#[$doc:meta])* $name:ident, $score:ident) => {
        $(#[$doc])*
        ///
        /// Works both as a [`StreamingMetric`] for hand-driven loops and as a
        /// learner [`Metric`] reporting under [`Metric::name`].
        pub struct $name<B: Backend> {
            name: String,
            task: MetricTask,
            ignore_index: Option<i64>,
            stats: ConfusionStats,
            state: NumericMetricState,
            _b: PhantomData<B>,
        }

        impl<B: Backend> $name<B> {
            /// Binary metric with a 0.5 probability threshold.
            pub fn binary() -> Self {
                Self::new(MetricTask::Binary { threshold: 0.5 })
            }

            /// Multiclass metric, macro-averaged.
            pub fn multiclass(num_classes: usize) -> Self {
                Self::new(MetricTask::Multiclass { num_classes })
            }

            pub fn new(task: MetricTask) -> Self {
                Self {
                    name: stringify!($score).to_owned(),
                    stats: ConfusionStats::zeros(task.num_classes()),
                    task,
                    ignore_index: Some(DEFAULT_IGNORE_INDEX),
                    state: NumericMetricState::default(),
                    _b: PhantomData,
                }
            }

            /// Reports the metric as `name` instead of its score name.
            pub fn with_name(mut self, name: impl Into<String>) -> Self {
                self.name = name.into();
                self
            }

            pub fn with_ignore_index(mut self, ignore_index: Option<i64>) -> Self {
                self.ignore_index = ignore_index;
                self
            }

            pub fn task(&self) -> &MetricTask {
                &self.task
            }

            /// Counts accumulated since the last reset.
            pub fn stats(&self) -> &ConfusionStats {
                &self.stats
            }
        }

        impl<B: Backend> StreamingMetric<B> for $name<B> {
            fn update(&mut self, input: &SegmentationInput<B>) -> f64 {
                let batch = self.task.collect(input, self.ignore_index);
                self.stats.merge(&batch);
                batch.$score()
            }

            fn compute(&self) -> f64 {
                self.stats.$score()
            }

            fn reset(&mut self) {
                self.stats = ConfusionStats::zeros(self.task.num_classes());
            }
        }

        impl<B: Backend> Metric for $name<B> {
            type Input = SegmentationInput<B>;

            fn name(&self) -> String {
                self.name.clone()
            }

            fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
                let value = StreamingMetric::update(self, item);
                let [batch_size, ..] = item.targets_dims();
                self.state.update(
                    value,
                    batch_size,
                    FormatOptions::new(Metric::name(self)).precision(5),
                )
            }

            fn clear(&mut self) {
                StreamingMetric::reset(self);
                self.state.reset();
            }
        }

        /// Score over the counts pooled since the last clear.
        impl<B: Backend> Numeric for $name<B> {
            fn value(&self) -> f64 {
                self.stats.$score()
            }
        }
    };
}

confusion_metric!(
    /// F1 score (Dice coefficient) over thresholded or arg-max predictions.
    F1Score,
    f1
);

confusion_metric!(
    /// Jaccard index (IoU) over thresholded or arg-max predictions.
    JaccardIndex,
    iou
);

#[cfg(test)]
mod tests {
    use burn::tensor::{Int, TensorData};

    use super::*;
    use crate::tests::{metadata, TestBackend};

    fn binary_input(logits: [f32; 2], targets: [f32; 2]) -> SegmentationInput<TestBackend> {
        let device = Default::default();
        SegmentationInput::binary(
            Tensor::from_data(TensorData::new(logits.to_vec(), [1, 1, 2]), &device),
            Tensor::from_data(TensorData::new(targets.to_vec(), [1, 1, 2]), &device),
        )
    }

    #[test]
    fn f1_compute_pools_counts_across_batches() {
        let mut f1 = F1Score::<TestBackend>::binary();

        // tp = 1
        let first = StreamingMetric::update(&mut f1, &binary_input([4.0, -4.0], [1.0, 0.0]));
        // fp = 1, fn = 1
        let second = StreamingMetric::update(&mut f1, &binary_input([4.0, -4.0], [0.0, 1.0]));

        assert_eq!(first, 1.0);
        assert_eq!(second, 0.0);
        assert!((StreamingMetric::compute(&f1) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn reset_clears_accumulated_counts() {
        let mut iou = JaccardIndex::<TestBackend>::binary();

        StreamingMetric::update(&mut iou, &binary_input([4.0, 4.0], [1.0, 1.0]));
        assert_eq!(StreamingMetric::compute(&iou), 1.0);

        StreamingMetric::reset(&mut iou);

        assert_eq!(iou.stats(), &ConfusionStats::zeros(1));
        assert_eq!(StreamingMetric::compute(&iou), 0.0);
    }

    #[test]
    fn ignored_targets_do_not_count() {
        let mut f1 = F1Score::<TestBackend>::binary();

        let value = StreamingMetric::update(&mut f1, &binary_input([4.0, 4.0], [255.0, 255.0]));

        assert_eq!(value, 0.0);
        assert_eq!(f1.stats().false_positives, vec![0]);
    }

    #[test]
    fn multiclass_jaccard_uses_argmax() {
        let device = Default::default();
        let mut iou = JaccardIndex::<TestBackend>::multiclass(2);

        let input = SegmentationInput::multiclass(
            Tensor::from_data(
                TensorData::from([[[[0.9, 0.1]], [[0.1, 0.9]]]]),
                &device,
            ),
            Tensor::<TestBackend, 3, Int>::from_data(TensorData::from([[[0, 1]]]), &device),
        );

        assert_eq!(StreamingMetric::update(&mut iou, &input), 1.0);
    }

    #[test]
    #[should_panic = "cannot score a multiclass input"]
    fn binary_metric_rejects_multiclass_input() {
        let device = Default::default();
        let mut f1 = F1Score::<TestBackend>::binary();

        let input = SegmentationInput::multiclass(
            Tensor::zeros([1, 2, 1, 1], &device),
            Tensor::zeros([1, 1, 1], &device),
        );

        StreamingMetric::update(&mut f1, &input);
    }

    #[test]
    fn learner_metric_reports_pooled_score_under_its_name() {
        let mut f1 = F1Score::<TestBackend>::binary().with_name("f1_del");

        Metric::update(&mut f1, &binary_input([4.0, -4.0], [1.0, 0.0]), &metadata());
        Metric::update(&mut f1, &binary_input([4.0, -4.0], [0.0, 1.0]), &metadata());

        assert_eq!(Metric::name(&f1), "f1_del");
        assert!((Numeric::value(&f1) - 0.5).abs() < 1e-12);

        Metric::clear(&mut f1);

        assert_eq!(Numeric::value(&f1), 0.0);
        assert_eq!(f1.stats(), &ConfusionStats::zeros(1));
    }

    #[test]
    fn default_names_follow_the_score() {
        assert_eq!(Metric::name(&F1Score::<TestBackend>::binary()), "f1");
        assert_eq!(Metric::name(&JaccardIndex::<TestBackend>::multiclass(3)), "iou");
    }
}
