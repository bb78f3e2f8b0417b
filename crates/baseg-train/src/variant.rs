//! Binary and severity delineation.
//!
//! Both variants share the step procedure and differ only in how the decode
//! head output meets its label:
//!
//! | variant  | decode output   | loss / metric input                    | tile output            |
//! |----------|-----------------|----------------------------------------|------------------------|
//! | Binary   | `[B, 1, H, W]`  | `[B, H, W]` logits, float targets      | `[B, H, W]` logits     |
//! | Severity | `[B, K, H, W]`  | `[B, K, H, W]` logits, class targets   | `[B, H, W]` class ids  |

use baseg_loss::{
    BinaryCriterion, DecodeLossKind, MulticlassCriterion, PixelCrossEntropyLossConfig,
};
use baseg_metric::{F1Score, JaccardIndex, MetricSet, SegmentationInput};
use burn::{prelude::*, tensor::Int};

use crate::{StepError, StepResult, IGNORE_INDEX};

/// Delineation variant as plain data, stored in the step policy.
#[derive(Clone, Debug, PartialEq)]
pub enum DelineationKind {
    /// Single-channel output trained with `loss`.
    Binary { loss: DecodeLossKind },
    /// Graded severity over `num_classes` classes, trained with cross-entropy.
    Severity { num_classes: usize },
}

impl DelineationKind {
    pub const fn is_severity(&self) -> bool {
        matches!(self, Self::Severity { .. })
    }

    /// Channels expected from the decode head.
    pub const fn num_classes(&self) -> usize {
        match self {
            Self::Binary { .. } => 1,
            Self::Severity { num_classes } => *num_classes,
        }
    }

    /// The variant with its configured loss, ignoring [`IGNORE_INDEX`].
    pub fn task<B: Backend>(&self) -> DelineationTask<B> {
        match self {
            Self::Binary { loss } => DelineationTask::binary(loss.init::<B>(IGNORE_INDEX)),
            Self::Severity { num_classes } => DelineationTask::severity(
                Box::new(
                    PixelCrossEntropyLossConfig::new()
                        .with_ignore_index(Some(IGNORE_INDEX))
                        .init(),
                ),
                *num_classes,
            ),
        }
    }

    /// F1 named `f1{suffix}`.
    pub fn f1_score<B: Backend>(&self, suffix: &str) -> F1Score<B> {
        let metric = match self {
            Self::Binary { .. } => F1Score::binary(),
            Self::Severity { num_classes } => F1Score::multiclass(*num_classes),
        };
        metric.with_name(format!("f1{suffix}"))
    }

    /// IoU named `iou{suffix}`.
    pub fn jaccard_index<B: Backend>(&self, suffix: &str) -> JaccardIndex<B> {
        let metric = match self {
            Self::Binary { .. } => JaccardIndex::binary(),
            Self::Severity { num_classes } => JaccardIndex::multiclass(*num_classes),
        };
        metric.with_name(format!("iou{suffix}"))
    }

    /// F1 and IoU registered as `f1{suffix}` and `iou{suffix}`.
    pub fn default_metrics<B: Backend>(&self, suffix: &str) -> MetricSet<B> {
        MetricSet::new()
            .with(format!("f1{suffix}"), self.f1_score(suffix))
            .with(format!("iou{suffix}"), self.jaccard_index(suffix))
    }
}

/// Delineation variant selected once at construction.
pub enum DelineationTask<B: Backend> {
    /// Single-channel burned / unburned output.
    Binary {
        criterion: Box<dyn BinaryCriterion<B>>,
    },
    /// Graded severity over `num_classes` classes.
    Severity {
        criterion: Box<dyn MulticlassCriterion<B>>,
        num_classes: usize,
    },
}

impl<B: Backend> DelineationTask<B> {
    pub fn binary(criterion: Box<dyn BinaryCriterion<B>>) -> Self {
        Self::Binary { criterion }
    }

    pub fn severity(criterion: Box<dyn MulticlassCriterion<B>>, num_classes: usize) -> Self {
        Self::Severity {
            criterion,
            num_classes,
        }
    }

    pub const fn is_severity(&self) -> bool {
        matches!(self, Self::Severity { .. })
    }

    /// Channels expected from the decode head.
    pub const fn num_classes(&self) -> usize {
        match self {
            Self::Binary { .. } => 1,
            Self::Severity { num_classes, .. } => *num_classes,
        }
    }

    /// Variant of this task. Binary tasks report the default loss kind,
    /// their criterion being opaque.
    pub fn kind(&self) -> DelineationKind {
        match self {
            Self::Binary { .. } => DelineationKind::Binary {
                loss: DecodeLossKind::Bce,
            },
            Self::Severity { num_classes, .. } => DelineationKind::Severity {
                num_classes: *num_classes,
            },
        }
    }

    /// Checks the decode output against the delineation label.
    pub fn check_shapes(&self, decode: &Tensor<B, 4>, label: &Tensor<B, 3, Int>) -> StepResult<()> {
        let [batch_size, channels, height, width] = decode.dims();
        let label_dims = label.dims();

        if channels != self.num_classes() || [batch_size, height, width] != label_dims {
            let context = match self {
                Self::Binary { .. } => "binary delineation",
                Self::Severity { .. } => "severity delineation",
            };
            return Err(StepError::ShapeMismatch {
                context: context.to_owned(),
                prediction: decode.dims().to_vec(),
                label: label_dims.to_vec(),
            });
        }
        Ok(())
    }

    /// Delineation loss for a decode output and its label.
    pub fn loss(&self, decode: Tensor<B, 4>, label: Tensor<B, 3, Int>) -> StepResult<Tensor<B, 1>> {
        self.check_shapes(&decode, &label)?;
        let loss = match self {
            Self::Binary { criterion } => {
                criterion.forward(squeeze_channel(decode), label.float())
            }
            Self::Severity { criterion, .. } => criterion.forward(decode, label),
        };
        Ok(loss)
    }

    /// Metric input following the same squeeze rule as [`Self::loss`].
    pub fn metric_input(&self, decode: Tensor<B, 4>, label: Tensor<B, 3, Int>) -> SegmentationInput<B> {
        match self {
            Self::Binary { .. } => SegmentationInput::binary(squeeze_channel(decode), label.float()),
            Self::Severity { .. } => SegmentationInput::multiclass(decode, label),
        }
    }

    /// Prediction of one tile batch: squeezed logits, or arg-max class ids.
    pub fn tile_output(&self, decode: Tensor<B, 4>) -> Tensor<B, 3> {
        match self {
            Self::Binary { .. } => squeeze_channel(decode),
            Self::Severity { .. } => squeeze_channel(decode.argmax(1).float()),
        }
    }
}

/// `[B, 1, H, W]` to `[B, H, W]`.
fn squeeze_channel<B: Backend>(decode: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch_size, _, height, width] = decode.dims();
    decode.reshape([batch_size, height, width])
}

#[cfg(test)]
mod tests {
    use baseg_loss::{PixelCrossEntropyLoss, SoftBceWithLogitsLoss};
    use burn::{tensor::TensorData, train::metric::Metric};

    use super::*;
    use crate::tests::TestBackend;

    fn binary() -> DelineationTask<TestBackend> {
        DelineationTask::binary(Box::new(SoftBceWithLogitsLoss::new()))
    }

    fn severity(num_classes: usize) -> DelineationTask<TestBackend> {
        DelineationTask::severity(Box::new(PixelCrossEntropyLoss::default()), num_classes)
    }

    #[test]
    fn binary_task_rejects_multichannel_decode() {
        let device = Default::default();
        let decode = Tensor::<TestBackend, 4>::zeros([2, 5, 8, 8], &device);
        let label = Tensor::<TestBackend, 3, Int>::zeros([2, 8, 8], &device);

        let err = binary().loss(decode, label).unwrap_err();

        assert!(matches!(
            err,
            StepError::ShapeMismatch { ref prediction, .. } if prediction == &vec![2, 5, 8, 8]
        ));
    }

    #[test]
    fn severity_task_rejects_single_channel_decode() {
        let device = Default::default();
        let decode = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let label = Tensor::<TestBackend, 3, Int>::zeros([1, 4, 4], &device);

        assert!(severity(5).loss(decode, label).is_err());
    }

    #[test]
    fn spatial_mismatch_is_reported() {
        let device = Default::default();
        let decode = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        let label = Tensor::<TestBackend, 3, Int>::zeros([1, 4, 5], &device);

        let err = binary().check_shapes(&decode, &label).unwrap_err();

        assert!(err.to_string().contains("binary delineation"));
    }

    #[test]
    fn severity_tile_output_is_argmax_class() {
        let device = Default::default();
        let decode = Tensor::<TestBackend, 4>::from_data(
            TensorData::from([[[[0.1, 2.0]], [[3.0, 0.0]], [[0.2, 0.1]]]]),
            &device,
        );

        let output = severity(3)
            .tile_output(decode)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_eq!(output, vec![1.0, 0.0]);
    }

    #[test]
    fn metric_names_carry_suffix() {
        let kind = DelineationKind::Binary {
            loss: DecodeLossKind::Dice,
        };
        let metrics = kind.default_metrics::<TestBackend>("_del");

        assert_eq!(metrics.names(), vec!["f1_del", "iou_del"]);
        assert_eq!(Metric::name(&kind.jaccard_index::<TestBackend>("_del")), "iou_del");
    }

    #[test]
    fn severity_kind_builds_multiclass_task() {
        let kind = DelineationKind::Severity { num_classes: 4 };

        let task = kind.task::<TestBackend>();

        assert!(task.is_severity());
        assert_eq!(task.num_classes(), 4);
        assert_eq!(task.kind(), kind);
        assert_eq!(binary().kind().num_classes(), 1);
    }
}
