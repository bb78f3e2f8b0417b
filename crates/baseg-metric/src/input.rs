use burn::{prelude::*, tensor::Int};

/// Prediction and target pair handed to a [`StreamingMetric`](crate::StreamingMetric).
#[derive(Debug, Clone)]
pub enum SegmentationInput<B: Backend> {
    /// Single-channel logits with float targets in `{0, 1}` (or the ignore index).
    Binary {
        /// Logits with shape `[batch_size, height, width]`.
        logits: Tensor<B, 3>,
        /// Targets with shape `[batch_size, height, width]`.
        targets: Tensor<B, 3>,
    },
    /// Class logits with integer class targets.
    Multiclass {
        /// Logits with shape `[batch_size, num_classes, height, width]`.
        logits: Tensor<B, 4>,
        /// Targets with shape `[batch_size, height, width]`.
        targets: Tensor<B, 3, Int>,
    },
}

impl<B: Backend> SegmentationInput<B> {
    pub fn binary(logits: Tensor<B, 3>, targets: Tensor<B, 3>) -> Self {
        Self::Binary { logits, targets }
    }

    pub fn multiclass(logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Self {
        Self::Multiclass { logits, targets }
    }

    /// Shape of the logits.
    pub fn logits_dims(&self) -> Vec<usize> {
        match self {
            Self::Binary { logits, .. } => logits.dims().to_vec(),
            Self::Multiclass { logits, .. } => logits.dims().to_vec(),
        }
    }

    /// Shape of the targets, `[batch_size, height, width]` for both variants.
    pub fn targets_dims(&self) -> [usize; 3] {
        match self {
            Self::Binary { targets, .. } => targets.dims(),
            Self::Multiclass { targets, .. } => targets.dims(),
        }
    }

    pub const fn is_binary(&self) -> bool {
        matches!(self, Self::Binary { .. })
    }
}
