use burn::{
    prelude::*,
    tensor::{backend::Backend, Int},
};

use crate::{DiceLossConfig, SoftBceWithLogitsLossConfig};

/// A loss over binary logits and float targets.
///
/// # Shapes
///
/// - logits: `[batch_size, height, width]`
/// - targets: `[batch_size, height, width]`
/// - output: `[1]`
pub trait BinaryCriterion<B: Backend> {
    fn forward(&self, logits: Tensor<B, 3>, targets: Tensor<B, 3>) -> Tensor<B, 1>;
}

/// A loss over class logits and integer class targets.
///
/// # Shapes
///
/// - logits: `[batch_size, num_classes, height, width]`
/// - targets: `[batch_size, height, width]`
/// - output: `[1]`
pub trait MulticlassCriterion<B: Backend> {
    fn forward(&self, logits: Tensor<B, 4>, targets: Tensor<B, 3, Int>) -> Tensor<B, 1>;
}

/// Loss used for the binary delineation head.
#[derive(Config, Debug, PartialEq)]
pub enum DecodeLossKind {
    /// [`SoftBceWithLogitsLoss`](crate::SoftBceWithLogitsLoss).
    Bce,
    /// [`DiceLoss`](crate::DiceLoss).
    Dice,
}

impl DecodeLossKind {
    /// Maps a loss name to its kind: `"bce"` selects BCE, anything else Dice.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("bce") {
            Self::Bce
        } else {
            Self::Dice
        }
    }

    /// Builds the selected loss with the given ignore index.
    pub fn init<B: Backend>(&self, ignore_index: i64) -> Box<dyn BinaryCriterion<B>> {
        match self {
            Self::Bce => Box::new(
                SoftBceWithLogitsLossConfig::new()
                    .with_ignore_index(Some(ignore_index))
                    .init(),
            ),
            Self::Dice => Box::new(
                DiceLossConfig::new()
                    .with_ignore_index(Some(ignore_index))
                    .init(),
            ),
        }
    }
}
