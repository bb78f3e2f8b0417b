//! Segmentation losses honouring an ignore label.
//!
//! Every loss in this crate treats pixels whose target equals the configured
//! ignore index (255 by default) as absent: they contribute neither to the
//! loss value nor to its gradient.
//!
//! ## Delineation losses (binary)
//! - [`SoftBceWithLogitsLoss`]: binary cross-entropy on logits with optional
//!   label smoothing and positive-class weight
//! - [`DiceLoss`]: region-overlap loss on sigmoid probabilities
//!
//! ## Classification losses (multiclass)
//! - [`PixelCrossEntropyLoss`]: per-pixel cross-entropy averaged over the
//!   non-ignored pixels
//!
//! The step policy consumes losses through the [`BinaryCriterion`] and
//! [`MulticlassCriterion`] traits, so any implementation (including test
//! doubles) can be injected. [`DecodeLossKind`] selects the binary loss from
//! configuration.

mod criterion;
mod cross_entropy;
mod dice;
mod soft_bce;

pub use criterion::{BinaryCriterion, DecodeLossKind, MulticlassCriterion};
pub use cross_entropy::{PixelCrossEntropyLoss, PixelCrossEntropyLossConfig};
pub use dice::{DiceLoss, DiceLossConfig};
pub use soft_bce::{SoftBceWithLogitsLoss, SoftBceWithLogitsLossConfig};

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
