//! Dual-head encoder-decoder for burned-area segmentation.
//!
//! The model produces two logit maps at input resolution:
//!
//! - a **decode** (delineation) map, `[batch, num_classes, height, width]`,
//!   where `num_classes` is 1 for binary delineation and the number of
//!   severity grades otherwise;
//! - an **auxiliary** land-cover map, `[batch, aux_classes, height, width]`.
//!
//! Models are built from [`SegmentorConfig`], which plays the role of a model
//! registry entry: the configuration fully describes the network and
//! [`SegmentorConfig::init`] constructs it on a device.
//!
//! Training code is written against the [`DualHeadModel`] trait so any network
//! returning a [`DualHeadOutput`] can be plugged into the step policy.

mod config;
mod encoder_decoder;
mod error;

use burn::{prelude::*, tensor::backend::Backend};
use derive_new::new;

pub use config::{DecodeHeadConfig, EncoderConfig, SegmentorConfig};
pub use encoder_decoder::{ConvBlock, ConvBlockConfig, EncoderDecoder, SegHead, SegHeadConfig};
pub use error::{ModelError, ModelResult};

/// Pair of logit maps produced by one forward pass.
#[derive(new, Debug, Clone)]
pub struct DualHeadOutput<B: Backend> {
    /// Delineation logits with shape `[batch_size, num_classes, height, width]`.
    pub decode: Tensor<B, 4>,
    /// Land-cover logits with shape `[batch_size, aux_classes, height, width]`.
    pub auxiliary: Tensor<B, 4>,
}

/// A segmentation network with a delineation head and an auxiliary head.
pub trait DualHeadModel<B: Backend> {
    /// Runs the network on a batch of images `[batch_size, channels, height, width]`.
    ///
    /// Both outputs are returned at the spatial resolution of `images`.
    fn forward(&self, images: Tensor<B, 4>) -> DualHeadOutput<B>;
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    pub type TestBackend = NdArray;
}
