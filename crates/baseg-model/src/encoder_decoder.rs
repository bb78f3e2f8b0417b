//! Convolutional encoder with a delineation head and a land-cover head.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::{
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::{DualHeadModel, DualHeadOutput};

/// Configuration for a [`ConvBlock`].
#[derive(Config, Debug)]
pub struct ConvBlockConfig {
    in_channels: usize,
    out_channels: usize,
    #[config(default = 1)]
    stride: usize,
}

impl ConvBlockConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ConvBlock<B> {
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [3, 3])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);

        ConvBlock {
            conv,
            norm: BatchNormConfig::new(self.out_channels).init(device),
            activation: Relu::new(),
        }
    }
}

/// 3x3 convolution, batch norm and ReLU.
///
/// # Shapes
///   - input: `[batch_size, in_channels, height, width]`
///   - output: `[batch_size, out_channels, height / stride, width / stride]`
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

/// Configuration for a [`SegHead`].
#[derive(Config, Debug)]
pub struct SegHeadConfig {
    in_channels: usize,
    channels: usize,
    num_classes: usize,
    #[config(default = 0.1)]
    dropout: f64,
}

impl SegHeadConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SegHead<B> {
        SegHead {
            block: ConvBlockConfig::new(self.in_channels, self.channels).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            classifier: Conv2dConfig::new([self.channels, self.num_classes], [1, 1]).init(device),
        }
    }
}

/// Fully convolutional classification head.
///
/// Produces logits at the resolution of the feature map it reads.
#[derive(Module, Debug)]
pub struct SegHead<B: Backend> {
    block: ConvBlock<B>,
    dropout: Dropout,
    classifier: Conv2d<B>,
}

impl<B: Backend> SegHead<B> {
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.block.forward(features);
        let x = self.dropout.forward(x);
        self.classifier.forward(x)
    }
}

/// Encoder-decoder segmentor with a delineation and an auxiliary head.
///
/// Built through [`SegmentorConfig::init`](crate::SegmentorConfig::init).
#[derive(Module, Debug)]
pub struct EncoderDecoder<B: Backend> {
    pub(crate) stages: Vec<ConvBlock<B>>,
    pub(crate) decode_head: SegHead<B>,
    pub(crate) auxiliary_head: SegHead<B>,
    pub(crate) decode_in_index: usize,
    pub(crate) aux_in_index: usize,
}

impl<B: Backend> EncoderDecoder<B> {
    /// Runs the encoder and returns the output of every stage.
    pub fn extract_features(&self, images: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut features = Vec::with_capacity(self.stages.len());
        let mut x = images;
        for stage in &self.stages {
            x = stage.forward(x);
            features.push(x.clone());
        }
        features
    }
}

impl<B: Backend> DualHeadModel<B> for EncoderDecoder<B> {
    fn forward(&self, images: Tensor<B, 4>) -> DualHeadOutput<B> {
        let [_, _, height, width] = images.dims();
        let features = self.extract_features(images);

        let decode = self
            .decode_head
            .forward(features[self.decode_in_index].clone());
        let auxiliary = self
            .auxiliary_head
            .forward(features[self.aux_in_index].clone());

        DualHeadOutput::new(
            resize_to(decode, [height, width]),
            resize_to(auxiliary, [height, width]),
        )
    }
}

/// Bilinear (corner aligned) upsampling to `size`, skipped when already there.
fn resize_to<B: Backend>(x: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
    let [_, _, height, width] = x.dims();
    if [height, width] == size {
        return x;
    }
    interpolate(
        x,
        size,
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}
