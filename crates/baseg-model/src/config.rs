use burn::prelude::*;

use crate::{
    encoder_decoder::{ConvBlockConfig, EncoderDecoder, SegHeadConfig},
    error::{ModelError, ModelResult},
};

/// Configuration of the convolutional encoder.
///
/// Stage `0` keeps the input resolution; every following stage halves it.
#[derive(Config, Debug)]
pub struct EncoderConfig {
    /// Number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,
    /// Output channels of each encoder stage.
    #[config(default = "vec![32, 64, 128, 256]")]
    pub channels: Vec<usize>,
}

/// Configuration of the decode head section.
///
/// Besides the delineation head itself this section carries the auxiliary
/// land-cover head and the weight of the auxiliary loss, so that a single
/// section describes everything the multi-task step needs to know about the
/// outputs.
#[derive(Config, Debug)]
pub struct DecodeHeadConfig {
    /// Encoder stage feeding the delineation head.
    #[config(default = 3)]
    pub in_index: usize,
    /// Hidden channels of the delineation head.
    #[config(default = 64)]
    pub channels: usize,
    /// Delineation classes: 1 for binary logits, the number of grades for severity.
    #[config(default = 1)]
    pub num_classes: usize,
    /// Dropout applied before both classifiers.
    #[config(default = 0.1)]
    pub dropout: f64,
    /// Encoder stage feeding the auxiliary head.
    #[config(default = 2)]
    pub aux_in_index: usize,
    /// Hidden channels of the auxiliary head.
    #[config(default = 64)]
    pub aux_channels: usize,
    /// Number of land-cover classes predicted by the auxiliary head.
    #[config(default = 11)]
    pub aux_classes: usize,
    /// Weight of the auxiliary loss in the composite loss.
    #[config(default = 1.0)]
    pub aux_factor: f64,
}

/// Full description of a dual-head segmentor.
#[derive(Config, Debug)]
pub struct SegmentorConfig {
    #[config(default = "EncoderConfig::new()")]
    pub encoder: EncoderConfig,
    #[config(default = "DecodeHeadConfig::new()")]
    pub decode_head: DecodeHeadConfig,
}

impl SegmentorConfig {
    /// Builds the encoder-decoder described by this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] when a head points at a
    /// missing encoder stage or a channel/class count is zero.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<EncoderDecoder<B>> {
        self.validate()?;

        let encoder = &self.encoder;
        let head = &self.decode_head;

        let mut stages = Vec::with_capacity(encoder.channels.len());
        let mut in_channels = encoder.in_channels;
        for (index, &out_channels) in encoder.channels.iter().enumerate() {
            let stride = if index == 0 { 1 } else { 2 };
            stages.push(
                ConvBlockConfig::new(in_channels, out_channels)
                    .with_stride(stride)
                    .init(device),
            );
            in_channels = out_channels;
        }

        let decode_head = SegHeadConfig::new(
            encoder.channels[head.in_index],
            head.channels,
            head.num_classes,
        )
        .with_dropout(head.dropout)
        .init(device);

        let auxiliary_head = SegHeadConfig::new(
            encoder.channels[head.aux_in_index],
            head.aux_channels,
            head.aux_classes,
        )
        .with_dropout(head.dropout)
        .init(device);

        Ok(EncoderDecoder {
            stages,
            decode_head,
            auxiliary_head,
            decode_in_index: head.in_index,
            aux_in_index: head.aux_in_index,
        })
    }

    fn validate(&self) -> ModelResult<()> {
        let stages = self.encoder.channels.len();
        let head = &self.decode_head;

        let invalid = |reason: String| Err(ModelError::InvalidConfiguration { reason });

        if self.encoder.in_channels == 0 {
            return invalid("encoder needs at least one input channel".to_owned());
        }
        if stages == 0 {
            return invalid("encoder needs at least one stage".to_owned());
        }
        if self.encoder.channels.contains(&0) {
            return invalid(format!(
                "encoder stage channels must be positive, got {:?}",
                self.encoder.channels
            ));
        }
        if head.in_index >= stages {
            return invalid(format!(
                "decode head reads stage {} but the encoder has {stages} stages",
                head.in_index
            ));
        }
        if head.aux_in_index >= stages {
            return invalid(format!(
                "auxiliary head reads stage {} but the encoder has {stages} stages",
                head.aux_in_index
            ));
        }
        if head.num_classes == 0 || head.aux_classes == 0 {
            return invalid(format!(
                "heads need at least one class, got num_classes={} aux_classes={}",
                head.num_classes, head.aux_classes
            ));
        }
        if head.channels == 0 || head.aux_channels == 0 {
            return invalid("head hidden channels must be positive".to_owned());
        }
        if !(0.0..1.0).contains(&head.dropout) {
            return invalid(format!("dropout must be in [0, 1), got {}", head.dropout));
        }
        Ok(())
    }
}
