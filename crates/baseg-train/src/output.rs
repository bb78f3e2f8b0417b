//! Learner items of the train and validation steps.
//!
//! [`MultiTaskOutput`] is what `TrainStep` and `ValidStep` hand to the Burn
//! learner. Metrics read it through adaptors:
//!
//! - [`LossInput`]: composite loss, for Burn's `LossMetric`
//! - [`HeadLosses`]: per-head losses, for [`HeadLossMetric`]
//! - [`HeadInputs`]: per-head prediction and label, for [`HeadMetric`]
//!   wrapping any segmentation metric such as `F1Score`

use core::marker::PhantomData;

use baseg_metric::SegmentationInput;
use burn::{
    prelude::*,
    tensor::cast::ToElement,
    train::metric::{
        state::{FormatOptions, NumericMetricState},
        Adaptor, ItemLazy, LossInput, Metric, MetricEntry, MetricMetadata, Numeric,
    },
};
use derive_new::new;

/// Output head of the dual-head model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Head {
    /// Delineation.
    Decode,
    /// Land cover.
    Auxiliary,
}

/// Output of one learner step over both heads.
#[derive(new, Debug, Clone)]
pub struct MultiTaskOutput<B: Backend> {
    /// `loss_del + aux_factor * loss_aux`
    pub loss: Tensor<B, 1>,
    pub loss_decode: Tensor<B, 1>,
    pub loss_auxiliary: Tensor<B, 1>,
    /// Delineation logits and labels, squeezed like the loss input.
    pub decode: SegmentationInput<B>,
    /// Land-cover logits and labels after masking.
    pub auxiliary: SegmentationInput<B>,
}

impl<B: Backend> MultiTaskOutput<B> {
    pub fn batch_size(&self) -> usize {
        self.decode.targets_dims()[0]
    }
}

impl<B: Backend> ItemLazy for MultiTaskOutput<B> {
    type ItemSync = Self;

    fn sync(self) -> Self::ItemSync {
        self
    }
}

impl<B: Backend> Adaptor<LossInput<B>> for MultiTaskOutput<B> {
    fn adapt(&self) -> LossInput<B> {
        LossInput::new(self.loss.clone())
    }
}

impl<B: Backend> Adaptor<HeadLosses<B>> for MultiTaskOutput<B> {
    fn adapt(&self) -> HeadLosses<B> {
        HeadLosses::new(
            self.loss_decode.clone(),
            self.loss_auxiliary.clone(),
            self.batch_size(),
        )
    }
}

impl<B: Backend> Adaptor<HeadInputs<B>> for MultiTaskOutput<B> {
    fn adapt(&self) -> HeadInputs<B> {
        HeadInputs::new(self.decode.clone(), self.auxiliary.clone())
    }
}

/// Loss of each head.
#[derive(new, Debug, Clone)]
pub struct HeadLosses<B: Backend> {
    pub decode: Tensor<B, 1>,
    pub auxiliary: Tensor<B, 1>,
    pub batch_size: usize,
}

impl<B: Backend> HeadLosses<B> {
    pub fn get(&self, head: Head) -> &Tensor<B, 1> {
        match head {
            Head::Decode => &self.decode,
            Head::Auxiliary => &self.auxiliary,
        }
    }
}

/// Prediction and label of each head.
#[derive(new, Debug, Clone)]
pub struct HeadInputs<B: Backend> {
    pub decode: SegmentationInput<B>,
    pub auxiliary: SegmentationInput<B>,
}

impl<B: Backend> HeadInputs<B> {
    pub fn get(&self, head: Head) -> &SegmentationInput<B> {
        match head {
            Head::Decode => &self.decode,
            Head::Auxiliary => &self.auxiliary,
        }
    }
}

/// Running mean of one head's loss, reported as `loss_del` or `loss_aux`.
pub struct HeadLossMetric<B: Backend> {
    head: Head,
    state: NumericMetricState,
    _b: PhantomData<B>,
}

impl<B: Backend> HeadLossMetric<B> {
    pub fn new(head: Head) -> Self {
        Self {
            head,
            state: NumericMetricState::default(),
            _b: PhantomData,
        }
    }
}

impl<B: Backend> Metric for HeadLossMetric<B> {
    type Input = HeadLosses<B>;

    fn name(&self) -> String {
        match self.head {
            Head::Decode => "loss_del",
            Head::Auxiliary => "loss_aux",
        }
        .to_owned()
    }

    fn update(&mut self, item: &Self::Input, _metadata: &MetricMetadata) -> MetricEntry {
        let loss = item.get(self.head).clone().into_scalar().to_f64();
        self.state.update(
            loss,
            item.batch_size,
            FormatOptions::new(self.name()).precision(5),
        )
    }

    fn clear(&mut self) {
        self.state.reset();
    }
}

impl<B: Backend> Numeric for HeadLossMetric<B> {
    fn value(&self) -> f64 {
        self.state.value()
    }
}

/// Feeds a segmentation metric with the output of one head.
pub struct HeadMetric<M> {
    head: Head,
    metric: M,
}

impl<M> HeadMetric<M> {
    pub fn new(head: Head, metric: M) -> Self {
        Self { head, metric }
    }

    pub fn head(&self) -> Head {
        self.head
    }
}

impl<B, M> Metric for HeadMetric<M>
where
    B: Backend,
    M: Metric<Input = SegmentationInput<B>>,
{
    type Input = HeadInputs<B>;

    fn name(&self) -> String {
        self.metric.name()
    }

    fn update(&mut self, item: &Self::Input, metadata: &MetricMetadata) -> MetricEntry {
        self.metric.update(item.get(self.head), metadata)
    }

    fn clear(&mut self) {
        self.metric.clear();
    }
}

impl<B, M> Numeric for HeadMetric<M>
where
    B: Backend,
    M: Metric<Input = SegmentationInput<B>> + Numeric,
{
    fn value(&self) -> f64 {
        self.metric.value()
    }
}
