use burn::prelude::*;

use crate::SegmentationInput;

/// A metric accumulated over the batches of one epoch.
pub trait StreamingMetric<B: Backend> {
    /// Accumulates `input` and returns the metric value of this batch alone.
    fn update(&mut self, input: &SegmentationInput<B>) -> f64;

    /// Value over every batch since the last reset.
    fn compute(&self) -> f64;

    /// Clears the accumulated state.
    fn reset(&mut self);
}

/// Named metrics updated together from the same input.
pub struct MetricSet<B: Backend> {
    metrics: Vec<(String, Box<dyn StreamingMetric<B>>)>,
}

impl<B: Backend> Default for MetricSet<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> MetricSet<B> {
    pub fn new() -> Self {
        Self {
            metrics: Vec::new(),
        }
    }

    /// Registers `metric` under `name`, keeping registration order.
    pub fn with(mut self, name: impl Into<String>, metric: impl StreamingMetric<B> + 'static) -> Self {
        self.push(name, Box::new(metric));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, metric: Box<dyn StreamingMetric<B>>) {
        self.metrics.push((name.into(), metric));
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Updates every metric once and returns the batch values by name.
    pub fn update(&mut self, input: &SegmentationInput<B>) -> Vec<(String, f64)> {
        self.metrics
            .iter_mut()
            .map(|(name, metric)| (name.clone(), metric.update(input)))
            .collect()
    }

    /// Accumulated values by name.
    pub fn compute(&self) -> Vec<(String, f64)> {
        self.metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.compute()))
            .collect()
    }

    pub fn reset(&mut self) {
        self.metrics.iter_mut().for_each(|(_, metric)| metric.reset());
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::TensorData;

    use super::*;
    use crate::{tests::TestBackend, F1Score, JaccardIndex};

    #[test]
    fn metric_set_reports_in_registration_order() {
        let device = Default::default();
        let mut metrics = MetricSet::<TestBackend>::new()
            .with("f1", F1Score::binary())
            .with("iou", JaccardIndex::binary());

        let input = SegmentationInput::binary(
            Tensor::from_data(TensorData::from([[[3.0, -3.0]]]), &device),
            Tensor::from_data(TensorData::from([[[1.0, 1.0]]]), &device),
        );
        let values = metrics.update(&input);

        assert_eq!(metrics.names(), vec!["f1", "iou"]);
        assert_eq!(values[0].0, "f1");
        assert!((values[0].1 - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(values[1].0, "iou");
        assert!((values[1].1 - 0.5).abs() < 1e-12);

        metrics.reset();
        assert!(metrics.compute().iter().all(|(_, value)| *value == 0.0));
    }
}
