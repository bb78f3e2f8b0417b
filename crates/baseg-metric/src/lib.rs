//! # baseg metrics
//!
//! Streaming classification metrics for dense segmentation outputs.
//!
//! Metrics accumulate per-class confusion counts over an epoch and report
//! either the value of the latest batch ([`StreamingMetric::update`]) or the
//! value over everything seen since the last reset
//! ([`StreamingMetric::compute`]).
//!
//! ## Implemented Metrics
//!
//! - [`F1Score`]: harmonic mean of precision and recall
//! - [`JaccardIndex`]: intersection over union
//!
//! Both run in two modes:
//! - **binary**: sigmoid of `[batch, height, width]` logits thresholded at 0.5
//! - **multiclass**: arg-max over `[batch, classes, height, width]` logits,
//!   macro-averaged over the classes that occur in either predictions or
//!   targets
//!
//! Pixels whose target equals the ignore index (255) are left out of every
//! count.
//!
//! Both metrics also implement Burn's learner [`Metric`](burn::train::metric::Metric)
//! and [`Numeric`](burn::train::metric::Numeric) traits, so they can be
//! registered with `LearnerBuilder::metric_train_numeric`.

mod confusion;
mod input;
mod metric;
mod score;

pub use confusion::ConfusionStats;
pub use input::SegmentationInput;
pub use metric::{MetricSet, StreamingMetric};
pub use score::{F1Score, JaccardIndex, MetricTask};

/// Target value excluded from every metric by default.
pub const DEFAULT_IGNORE_INDEX: i64 = 255;

#[cfg(test)]
mod tests {
    use burn::{backend::NdArray, data::dataloader::Progress, train::metric::MetricMetadata};

    pub type TestBackend = NdArray;

    pub fn metadata() -> MetricMetadata {
        MetricMetadata {
            progress: Progress {
                items_processed: 1,
                items_total: 1,
            },
            epoch: 1,
            epoch_total: 1,
            iteration: 1,
            lr: None,
        }
    }
}
