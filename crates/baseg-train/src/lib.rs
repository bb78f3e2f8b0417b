//! # baseg training
//!
//! Multi-task step policy for burned-area segmentation together with the
//! data pipeline and the loops that drive it.
//!
//! ## Core components
//!
//! - [`MultiTaskModule`]: Burn module pairing a
//!   [`DualHeadModel`](baseg_model::DualHeadModel) with its [`StepPolicy`];
//!   implements `TrainStep` and `ValidStep` for the learner
//! - [`MultiTaskRunner`]: hand-driven test and predict steps with logging
//! - [`MultiTaskOutput`]: learner item, read by metrics through adaptors
//! - [`DelineationTask`]: binary or severity delineation
//! - [`SegmentationDataset`] / [`SegmentationBatcher`]: folder dataset
//!   producing keyed [`Batch`]es
//! - [`SlidingWindowTiler`]: full-image prediction from tile-sized passes
//! - [`PredictionWriter`]: writes predictions as PNG masks
//! - [`Trainer`]: fit through the Burn learner, test and predict loops
//! - [`MetricLogger`]: collects step and epoch values of the test loop

pub mod batch;
pub mod dataset;
pub mod error;
pub mod logging;
pub mod module;
pub mod output;
pub mod predict;
pub mod split;
pub mod tiler;
pub mod trainer;
pub mod variant;

pub use batch::{Batch, BatchKeys, IGNORE_INDEX, PREDICTION_KEY};
pub use dataset::{SampleItem, SegmentationBatcher, SegmentationDataset};
pub use error::{DatasetError, DatasetResult, StepError, StepResult};
pub use logging::{EpochSummary, LogFlags, LogSink, MetricLogger};
pub use module::{
    auxiliary_metrics, AuxiliaryOutput, MultiTaskConfig, MultiTaskModule, MultiTaskRunner,
    StepCriteria, StepMetrics, StepOutput, StepPolicy,
};
pub use output::{Head, HeadInputs, HeadLossMetric, HeadLosses, HeadMetric, MultiTaskOutput};
pub use predict::{PredictCallback, PredictionWriter, PredictionWriterConfig};
pub use split::Split;
pub use tiler::{BlendWindow, SlidingWindowTiler, SlidingWindowTilerConfig, Tiler};
pub use trainer::{load_model, save_model, Trainer, TrainerConfig};
pub use variant::{DelineationKind, DelineationTask};
