//! Multi-task step policy.
//!
//! [`MultiTaskModule`] is the Burn module trained by the learner: the
//! dual-head model plus a backend-independent [`StepPolicy`]. Every train
//! and validation step:
//! 1. optionally replaces land-cover labels under burned pixels with the
//!    ignore index (written back into the batch),
//! 2. runs the model once,
//! 3. computes `loss = loss_del + aux_factor * loss_aux`,
//! 4. hands losses and metric inputs to the learner as a
//!    [`MultiTaskOutput`].
//!
//! [`MultiTaskRunner`] drives the same policy outside the learner, for the
//! test and predict loops. It owns the collaborators a hand-driven step
//! needs: the loss criteria, one metric set per split, and optionally a
//! tiler and a prediction callback.
//!
//! Test steps skip the auxiliary branch unless
//! [`MultiTaskConfig::evaluate_auxiliary_on_test`] is set and then return the
//! delineation loss alone.

use core::marker::PhantomData;

use baseg_loss::{DecodeLossKind, MulticlassCriterion, PixelCrossEntropyLossConfig};
use baseg_metric::{F1Score, JaccardIndex, MetricSet, SegmentationInput};
use baseg_model::{DecodeHeadConfig, DualHeadModel, ModelError, ModelResult};
use burn::{
    module::{AutodiffModule, Ignored, ModuleDisplay},
    prelude::*,
    tensor::{activation::sigmoid, backend::AutodiffBackend, ElementConversion, Int},
    train::{TrainOutput, TrainStep, ValidStep},
};

use crate::{
    Batch, BatchKeys, DelineationKind, DelineationTask, LogFlags, LogSink, MultiTaskOutput,
    PredictCallback, Split, StepError, StepResult, Tiler, IGNORE_INDEX,
};

/// Configuration of the multi-task step policy.
#[derive(Config, Debug)]
pub struct MultiTaskConfig {
    /// Ignore land-cover labels where the delineation label is 1. Default: false
    #[config(default = false)]
    pub mask_lc: bool,
    /// Binary delineation loss. Default: BCE
    #[config(default = "DecodeLossKind::Bce")]
    pub loss: DecodeLossKind,
    /// Grade delineation into `severity_classes` classes. Default: false
    #[config(default = false)]
    pub severity: bool,
    /// Default: 5
    #[config(default = 5)]
    pub severity_classes: usize,
    #[config(default = "BatchKeys::new()")]
    pub keys: BatchKeys,
    /// Compute auxiliary loss and metrics in test steps too. Default: false
    #[config(default = false)]
    pub evaluate_auxiliary_on_test: bool,
    /// Log name of the composite loss. Default: `loss`
    #[config(default = "String::from(\"loss\")")]
    pub total_loss_name: String,
    /// Appended to the delineation metric names. Default: empty
    #[config(default = "String::new()")]
    pub decode_metric_suffix: String,
}

impl MultiTaskConfig {
    /// Settings of the first module generation: BCE, no masking, binary
    /// delineation, composite loss logged as `loss_tot` and delineation
    /// metrics as `f1_del` / `iou_del`.
    pub fn legacy() -> Self {
        Self::new()
            .with_total_loss_name("loss_tot".to_owned())
            .with_decode_metric_suffix("_del".to_owned())
    }

    /// Builds the step policy for a model with decode head `head`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidConfiguration`] when the decode head
    /// class count does not fit the delineation variant.
    pub fn policy(&self, head: &DecodeHeadConfig) -> ModelResult<StepPolicy> {
        if self.severity && self.severity_classes < 2 {
            return Err(ModelError::InvalidConfiguration {
                reason: format!(
                    "severity mode needs at least 2 classes, got {}",
                    self.severity_classes
                ),
            });
        }
        let delineation = if self.severity {
            DelineationKind::Severity {
                num_classes: self.severity_classes,
            }
        } else {
            DelineationKind::Binary {
                loss: self.loss.clone(),
            }
        };
        if head.num_classes != delineation.num_classes() {
            return Err(ModelError::InvalidConfiguration {
                reason: format!(
                    "decode head predicts {} classes, {} delineation expects {}",
                    head.num_classes,
                    if self.severity { "severity" } else { "binary" },
                    delineation.num_classes()
                ),
            });
        }

        tracing::info!(aux_factor = head.aux_factor, "auxiliary factor");
        tracing::info!(aux_classes = head.aux_classes, "auxiliary classes");

        Ok(StepPolicy {
            delineation,
            aux_factor: head.aux_factor,
            aux_classes: head.aux_classes,
            mask_lc: self.mask_lc,
            keys: self.keys.clone(),
            evaluate_auxiliary_on_test: self.evaluate_auxiliary_on_test,
            total_loss_name: self.total_loss_name.clone(),
            decode_metric_suffix: self.decode_metric_suffix.clone(),
        })
    }

    /// Wraps `model` into a [`MultiTaskModule`].
    ///
    /// # Errors
    ///
    /// See [`Self::policy`].
    pub fn init<B: Backend, M: DualHeadModel<B>>(
        &self,
        model: M,
        head: &DecodeHeadConfig,
    ) -> ModelResult<MultiTaskModule<B, M>> {
        Ok(MultiTaskModule::new(model, self.policy(head)?))
    }
}

/// Backend-independent settings of the multi-task steps.
#[derive(Clone, Debug, PartialEq)]
pub struct StepPolicy {
    pub delineation: DelineationKind,
    /// Weight of the auxiliary loss in the composite loss.
    pub aux_factor: f64,
    /// Land-cover classes predicted by the auxiliary head.
    pub aux_classes: usize,
    pub mask_lc: bool,
    pub keys: BatchKeys,
    pub evaluate_auxiliary_on_test: bool,
    pub total_loss_name: String,
    pub decode_metric_suffix: String,
}

impl StepPolicy {
    /// Policy with default keys and names, no masking.
    pub fn new(delineation: DelineationKind, aux_factor: f64, aux_classes: usize) -> Self {
        Self {
            delineation,
            aux_factor,
            aux_classes,
            mask_lc: false,
            keys: BatchKeys::new(),
            evaluate_auxiliary_on_test: false,
            total_loss_name: "loss".to_owned(),
            decode_metric_suffix: String::new(),
        }
    }

    /// Whether `split` runs the land-cover branch.
    pub fn auxiliary_enabled(&self, split: Split) -> bool {
        split != Split::Test || self.evaluate_auxiliary_on_test
    }

    /// Configured delineation loss and land-cover cross-entropy.
    pub fn criteria<B: Backend>(&self) -> StepCriteria<B> {
        StepCriteria::new(
            self.delineation.task(),
            Box::new(
                PixelCrossEntropyLossConfig::new()
                    .with_ignore_index(Some(IGNORE_INDEX))
                    .init(),
            ),
        )
    }

    /// Delineation and land-cover metric sets for one split.
    pub fn metrics<B: Backend>(&self) -> StepMetrics<B> {
        StepMetrics {
            decode: self.delineation.default_metrics(&self.decode_metric_suffix),
            auxiliary: auxiliary_metrics(self.aux_classes),
        }
    }

    /// Land-cover F1, reported as `f1_aux`.
    pub fn auxiliary_f1<B: Backend>(&self) -> F1Score<B> {
        F1Score::multiclass(self.aux_classes).with_name("f1_aux")
    }

    /// Land-cover IoU, reported as `iou_aux`.
    pub fn auxiliary_iou<B: Backend>(&self) -> JaccardIndex<B> {
        JaccardIndex::multiclass(self.aux_classes).with_name("iou_aux")
    }
}

/// Macro-averaged `f1_aux` and `iou_aux` over the land-cover classes.
pub fn auxiliary_metrics<B: Backend>(num_classes: usize) -> MetricSet<B> {
    MetricSet::new()
        .with(
            "f1_aux",
            F1Score::multiclass(num_classes).with_name("f1_aux"),
        )
        .with(
            "iou_aux",
            JaccardIndex::multiclass(num_classes).with_name("iou_aux"),
        )
}

/// Losses applied by a step.
pub struct StepCriteria<B: Backend> {
    /// Delineation variant and its loss.
    pub task: DelineationTask<B>,
    /// Land-cover loss.
    pub auxiliary: Box<dyn MulticlassCriterion<B>>,
}

impl<B: Backend> StepCriteria<B> {
    pub fn new(task: DelineationTask<B>, auxiliary: Box<dyn MulticlassCriterion<B>>) -> Self {
        Self { task, auxiliary }
    }
}

/// Metrics of one split.
pub struct StepMetrics<B: Backend> {
    /// Fed with the delineation output.
    pub decode: MetricSet<B>,
    /// Fed with the land-cover output.
    pub auxiliary: MetricSet<B>,
}

impl<B: Backend> Default for StepMetrics<B> {
    fn default() -> Self {
        Self {
            decode: MetricSet::new(),
            auxiliary: MetricSet::new(),
        }
    }
}

/// Land-cover loss and metric input of a step.
#[derive(Debug, Clone)]
pub struct AuxiliaryOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub input: SegmentationInput<B>,
}

/// Everything one step computes, for any split.
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    /// Composite loss, or the delineation loss when the auxiliary branch
    /// is skipped.
    pub loss: Tensor<B, 1>,
    pub loss_decode: Tensor<B, 1>,
    pub decode: SegmentationInput<B>,
    /// Absent when the split skips the auxiliary branch.
    pub auxiliary: Option<AuxiliaryOutput<B>>,
}

impl<B: Backend> StepOutput<B> {
    /// Learner item of a step that ran both heads.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::InvalidConfiguration`] when the auxiliary
    /// branch was skipped.
    pub fn into_item(self) -> StepResult<MultiTaskOutput<B>> {
        let auxiliary = self
            .auxiliary
            .ok_or_else(|| StepError::InvalidConfiguration {
                reason: "learner steps need the auxiliary head output".to_owned(),
            })?;
        Ok(MultiTaskOutput::new(
            self.loss,
            self.loss_decode,
            auxiliary.loss,
            self.decode,
            auxiliary.input,
        ))
    }
}

/// Dual-head model plus the policy of its steps.
#[derive(Module, Debug)]
pub struct MultiTaskModule<B: Backend, M> {
    model: M,
    policy: Ignored<StepPolicy>,
    backend: PhantomData<B>,
}

impl<B: Backend, M: DualHeadModel<B>> MultiTaskModule<B, M> {
    pub fn new(model: M, policy: StepPolicy) -> Self {
        Self {
            model,
            policy: Ignored(policy),
            backend: PhantomData,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn policy(&self) -> &StepPolicy {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut StepPolicy {
        &mut self.policy.0
    }

    /// Runs one step of `split` with the configured losses.
    pub fn forward_step(&self, batch: &mut Batch<B>, split: Split) -> StepResult<StepOutput<B>> {
        self.forward_step_with(batch, split, &self.policy.criteria())
    }

    /// Runs one step of `split` with the given losses.
    ///
    /// Shapes are checked before any loss is computed.
    pub fn forward_step_with(
        &self,
        batch: &mut Batch<B>,
        split: Split,
        criteria: &StepCriteria<B>,
    ) -> StepResult<StepOutput<B>> {
        let policy = self.policy();
        let image = batch.image(&policy.keys.image)?;
        let delineation = batch.label(&policy.keys.delineation)?;

        let land_cover = if policy.auxiliary_enabled(split) {
            let land_cover = batch.label(&policy.keys.land_cover)?;
            if policy.mask_lc {
                let masked = mask_land_cover(land_cover, delineation.clone())?;
                batch.set_label(policy.keys.land_cover.clone(), masked.clone());
                Some(masked)
            } else {
                Some(land_cover)
            }
        } else {
            None
        };

        let output = self.model.forward(image);

        criteria.task.check_shapes(&output.decode, &delineation)?;
        if let Some(land_cover) = &land_cover {
            check_auxiliary_shapes(&output.auxiliary, land_cover)?;
        }

        let loss_decode = criteria.task.loss(output.decode.clone(), delineation.clone())?;
        let auxiliary = land_cover.map(|land_cover| AuxiliaryOutput {
            loss: criteria
                .auxiliary
                .forward(output.auxiliary.clone(), land_cover.clone()),
            input: SegmentationInput::multiclass(output.auxiliary, land_cover),
        });
        let loss = match &auxiliary {
            Some(auxiliary) if policy.aux_factor != 0.0 => {
                loss_decode.clone() + auxiliary.loss.clone().mul_scalar(policy.aux_factor)
            }
            _ => loss_decode.clone(),
        };

        Ok(StepOutput {
            loss,
            loss_decode,
            decode: criteria.task.metric_input(output.decode, delineation),
            auxiliary,
        })
    }
}

impl<B, M> TrainStep<Batch<B>, MultiTaskOutput<B>> for MultiTaskModule<B, M>
where
    B: AutodiffBackend,
    M: DualHeadModel<B> + AutodiffModule<B> + ModuleDisplay,
    M::InnerModule: ModuleDisplay,
{
    /// # Panics
    ///
    /// If the batch does not fit the policy.
    fn step(&self, mut batch: Batch<B>) -> TrainOutput<MultiTaskOutput<B>> {
        let item = self
            .forward_step(&mut batch, Split::Train)
            .and_then(StepOutput::into_item)
            .unwrap_or_else(|err| panic!("training step failed: {err}"));
        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B, M> ValidStep<Batch<B>, MultiTaskOutput<B>> for MultiTaskModule<B, M>
where
    B: Backend,
    M: DualHeadModel<B>,
{
    /// # Panics
    ///
    /// If the batch does not fit the policy.
    fn step(&self, mut batch: Batch<B>) -> MultiTaskOutput<B> {
        self.forward_step(&mut batch, Split::Val)
            .and_then(StepOutput::into_item)
            .unwrap_or_else(|err| panic!("validation step failed: {err}"))
    }
}

/// Drives a [`MultiTaskModule`] step by step: logs every loss and metric
/// value, accumulates metrics per split and predicts full images.
pub struct MultiTaskRunner<B: Backend, M> {
    module: MultiTaskModule<B, M>,
    criteria: StepCriteria<B>,
    train_metrics: StepMetrics<B>,
    val_metrics: StepMetrics<B>,
    test_metrics: StepMetrics<B>,
    tiler: Option<Box<dyn Tiler<B>>>,
    predict_callback: Option<Box<dyn PredictCallback<B>>>,
}

impl<B: Backend, M: DualHeadModel<B>> MultiTaskRunner<B, M> {
    /// Runner with the losses and metrics configured by the module policy.
    pub fn new(module: MultiTaskModule<B, M>) -> Self {
        let policy = module.policy();
        let criteria = policy.criteria();
        let (train, val, test) = (policy.metrics(), policy.metrics(), policy.metrics());
        Self {
            module,
            criteria,
            train_metrics: train,
            val_metrics: val,
            test_metrics: test,
            tiler: None,
            predict_callback: None,
        }
    }

    /// Assembles a runner from its collaborators, with default keys, no
    /// masking, no metrics and no prediction collaborators.
    pub fn from_parts(
        model: M,
        task: DelineationTask<B>,
        auxiliary_criterion: Box<dyn MulticlassCriterion<B>>,
        aux_factor: f64,
    ) -> Self {
        let policy = StepPolicy::new(task.kind(), aux_factor, 0);
        Self {
            module: MultiTaskModule::new(model, policy),
            criteria: StepCriteria::new(task, auxiliary_criterion),
            train_metrics: StepMetrics::default(),
            val_metrics: StepMetrics::default(),
            test_metrics: StepMetrics::default(),
            tiler: None,
            predict_callback: None,
        }
    }

    pub fn with_mask_lc(mut self, mask_lc: bool) -> Self {
        self.module.policy_mut().mask_lc = mask_lc;
        self
    }

    pub fn with_keys(mut self, keys: BatchKeys) -> Self {
        self.module.policy_mut().keys = keys;
        self
    }

    pub fn with_evaluate_auxiliary_on_test(mut self, enabled: bool) -> Self {
        self.module.policy_mut().evaluate_auxiliary_on_test = enabled;
        self
    }

    pub fn with_total_loss_name(mut self, name: impl Into<String>) -> Self {
        self.module.policy_mut().total_loss_name = name.into();
        self
    }

    pub fn with_metrics(mut self, split: Split, metrics: StepMetrics<B>) -> Self {
        *self.metrics_mut(split) = metrics;
        self
    }

    pub fn with_tiler(mut self, tiler: impl Tiler<B> + 'static) -> Self {
        self.tiler = Some(Box::new(tiler));
        self
    }

    pub fn with_predict_callback(mut self, callback: impl PredictCallback<B> + 'static) -> Self {
        self.predict_callback = Some(Box::new(callback));
        self
    }

    pub fn module(&self) -> &MultiTaskModule<B, M> {
        &self.module
    }

    pub fn into_module(self) -> MultiTaskModule<B, M> {
        self.module
    }

    pub fn model(&self) -> &M {
        self.module.model()
    }

    pub fn task(&self) -> &DelineationTask<B> {
        &self.criteria.task
    }

    pub fn keys(&self) -> &BatchKeys {
        &self.module.policy().keys
    }

    pub fn aux_factor(&self) -> f64 {
        self.module.policy().aux_factor
    }

    fn metrics_mut(&mut self, split: Split) -> &mut StepMetrics<B> {
        match split {
            Split::Train => &mut self.train_metrics,
            Split::Val => &mut self.val_metrics,
            Split::Test => &mut self.test_metrics,
        }
    }

    /// Returns the composite loss of one training batch.
    pub fn training_step(
        &mut self,
        batch: &mut Batch<B>,
        sink: &mut dyn LogSink,
    ) -> StepResult<Tensor<B, 1>> {
        self.shared_step(batch, Split::Train, sink)
    }

    /// Returns the composite loss of one validation batch.
    pub fn validation_step(
        &mut self,
        batch: &mut Batch<B>,
        sink: &mut dyn LogSink,
    ) -> StepResult<Tensor<B, 1>> {
        self.shared_step(batch, Split::Val, sink)
    }

    /// Returns the delineation loss of one test batch.
    pub fn test_step(&mut self, batch: &mut Batch<B>, sink: &mut dyn LogSink) -> StepResult<Tensor<B, 1>> {
        self.shared_step(batch, Split::Test, sink)
    }

    fn shared_step(
        &mut self,
        batch: &mut Batch<B>,
        split: Split,
        sink: &mut dyn LogSink,
    ) -> StepResult<Tensor<B, 1>> {
        let output = self.module.forward_step_with(batch, split, &self.criteria)?;

        let loss_flags = LogFlags::step_and_epoch();
        let loss_decode = scalar(&output.loss_decode);
        sink.log(&split.key("loss_del"), loss_decode, loss_flags);
        if let Some(auxiliary) = &output.auxiliary {
            let total_loss_name = &self.module.policy().total_loss_name;
            sink.log(&split.key("loss_aux"), scalar(&auxiliary.loss), loss_flags);
            sink.log(&split.key(total_loss_name), scalar(&output.loss), loss_flags);
        }
        tracing::debug!(split = %split, loss_del = loss_decode, "step losses");

        let metrics = self.metrics_mut(split);
        let mut values = metrics.decode.update(&output.decode);
        if let Some(auxiliary) = &output.auxiliary {
            values.extend(metrics.auxiliary.update(&auxiliary.input));
        }

        let metric_flags = LogFlags::new(split == Split::Train, false, true, true);
        for (name, value) in values {
            sink.log(&split.key(&name), value, metric_flags);
        }

        Ok(output.loss)
    }

    /// Logs the accumulated metric values of `split` and resets them.
    pub fn on_epoch_end(&mut self, split: Split, sink: &mut dyn LogSink) {
        let include_auxiliary = self.module.policy().auxiliary_enabled(split);
        let metrics = self.metrics_mut(split);

        let mut values = metrics.decode.compute();
        if include_auxiliary {
            values.extend(metrics.auxiliary.compute());
        }
        for (name, value) in values {
            sink.log(&split.key(&name), value, LogFlags::epoch());
        }

        metrics.decode.reset();
        metrics.auxiliary.reset();
    }

    /// Predicts the single image of the batch with the tiler and attaches
    /// the sigmoid of the reconstruction as the batch prediction
    /// (`[1, height, width]`).
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingCollaborator`] without a tiler and
    /// [`StepError::InvalidConfiguration`] when the batch holds more than
    /// one image.
    pub fn predict_step(&self, mut batch: Batch<B>) -> StepResult<Batch<B>> {
        let tiler = self
            .tiler
            .as_ref()
            .ok_or_else(|| StepError::MissingCollaborator {
                collaborator: "tiler",
                operation: "predict_step",
            })?;

        let images = batch.image(&self.keys().image)?;
        let [batch_size, channels, height, width] = images.dims();
        if batch_size != 1 {
            return Err(StepError::InvalidConfiguration {
                reason: format!("prediction takes one full image per batch, got {batch_size}"),
            });
        }
        let image = images.reshape([channels, height, width]);

        let model = self.module.model();
        let task = &self.criteria.task;
        let mut callback = |tiles: Tensor<B, 4>| task.tile_output(model.forward(tiles).decode);
        let full = tiler.predict(image, &mut callback)?;

        batch.set_prediction(sigmoid(full).reshape([1, height, width]));
        Ok(batch)
    }

    /// Hands a predicted batch to the prediction callback.
    pub fn on_predict_batch_end(&mut self, batch: &Batch<B>) -> StepResult<()> {
        self.predict_callback
            .as_mut()
            .ok_or_else(|| StepError::MissingCollaborator {
                collaborator: "predict callback",
                operation: "on_predict_batch_end",
            })?
            .on_prediction(batch)
    }
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f64 {
    tensor.clone().into_scalar().elem::<f64>()
}

/// Sets land-cover labels to the ignore index where delineation is 1.
fn mask_land_cover<B: Backend>(
    land_cover: Tensor<B, 3, Int>,
    delineation: Tensor<B, 3, Int>,
) -> StepResult<Tensor<B, 3, Int>> {
    if land_cover.dims() != delineation.dims() {
        return Err(StepError::ShapeMismatch {
            context: "land-cover masking".to_owned(),
            prediction: land_cover.dims().to_vec(),
            label: delineation.dims().to_vec(),
        });
    }
    Ok(land_cover.mask_fill(delineation.equal_elem(1), IGNORE_INDEX))
}

fn check_auxiliary_shapes<B: Backend>(
    auxiliary: &Tensor<B, 4>,
    land_cover: &Tensor<B, 3, Int>,
) -> StepResult<()> {
    let [batch_size, _, height, width] = auxiliary.dims();
    if [batch_size, height, width] != land_cover.dims() {
        return Err(StepError::ShapeMismatch {
            context: "auxiliary land cover".to_owned(),
            prediction: auxiliary.dims().to_vec(),
            label: land_cover.dims().to_vec(),
        });
    }
    Ok(())
}
