//! Fit, test and predict loops.
//!
//! Fitting goes through the Burn learner: [`MultiTaskModule`] provides the
//! train and validation steps, and the learner reports the composite loss,
//! both head losses and F1 / IoU of both heads every epoch. Test and predict
//! have no learner and run [`MultiTaskRunner`] batch by batch.

use std::{path::PathBuf, sync::Arc};

use baseg_model::DualHeadModel;
use burn::{
    data::dataloader::DataLoader,
    module::{AutodiffModule, ModuleDisplay},
    optim::AdamWConfig,
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{metric::LossMetric, LearnerBuilder},
};

use crate::{
    Batch, EpochSummary, Head, HeadLossMetric, HeadMetric, MetricLogger, MultiTaskModule,
    MultiTaskRunner, Split, StepError, StepResult,
};

/// Optimization and loop settings.
#[derive(Config, Debug)]
pub struct TrainerConfig {
    #[config(default = 100)]
    pub num_epochs: usize,
    /// AdamW learning rate. Default: 1e-4
    #[config(default = 1e-4)]
    pub learning_rate: f64,
    /// AdamW weight decay. Default: 1e-4
    #[config(default = 1e-4)]
    pub weight_decay: f64,
    #[config(default = 8)]
    pub batch_size: usize,
    /// Loader threads. 0 loads on the calling thread. Default: 4
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Directory receiving learner logs, epoch checkpoints and the final
    /// model.
    #[config(default = "String::from(\"artifacts\")")]
    pub artifact_dir: String,
}

/// Runs fit, test and predict loops over data loaders.
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainerConfig,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Path of the final model, without the recorder extension.
    pub fn checkpoint_path(&self) -> PathBuf {
        PathBuf::from(&self.config.artifact_dir).join("model")
    }

    /// Trains `module` with AdamW for the configured number of epochs and
    /// saves the final weights under [`Self::checkpoint_path`].
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Checkpoint`] when the weights cannot be saved.
    ///
    /// # Panics
    ///
    /// If a batch does not fit the module policy, see
    /// [`MultiTaskModule::forward_step`].
    pub fn fit<B, M>(
        &self,
        module: MultiTaskModule<B, M>,
        train_loader: Arc<dyn DataLoader<B, Batch<B>>>,
        valid_loader: Arc<dyn DataLoader<B::InnerBackend, Batch<B::InnerBackend>>>,
        device: &B::Device,
    ) -> StepResult<MultiTaskModule<B, M>>
    where
        B: AutodiffBackend,
        M: DualHeadModel<B> + AutodiffModule<B> + ModuleDisplay + 'static,
        M::InnerModule: DualHeadModel<B::InnerBackend> + ModuleDisplay,
    {
        let config = &self.config;
        let policy = module.policy().clone();
        let suffix = policy.decode_metric_suffix.as_str();
        let delineation = &policy.delineation;

        let learner = LearnerBuilder::new(&config.artifact_dir)
            .metric_train_numeric(LossMetric::<B>::new())
            .metric_valid_numeric(LossMetric::<B::InnerBackend>::new())
            .metric_train_numeric(HeadLossMetric::<B>::new(Head::Decode))
            .metric_valid_numeric(HeadLossMetric::<B::InnerBackend>::new(Head::Decode))
            .metric_train_numeric(HeadLossMetric::<B>::new(Head::Auxiliary))
            .metric_valid_numeric(HeadLossMetric::<B::InnerBackend>::new(Head::Auxiliary))
            .metric_train_numeric(HeadMetric::new(Head::Decode, delineation.f1_score::<B>(suffix)))
            .metric_valid_numeric(HeadMetric::new(
                Head::Decode,
                delineation.f1_score::<B::InnerBackend>(suffix),
            ))
            .metric_train_numeric(HeadMetric::new(
                Head::Decode,
                delineation.jaccard_index::<B>(suffix),
            ))
            .metric_valid_numeric(HeadMetric::new(
                Head::Decode,
                delineation.jaccard_index::<B::InnerBackend>(suffix),
            ))
            .metric_train_numeric(HeadMetric::new(Head::Auxiliary, policy.auxiliary_f1::<B>()))
            .metric_valid_numeric(HeadMetric::new(
                Head::Auxiliary,
                policy.auxiliary_f1::<B::InnerBackend>(),
            ))
            .metric_train_numeric(HeadMetric::new(Head::Auxiliary, policy.auxiliary_iou::<B>()))
            .metric_valid_numeric(HeadMetric::new(
                Head::Auxiliary,
                policy.auxiliary_iou::<B::InnerBackend>(),
            ))
            .with_file_checkpointer(CompactRecorder::new())
            .devices(vec![device.clone()])
            .num_epochs(config.num_epochs)
            .summary()
            .build(
                module,
                AdamWConfig::new()
                    .with_weight_decay(config.weight_decay as f32)
                    .init(),
                config.learning_rate,
            );

        tracing::info!(
            epochs = config.num_epochs,
            learning_rate = config.learning_rate,
            weight_decay = config.weight_decay,
            "starting training"
        );
        let trained = learner.fit(train_loader, valid_loader);

        save_model(trained.model().clone(), self.checkpoint_path())?;
        tracing::info!(path = %self.checkpoint_path().display(), "training completed");
        Ok(trained)
    }

    /// Runs every test batch through `module` and returns the epoch summary.
    pub fn test<B, M>(
        &self,
        runner: &mut MultiTaskRunner<B, M>,
        loader: Arc<dyn DataLoader<B, Batch<B>>>,
        logger: &mut MetricLogger,
    ) -> StepResult<EpochSummary>
    where
        B: Backend,
        M: DualHeadModel<B>,
    {
        for mut batch in loader.iter() {
            runner.test_step(&mut batch, logger)?;
            logger.end_step();
        }
        runner.on_epoch_end(Split::Test, logger);
        Ok(logger.end_epoch())
    }

    /// Predicts every batch and hands it to the runner's prediction
    /// callback. Returns the number of batches processed.
    ///
    /// # Errors
    ///
    /// Stops at the first failing batch, including batches holding more
    /// than one image.
    pub fn predict<B, M>(
        &self,
        runner: &mut MultiTaskRunner<B, M>,
        loader: Arc<dyn DataLoader<B, Batch<B>>>,
    ) -> StepResult<usize>
    where
        B: Backend,
        M: DualHeadModel<B>,
    {
        let mut count = 0;
        for batch in loader.iter() {
            let batch = runner.predict_step(batch)?;
            runner.on_predict_batch_end(&batch)?;
            count += 1;
        }
        tracing::info!(batches = count, "prediction completed");
        Ok(count)
    }
}

/// Saves model weights with the compact recorder.
pub fn save_model<B: Backend, M: Module<B>>(model: M, path: PathBuf) -> StepResult<()> {
    model
        .save_file(path.clone(), &CompactRecorder::new())
        .map_err(|source| StepError::Checkpoint { path, source })
}

/// Loads weights saved by [`save_model`] into `model`.
pub fn load_model<B: Backend, M: Module<B>>(
    model: M,
    path: PathBuf,
    device: &B::Device,
) -> StepResult<M> {
    model
        .load_file(path.clone(), &CompactRecorder::new(), device)
        .map_err(|source| StepError::Checkpoint { path, source })
}

#[cfg(test)]
mod tests {
    use baseg_model::{DecodeHeadConfig, EncoderConfig, EncoderDecoder, SegmentorConfig};
    use burn::{
        backend::{Autodiff, NdArray},
        data::{dataloader::DataLoaderBuilder, dataset::InMemDataset},
    };

    use super::*;
    use crate::{
        MultiTaskConfig, PredictionWriterConfig, SampleItem, SegmentationBatcher,
        SlidingWindowTilerConfig,
    };

    type TrainBackend = Autodiff<NdArray>;

    fn segmentor() -> SegmentorConfig {
        SegmentorConfig::new()
            .with_encoder(EncoderConfig::new().with_channels(vec![4]))
            .with_decode_head(
                DecodeHeadConfig::new()
                    .with_in_index(0)
                    .with_aux_in_index(0)
                    .with_channels(4)
                    .with_aux_channels(4)
                    .with_aux_classes(3),
            )
    }

    fn item(name: &str, burned: u8) -> SampleItem {
        SampleItem::new(
            name.to_owned(),
            vec![0.5; 4 * 4 * 3],
            3,
            4,
            4,
            vec![
                ("DEL".to_owned(), vec![burned; 16]),
                ("ESA_LC".to_owned(), vec![2; 16]),
            ],
        )
    }

    fn loader<B: Backend>(
        items: Vec<SampleItem>,
        batch_size: usize,
    ) -> Arc<dyn DataLoader<B, Batch<B>>> {
        DataLoaderBuilder::new(SegmentationBatcher::<B>::new("S2L2A"))
            .batch_size(batch_size)
            .build(InMemDataset::new(items))
    }

    #[test]
    fn fit_trains_through_the_learner_and_saves_model() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let config = segmentor();
        let trainer = Trainer::new(
            TrainerConfig::new()
                .with_num_epochs(2)
                .with_artifact_dir(dir.path().display().to_string()),
        );
        let model: EncoderDecoder<TrainBackend> = config.init(&device).unwrap();
        let module = MultiTaskConfig::new()
            .with_mask_lc(true)
            .init(model, &config.decode_head)
            .unwrap();

        let module = trainer
            .fit(
                module,
                loader(vec![item("a", 1), item("b", 0), item("c", 1)], 2),
                loader::<NdArray>(vec![item("d", 0)], 2),
                &device,
            )
            .unwrap();

        assert!(dir.path().join("model.mpk").exists());
        let restored = load_model(
            config.init::<NdArray>(&device).unwrap(),
            trainer.checkpoint_path(),
            &device,
        )
        .unwrap();
        let output = restored.forward(Tensor::ones([1, 3, 4, 4], &device));
        assert_eq!(output.decode.dims(), [1, 1, 4, 4]);
        assert_eq!(
            module.model().valid().forward(Tensor::ones([1, 3, 4, 4], &device)).auxiliary.dims(),
            output.auxiliary.dims()
        );
        assert!(module.policy().mask_lc);
    }

    #[test]
    fn test_loop_reports_test_metrics_only_for_delineation() {
        let device = Default::default();
        let config = segmentor();
        let model = config.init::<NdArray>(&device).unwrap();
        let mut runner = MultiTaskRunner::new(
            MultiTaskConfig::new()
                .init(model, &config.decode_head)
                .unwrap(),
        );
        let mut logger = MetricLogger::new();

        let summary = Trainer::new(TrainerConfig::new())
            .test(&mut runner, loader(vec![item("a", 1), item("b", 0)], 2), &mut logger)
            .unwrap();

        assert!(summary.get("test_loss_del").is_some());
        assert!(summary.get("test_f1").is_some());
        assert!(summary.get("test_f1_aux").is_none());
        assert!(summary.get("test_loss").is_none());
    }

    fn predicting_runner(
        dir: &std::path::Path,
    ) -> MultiTaskRunner<NdArray, EncoderDecoder<NdArray>> {
        let device = Default::default();
        let config = segmentor();
        let model = config.init::<NdArray>(&device).unwrap();
        let tiler = SlidingWindowTilerConfig::new()
            .with_tile_size(4)
            .with_overlap(1)
            .init()
            .unwrap();
        let writer = PredictionWriterConfig::new(dir.display().to_string())
            .init()
            .unwrap();
        MultiTaskRunner::new(
            MultiTaskConfig::new()
                .init(model, &config.decode_head)
                .unwrap(),
        )
        .with_tiler(tiler)
        .with_predict_callback(writer)
    }

    #[test]
    fn predict_loop_writes_one_mask_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = predicting_runner(dir.path());

        let count = Trainer::new(TrainerConfig::new())
            .predict(
                &mut runner,
                loader(vec![item("a", 1), item("b", 0), item("c", 0)], 1),
            )
            .unwrap();

        assert_eq!(count, 3);
        for name in ["a", "b", "c"] {
            assert!(dir.path().join(format!("{name}.png")).exists());
        }
    }

    #[test]
    fn predict_loop_rejects_multi_image_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = predicting_runner(dir.path());

        let err = Trainer::new(TrainerConfig::new())
            .predict(&mut runner, loader(vec![item("a", 1), item("b", 0)], 2))
            .unwrap_err();

        assert!(matches!(err, StepError::InvalidConfiguration { .. }));
        assert!(!dir.path().join("a.png").exists());
    }
}
