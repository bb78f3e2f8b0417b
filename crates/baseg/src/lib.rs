//! Burned-area segmentation on Burn.
//!
//! A dual-head network predicts burned-area delineation (binary or graded
//! severity) together with an auxiliary land-cover map. This crate wires the
//! model, losses, metrics and step policy into train, test and predict
//! runs configured by a single JSON file.

pub mod backend;
pub mod experiment;
pub mod inference;
pub mod training;

#[doc(inline)]
pub use backend::burn_backend_types;
pub use experiment::{DatasetConfig, ExperimentConfig};
pub use inference::{run_prediction, run_prediction_on_device, PredictionConfig};
pub use training::{run_test, run_test_on_device, run_training, run_training_on_device};

#[doc(inline)]
pub use baseg_loss as loss;
#[doc(inline)]
pub use baseg_metric as metric;
#[doc(inline)]
pub use baseg_model as model;
#[doc(inline)]
pub use baseg_train as train;

#[cfg(test)]
mod tests {
    use std::path::Path;

    use baseg_model::{DecodeHeadConfig, EncoderConfig, SegmentorConfig};
    use baseg_train::{Trainer, TrainerConfig};
    use burn::backend::{Autodiff, NdArray};
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;

    pub fn write_split(root: &Path, split: &str, stems: &[&str]) {
        let dir = root.join(split);
        for key in ["S2L2A", "DEL", "ESA_LC"] {
            std::fs::create_dir_all(dir.join(key)).unwrap();
        }
        for stem in stems {
            RgbImage::from_fn(6, 6, |x, y| Rgb([(x * 40) as u8, (y * 40) as u8, 128]))
                .save(dir.join("S2L2A").join(format!("{stem}.png")))
                .unwrap();
            GrayImage::from_fn(6, 6, |x, _| Luma([u8::from(x < 3)]))
                .save(dir.join("DEL").join(format!("{stem}.png")))
                .unwrap();
            GrayImage::from_fn(6, 6, |_, y| Luma([if y == 5 { 255 } else { (y % 3) as u8 }]))
                .save(dir.join("ESA_LC").join(format!("{stem}.png")))
                .unwrap();
        }
    }

    pub fn experiment(root: &Path) -> ExperimentConfig {
        ExperimentConfig::new(DatasetConfig::new(root.display().to_string()))
            .with_model(
                SegmentorConfig::new()
                    .with_encoder(EncoderConfig::new().with_channels(vec![4, 8]))
                    .with_decode_head(
                        DecodeHeadConfig::new()
                            .with_in_index(1)
                            .with_aux_in_index(0)
                            .with_channels(4)
                            .with_aux_channels(4)
                            .with_aux_classes(3),
                    ),
            )
            .with_module(baseg_train::MultiTaskConfig::new().with_mask_lc(true))
            .with_trainer(
                TrainerConfig::new()
                    .with_num_epochs(1)
                    .with_batch_size(2)
                    .with_num_workers(0)
                    .with_artifact_dir(root.join("artifacts").display().to_string()),
            )
            .with_tiler(
                baseg_train::SlidingWindowTilerConfig::new()
                    .with_tile_size(4)
                    .with_overlap(2),
            )
    }

    #[test]
    fn train_test_and_predict_from_folders() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_split(root, "train", &["a", "b", "c"]);
        write_split(root, "val", &["d"]);
        write_split(root, "test", &["e", "f"]);
        let config = experiment(root);

        let checkpoint =
            run_training_on_device::<Autodiff<NdArray>>(Default::default(), &config).unwrap();

        assert_eq!(checkpoint, Trainer::new(config.trainer.clone()).checkpoint_path());
        assert!(checkpoint.with_extension("mpk").exists());
        assert!(root.join("artifacts").join("config.json").exists());

        let summary =
            run_test_on_device::<NdArray>(Default::default(), &config, checkpoint.clone()).unwrap();
        assert!(summary.get("test_iou").is_some());
        assert!(summary.get("test_iou_aux").is_none());

        let prediction = PredictionConfig::new(
            root.join("test").display().to_string(),
            root.join("masks").display().to_string(),
            checkpoint.display().to_string(),
        )
        .with_threshold(Some(0.5));
        let written =
            run_prediction_on_device::<NdArray>(Default::default(), &config, &prediction).unwrap();

        assert_eq!(written, 2);
        let mask = image::open(root.join("masks").join("e.png")).unwrap().to_luma8();
        assert_eq!(mask.dimensions(), (6, 6));
        assert!(mask.pixels().all(|pixel| pixel.0[0] == 0 || pixel.0[0] == 255));
    }
}
