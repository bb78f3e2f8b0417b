//! Folder dataset and batcher.
//!
//! A split directory holds one sub-directory per batch key, with files
//! matched by stem:
//!
//! ```text
//! <root>/<split>/S2L2A/<stem>.png    image, 1, 3 or 4 channels
//! <root>/<split>/DEL/<stem>.png      8-bit class map
//! <root>/<split>/ESA_LC/<stem>.png   8-bit class map
//! ```
//!
//! Following Burn's convention the dataset returns raw data and the batcher
//! creates tensors on the target device.

use std::{
    collections::HashMap,
    marker::PhantomData,
    path::{Path, PathBuf},
};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::{Int, TensorData},
};
use derive_new::new;
use image::{DynamicImage, ImageFormat};
use walkdir::WalkDir;

use crate::{Batch, DatasetError, DatasetResult};

/// One decoded sample.
#[derive(new, Debug, Clone)]
pub struct SampleItem {
    /// File stem shared by image and labels.
    pub name: String,
    /// Image pixels in `[height, width, channels]` order, scaled to `[0, 1]`.
    pub image: Vec<f32>,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Class maps in `[height, width]` order, by batch key.
    pub labels: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Clone)]
struct SampleFiles {
    name: String,
    image: PathBuf,
    labels: Vec<(String, PathBuf)>,
}

/// Images and labels of one split directory.
#[derive(Debug, Clone)]
pub struct SegmentationDataset {
    root: PathBuf,
    samples: Vec<SampleFiles>,
}

impl SegmentationDataset {
    /// Indexes `split_dir/<image_key>` and pairs every image with the files
    /// of `label_keys` sharing its stem.
    ///
    /// Every file header is read once, so unreadable files and labels not
    /// matching their image size fail here instead of in the data loader.
    ///
    /// # Errors
    ///
    /// Fails when a key directory is missing, an image has no file for one of
    /// the label keys, a file cannot be read as an image, a label size
    /// differs from its image, or no image is found.
    pub fn new(
        split_dir: impl AsRef<Path>,
        image_key: &str,
        label_keys: &[String],
    ) -> DatasetResult<Self> {
        let root = split_dir.as_ref().to_path_buf();
        let image_dir = root.join(image_key);
        if !image_dir.is_dir() {
            return Err(DatasetError::DirectoryNotFound { path: image_dir });
        }

        let label_dirs = label_keys
            .iter()
            .map(|key| {
                let dir = root.join(key);
                if dir.is_dir() {
                    Ok((key.clone(), index_by_stem(&dir)?))
                } else {
                    Err(DatasetError::DirectoryNotFound { path: dir })
                }
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        let mut images: Vec<(String, PathBuf)> = index_by_stem(&image_dir)?.into_iter().collect();
        images.sort();

        let samples = images
            .into_iter()
            .map(|(name, image)| {
                let labels = label_dirs
                    .iter()
                    .map(|(key, files)| match files.get(&name) {
                        Some(path) => Ok((key.clone(), path.clone())),
                        None => Err(DatasetError::MissingLabel {
                            key: key.clone(),
                            path: image.clone(),
                        }),
                    })
                    .collect::<DatasetResult<Vec<_>>>()?;
                let files = SampleFiles {
                    name,
                    image,
                    labels,
                };
                files.validate()?;
                Ok(files)
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        if samples.is_empty() {
            return Err(DatasetError::NoSamples { path: image_dir });
        }

        tracing::info!(
            samples = samples.len(),
            root = %root.display(),
            labels = ?label_keys,
            "dataset indexed"
        );
        Ok(Self { root, samples })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Decodes the sample at `index`.
    pub fn load(&self, index: usize) -> DatasetResult<Option<SampleItem>> {
        let Some(files) = self.samples.get(index) else {
            return Ok(None);
        };

        let image = open(&files.image)?;
        let (width, height) = (image.width(), image.height());
        let (pixels, channels) = image_to_array(image);

        let labels = files
            .labels
            .iter()
            .map(|(key, path)| {
                let label = open(path)?;
                check_size(path, (width, height), (label.width(), label.height()))?;
                Ok((key.clone(), label.to_luma8().into_raw()))
            })
            .collect::<DatasetResult<Vec<_>>>()?;

        Ok(Some(SampleItem::new(
            files.name.clone(),
            pixels,
            channels,
            height as usize,
            width as usize,
            labels,
        )))
    }
}

impl Dataset<SampleItem> for SegmentationDataset {
    /// Files were validated when indexed; a sample failing to decode now
    /// changed on disk since.
    fn get(&self, index: usize) -> Option<SampleItem> {
        match self.load(index) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(error = %e, index, "sample changed since indexing");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

impl SampleFiles {
    /// Reads every header and checks labels against the image size.
    fn validate(&self) -> DatasetResult<()> {
        let expected = dimensions(&self.image)?;
        for (_, path) in &self.labels {
            check_size(path, expected, dimensions(path)?)?;
        }
        Ok(())
    }
}

fn dimensions(path: &Path) -> DatasetResult<(u32, u32)> {
    image::image_dimensions(path).map_err(|source| DatasetError::ImageOpen {
        path: path.to_path_buf(),
        source,
    })
}

fn check_size(path: &Path, expected: (u32, u32), actual: (u32, u32)) -> DatasetResult<()> {
    if actual != expected {
        return Err(DatasetError::SizeMismatch {
            path: path.to_path_buf(),
            expected_width: expected.0,
            expected_height: expected.1,
            width: actual.0,
            height: actual.1,
        });
    }
    Ok(())
}

/// Files of `dir` with a supported image extension, by stem.
fn index_by_stem(dir: &Path) -> DatasetResult<HashMap<String, PathBuf>> {
    let mut files = HashMap::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| DatasetError::DirectoryWalk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || ImageFormat::from_path(path).is_err() {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            files.insert(stem.to_owned(), path.to_path_buf());
        }
    }
    Ok(files)
}

fn open(path: &Path) -> DatasetResult<DynamicImage> {
    image::open(path).map_err(|source| DatasetError::ImageOpen {
        path: path.to_path_buf(),
        source,
    })
}

/// Raw `[height, width, channels]` floats in `[0, 1]` and the channel count.
fn image_to_array(image: DynamicImage) -> (Vec<f32>, usize) {
    match image.color().channel_count() {
        1 | 2 => (image.to_luma32f().into_raw(), 1),
        3 => (image.to_rgb32f().into_raw(), 3),
        _ => (image.to_rgba32f().into_raw(), 4),
    }
}

/// Stacks [`SampleItem`]s into a [`Batch`].
///
/// Items of one batch must share channel count and size.
#[derive(Clone, Debug)]
pub struct SegmentationBatcher<B: Backend> {
    image_key: String,
    _phantom: PhantomData<B>,
}

impl<B: Backend> SegmentationBatcher<B> {
    pub fn new(image_key: impl Into<String>) -> Self {
        Self {
            image_key: image_key.into(),
            _phantom: PhantomData,
        }
    }
}

impl<B: Backend> Batcher<B, SampleItem, Batch<B>> for SegmentationBatcher<B> {
    fn batch(&self, items: Vec<SampleItem>, device: &B::Device) -> Batch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut labels: Vec<(String, Vec<Tensor<B, 2, Int>>)> = Vec::new();
        let mut names = Vec::with_capacity(items.len());

        for item in items {
            // HWC to CHW
            let image = Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [item.height, item.width, item.channels]),
                device,
            )
            .permute([2, 0, 1]);
            images.push(image);

            for (key, classes) in item.labels {
                let classes: Vec<i64> = classes.into_iter().map(i64::from).collect();
                let label = Tensor::<B, 2, Int>::from_data(
                    TensorData::new(classes, [item.height, item.width]),
                    device,
                );
                match labels.iter_mut().find(|(known, _)| *known == key) {
                    Some((_, stack)) => stack.push(label),
                    None => labels.push((key, vec![label])),
                }
            }
            names.push(item.name);
        }

        let mut batch = Batch::new()
            .with_image(self.image_key.clone(), Tensor::stack::<4>(images, 0))
            .with_names(names);
        for (key, stack) in labels {
            batch = batch.with_label(key, Tensor::stack::<3>(stack, 0));
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use burn::data::dataset::InMemDataset;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    use super::*;
    use crate::tests::TestBackend;

    fn write_sample(root: &Path, stem: &str, size: u32, with_land_cover: bool) {
        for key in ["S2L2A", "DEL", "ESA_LC"] {
            std::fs::create_dir_all(root.join(key)).unwrap();
        }
        RgbImage::from_fn(size, size, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 255]))
            .save(root.join("S2L2A").join(format!("{stem}.png")))
            .unwrap();
        GrayImage::from_fn(size, size, |x, _| Luma([(x % 2) as u8]))
            .save(root.join("DEL").join(format!("{stem}.png")))
            .unwrap();
        if with_land_cover {
            GrayImage::from_fn(size, size, |_, y| Luma([if y == 0 { 255 } else { 3 }]))
                .save(root.join("ESA_LC").join(format!("{stem}.png")))
                .unwrap();
        }
    }

    fn label_keys() -> Vec<String> {
        vec!["DEL".to_owned(), "ESA_LC".to_owned()]
    }

    #[test]
    fn dataset_pairs_images_with_labels() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "b", 4, true);
        write_sample(dir.path(), "a", 4, true);

        let dataset = SegmentationDataset::new(dir.path(), "S2L2A", &label_keys()).unwrap();
        let item = dataset.get(0).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(item.name, "a");
        assert_eq!((item.channels, item.height, item.width), (3, 4, 4));
        assert_eq!(item.image[2], 1.0);
        assert_eq!(item.labels[0].0, "DEL");
        assert_eq!(item.labels[0].1[..4], [0, 1, 0, 1]);
        assert_eq!(item.labels[1].1[0], 255);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn missing_label_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "a", 4, false);

        let err = SegmentationDataset::new(dir.path(), "S2L2A", &label_keys()).unwrap_err();

        assert!(matches!(err, DatasetError::MissingLabel { ref key, .. } if key == "ESA_LC"));
    }

    #[test]
    fn labels_may_be_left_out() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "a", 4, false);

        let dataset = SegmentationDataset::new(dir.path(), "S2L2A", &[]).unwrap();

        assert!(dataset.get(0).unwrap().labels.is_empty());
    }

    #[test]
    fn label_size_mismatch_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "a", 4, true);
        GrayImage::new(3, 4)
            .save(dir.path().join("ESA_LC").join("a.png"))
            .unwrap();

        let err = SegmentationDataset::new(dir.path(), "S2L2A", &label_keys()).unwrap_err();

        assert!(matches!(
            err,
            DatasetError::SizeMismatch {
                expected_width: 4,
                width: 3,
                ..
            }
        ));
    }

    #[test]
    fn unreadable_file_fails_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "a", 4, true);
        write_sample(dir.path(), "b", 4, true);
        std::fs::write(dir.path().join("DEL").join("b.png"), b"not a png").unwrap();

        let err = SegmentationDataset::new(dir.path(), "S2L2A", &label_keys()).unwrap_err();

        assert!(matches!(err, DatasetError::ImageOpen { ref path, .. } if path.ends_with("b.png")));
    }

    #[test]
    fn missing_directory_is_reported() {
        let dir = tempfile::tempdir().unwrap();

        let err = SegmentationDataset::new(dir.path(), "S2L2A", &[]).unwrap_err();

        assert!(matches!(err, DatasetError::DirectoryNotFound { .. }));
    }

    #[test]
    fn batcher_stacks_images_and_labels() {
        let device = Default::default();
        let item = |name: &str| {
            SampleItem::new(
                name.to_owned(),
                vec![0.5; 3 * 2 * 2],
                3,
                2,
                2,
                vec![
                    ("DEL".to_owned(), vec![0, 1, 1, 0]),
                    ("ESA_LC".to_owned(), vec![4, 4, 255, 2]),
                ],
            )
        };
        let dataset = InMemDataset::new(vec![item("a"), item("b")]);
        let batcher = SegmentationBatcher::<TestBackend>::new("S2L2A");

        let items = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();
        let batch = batcher.batch(items, &device);

        assert_eq!(batch.image("S2L2A").unwrap().dims(), [2, 3, 2, 2]);
        assert_eq!(batch.label("DEL").unwrap().dims(), [2, 2, 2]);
        assert_eq!(
            batch
                .label("ESA_LC")
                .unwrap()
                .into_data()
                .to_vec::<i64>()
                .unwrap()[..4],
            [4, 4, 255, 2]
        );
        assert_eq!(batch.names(), ["a".to_owned(), "b".to_owned()]);
    }
}
