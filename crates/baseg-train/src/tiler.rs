//! Sliding-window reconstruction of full-image predictions.

use core::ops::Range;

use burn::{prelude::*, tensor::TensorData};

use crate::{StepError, StepResult};

/// Runs a tile-sized model over a full image.
pub trait Tiler<B: Backend> {
    /// Reconstructs the prediction of `image` (`[channels, height, width]`).
    ///
    /// `callback` receives tile batches `[n, channels, tile, tile]` and must
    /// return `[n, tile, tile]`. The result has shape `[height, width]`.
    fn predict(
        &self,
        image: Tensor<B, 3>,
        callback: &mut dyn FnMut(Tensor<B, 4>) -> Tensor<B, 3>,
    ) -> StepResult<Tensor<B, 2>>;
}

/// Weighting of tile pixels where tiles overlap.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum BlendWindow {
    /// Plain average.
    Uniform,
    /// Weights falling off linearly towards the tile border.
    Linear,
}

/// Configuration for creating a [sliding window tiler](SlidingWindowTiler).
#[derive(Config, Debug)]
pub struct SlidingWindowTilerConfig {
    /// Side of the square tiles. Default: 512
    #[config(default = 512)]
    pub tile_size: usize,
    /// Pixels shared by neighbouring tiles. Default: 64
    #[config(default = 64)]
    pub overlap: usize,
    /// Tiles per callback invocation. Default: 4
    #[config(default = 4)]
    pub batch_size: usize,
    /// Default: linear
    #[config(default = "BlendWindow::Linear")]
    pub window: BlendWindow,
}

impl SlidingWindowTilerConfig {
    /// Initialize a [sliding window tiler](SlidingWindowTiler).
    pub fn init(&self) -> StepResult<SlidingWindowTiler> {
        if self.tile_size == 0 || self.batch_size == 0 {
            return Err(StepError::InvalidConfiguration {
                reason: format!(
                    "tile size ({}) and tile batch size ({}) must be positive",
                    self.tile_size, self.batch_size
                ),
            });
        }
        if self.overlap >= self.tile_size {
            return Err(StepError::InvalidConfiguration {
                reason: format!(
                    "tile overlap ({}) must be smaller than the tile size ({})",
                    self.overlap, self.tile_size
                ),
            });
        }

        Ok(SlidingWindowTiler {
            tile_size: self.tile_size,
            stride: self.tile_size - self.overlap,
            batch_size: self.batch_size,
            window: self.window.clone(),
        })
    }
}

/// Tiles an image on a regular grid, zero-padding the last row and column,
/// and blends the tile predictions back together.
#[derive(Clone, Debug)]
pub struct SlidingWindowTiler {
    tile_size: usize,
    stride: usize,
    batch_size: usize,
    window: BlendWindow,
}

impl SlidingWindowTiler {
    pub const fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Tile offsets along one axis and the padded length they cover.
    fn grid(&self, length: usize) -> (Vec<usize>, usize) {
        if length <= self.tile_size {
            return (vec![0], self.tile_size);
        }
        let count = (length - self.tile_size).div_ceil(self.stride) + 1;
        let offsets = (0..count).map(|i| i * self.stride).collect();
        (offsets, (count - 1) * self.stride + self.tile_size)
    }

    fn window_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let size = self.tile_size;
        match self.window {
            BlendWindow::Uniform => Tensor::ones([size, size], device),
            BlendWindow::Linear => {
                let profile: Vec<f32> = (0..size)
                    .map(|i| (i.min(size - 1 - i) + 1) as f32)
                    .collect();
                let weights = profile
                    .iter()
                    .flat_map(|row| profile.iter().map(move |col| row * col))
                    .collect::<Vec<_>>();
                Tensor::from_data(TensorData::new(weights, [size, size]), device)
            }
        }
    }
}

impl<B: Backend> Tiler<B> for SlidingWindowTiler {
    fn predict(
        &self,
        image: Tensor<B, 3>,
        callback: &mut dyn FnMut(Tensor<B, 4>) -> Tensor<B, 3>,
    ) -> StepResult<Tensor<B, 2>> {
        let [channels, height, width] = image.dims();
        let device = image.device();
        let size = self.tile_size;

        let (rows, padded_height) = self.grid(height);
        let (cols, padded_width) = self.grid(width);
        let unpadded = padded_height == height && padded_width == width;
        let padded = if unpadded {
            image
        } else {
            Tensor::zeros([channels, padded_height, padded_width], &device)
                .slice_assign([0..channels, 0..height, 0..width], image)
        };

        let origins: Vec<(usize, usize)> = rows
            .iter()
            .flat_map(|&y| cols.iter().map(move |&x| (y, x)))
            .collect();
        tracing::debug!(
            tiles = origins.len(),
            padded_height,
            padded_width,
            "tiling image"
        );

        let window = self.window_tensor::<B>(&device);
        let mut sum = Tensor::<B, 2>::zeros([padded_height, padded_width], &device);
        let mut weight = Tensor::<B, 2>::zeros([padded_height, padded_width], &device);

        for chunk in origins.chunks(self.batch_size) {
            let tiles: Vec<Tensor<B, 3>> = chunk
                .iter()
                .map(|&(y, x)| padded.clone().slice([0..channels, y..y + size, x..x + size]))
                .collect();
            let output = callback(Tensor::stack::<4>(tiles, 0));

            let dims = output.dims();
            if dims != [chunk.len(), size, size] {
                return Err(StepError::ShapeMismatch {
                    context: "tile prediction".to_owned(),
                    prediction: dims.to_vec(),
                    label: vec![chunk.len(), size, size],
                });
            }
            if unpadded && origins.len() == 1 {
                return Ok(output.reshape([size, size]));
            }

            for (index, &(y, x)) in chunk.iter().enumerate() {
                let tile = output
                    .clone()
                    .slice([index..index + 1, 0..size, 0..size])
                    .reshape([size, size]);
                let region: [Range<usize>; 2] = [y..y + size, x..x + size];

                let current = sum.clone().slice(region.clone());
                sum = sum.slice_assign(region.clone(), current + tile * window.clone());
                let current = weight.clone().slice(region.clone());
                weight = weight.slice_assign(region, current + window.clone());
            }
        }

        Ok((sum / weight).slice([0..height, 0..width]))
    }
}
