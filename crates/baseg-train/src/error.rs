//! Error types of the baseg-train crate.

use std::path::PathBuf;

use thiserror::Error;

/// Error type for the training, evaluation and prediction steps.
#[derive(Error, Debug)]
pub enum StepError {
    /// A batch lookup for a key that was never inserted.
    #[error("Batch has no entry for key `{key}`")]
    MissingBatchKey { key: String },

    /// Prediction and label disagree in shape.
    #[error("Shape mismatch in {context}: prediction {prediction:?}, label {label:?}")]
    ShapeMismatch {
        context: String,
        prediction: Vec<usize>,
        label: Vec<usize>,
    },

    /// An optional collaborator required by the operation was not provided.
    #[error("No {collaborator} configured, required by {operation}")]
    MissingCollaborator {
        collaborator: &'static str,
        operation: &'static str,
    },

    /// Invalid step, tiler or trainer configuration.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// Reading tensor data back to the host failed.
    #[error("Failed to read tensor data: {reason}")]
    TensorData { reason: String },

    /// Encoding or writing a prediction image failed.
    #[error("Failed to write prediction: {path}")]
    PredictionWrite {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Saving model weights failed.
    #[error("Failed to save checkpoint: {path}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: burn::record::RecorderError,
    },

    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A specialized `Result` type for step operations.
pub type StepResult<T> = Result<T, StepError>;

/// Error type for the folder dataset.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// The directory of a batch key is missing.
    #[error("Dataset directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// An image has no file for one of the label keys.
    #[error("No `{key}` label found for image: {path}")]
    MissingLabel { key: String, path: PathBuf },

    #[error("Failed to open image: {path}")]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// A label does not cover the image pixel for pixel.
    #[error(
        "Size mismatch for {path}: expected {expected_width}x{expected_height}, got {width}x{height}"
    )]
    SizeMismatch {
        path: PathBuf,
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("No samples found in: {path}")]
    NoSamples { path: PathBuf },

    #[error("Failed to walk directory: {path}")]
    DirectoryWalk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A specialized `Result` type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;
