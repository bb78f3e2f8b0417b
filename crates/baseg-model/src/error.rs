use thiserror::Error;

/// The error type for model construction.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The configuration is logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },
}

/// A specialized `Result` type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
