//! Error Handling Module
//!
//! Defines the error type shared by the three training pipelines and the
//! statistics reporter. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for panel training operations
#[derive(Error, Debug)]
pub enum PanelTrainError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Array shapes disagree (image/mask counts, spatial size, channels)
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Mask array has no nonzero pixel, so it cannot be normalized by its maximum
    #[error("Degenerate mask array: {0}")]
    DegenerateMask(String),

    /// Malformed, missing or empty annotation data
    #[error("Annotation error in '{path}': {message}")]
    Annotation { path: PathBuf, message: String },

    /// Class label outside of the fixed label set
    #[error("Unknown class label '{label}' (expected one of: {expected})")]
    UnknownClass { label: String, expected: String },

    /// A metric required by the reporter is absent from the history
    #[error("Missing metric '{0}' in training history")]
    MissingMetric(String),

    /// Error with dataset layout or contents
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error persisting or loading model weights
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for PanelTrainError {
    fn from(err: serde_json::Error) -> Self {
        PanelTrainError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for PanelTrainError {
    fn from(err: csv::Error) -> Self {
        PanelTrainError::Serialization(err.to_string())
    }
}

/// Convenience Result type for panel training operations
pub type Result<T> = std::result::Result<T, PanelTrainError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| PanelTrainError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| PanelTrainError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| PanelTrainError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| PanelTrainError::InvalidInput(f()))
    }
}
