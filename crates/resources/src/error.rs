//! Error types for pixel loading and conversion.

use std::path::PathBuf;
use thiserror::Error;

/// Error type for resource loading operations.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Pixel data does not match its declared dimensions or format.
    #[error("Invalid pixel data: {0}")]
    InvalidData(String),
}

/// Result type alias for resource operations.
pub type ResourceResult<T> = Result<T, ResourceError>;
