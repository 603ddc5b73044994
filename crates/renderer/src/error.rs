//! Error types for uploads and frame rendering.

use thiserror::Error;

use ferry_resources::ResourceError;
use ferry_rhi::RhiError;

/// Error returned when an upload batch is rejected.
///
/// Any error means nothing in the batch was submitted.
#[derive(Error, Debug)]
pub enum UploadError {
    /// The batch contained no requests
    #[error("Upload batch is empty")]
    EmptyBatch,

    /// An image source could not be loaded or converted
    #[error("Pixel source error: {0}")]
    Resource(#[from] ResourceError),

    /// The device rejected an allocation, mapping or submission
    #[error("Device error: {0}")]
    Device(#[from] RhiError),
}

/// Result type alias for upload operations.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned by render pass, pass chain and renderer operations.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device or shader service failure
    #[error("Device error: {0}")]
    Device(#[from] RhiError),

    /// Uploading static resources failed
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] ferry_core::Error),

    /// A pass chain description that cannot be recorded
    #[error("Invalid pass chain: {0}")]
    InvalidChain(String),

    /// Operation issued in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;
