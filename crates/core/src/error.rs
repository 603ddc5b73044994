//! Error types shared across ferry crates.

use thiserror::Error;

/// Top-level error type for ferry.
#[derive(Error, Debug)]
pub enum Error {
    /// Device-level failures surfaced from the RHI
    #[error("Device error: {0}")]
    Device(String),

    /// Resource loading errors
    #[error("Resource error: {0}")]
    Resource(String),

    /// Shader lookup or compilation errors
    #[error("Shader error: {0}")]
    Shader(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

/// Result type alias using ferry's core error type.
pub type Result<T> = std::result::Result<T, Error>;
