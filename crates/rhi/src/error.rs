//! RHI error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// The device refused to create a buffer, image, sampler or fence
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// Host mapping of a staging allocation failed
    #[error("Mapping failed: {0}")]
    MappingFailed(String),

    /// Shader bytecode could not be produced or loaded
    #[error("Shader error: {0}")]
    ShaderError(String),

    /// Pipeline creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Presentable surface error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Command submission failed
    #[error("Submission failed: {0}")]
    SubmitFailed(String),

    /// Waiting on a fence failed
    #[error("Fence wait failed: {0}")]
    WaitFailed(String),

    /// A handle or descriptor was not valid for the requested operation
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
