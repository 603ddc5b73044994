//! Async uploads and the frame-in-flight pass pipeline.
//!
//! This crate orchestrates everything above the device seam:
//! - [`upload`], batched staging uploads tracked by recyclable handles
//! - [`GpuBuffer`] and [`GpuImage`], single-owner device resources
//! - [`RenderPass`] and [`PassChain`], chained full-screen passes
//! - [`FrameCycler`], bounding how far the CPU runs ahead of the GPU
//! - [`Renderer`], one frame per `draw`

mod constants;
mod context;
mod error;
mod gpu_buffer;
mod gpu_image;

pub mod frame_cycler;
pub mod pass_chain;
pub mod render_pass;
pub mod renderer;
pub mod upload;

#[cfg(test)]
mod testing;

pub use constants::FrameConstants;
pub use context::GpuContext;
pub use error::{RenderError, RenderResult, UploadError, UploadResult};
pub use frame_cycler::FrameCycler;
pub use gpu_buffer::GpuBuffer;
pub use gpu_image::GpuImage;
pub use pass_chain::{PassChain, PassDesc, PassOutput, default_chain};
pub use render_pass::{PassConfig, PassState, PassTarget, RenderPass};
pub use renderer::{FrameStatus, Renderer};
pub use upload::{
    BufferUpload, CompletionHandle, HandleAllocator, ImageUpload, StagingLayout, UploadRequest,
    Uploader,
};
