//! Render hardware interface for ferry.
//!
//! This crate defines the device seam the upload engine and frame pipeline
//! are written against, and the backends behind it:
//! - [`device::GpuDevice`], the trait every backend implements
//! - [`vulkan`], a Vulkan backend on `ash` and `gpu-allocator`
//! - [`headless`], an in-memory backend for tests and offscreen runs
//! - resource, pipeline and shader descriptors shared by all backends

mod error;

pub mod device;
pub mod headless;
pub mod pipeline;
pub mod shader;
pub mod types;
pub mod vulkan;

pub use error::{RhiError, RhiResult};

// Re-export ash types that backend users might need
pub use ash::vk;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
