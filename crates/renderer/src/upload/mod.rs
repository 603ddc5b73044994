//! Asynchronous host-to-device uploads.
//!
//! A batch of [`UploadRequest`]s is packed into one staging allocation,
//! copied by one command list and tracked by one [`CompletionHandle`]:
//!
//! ```text
//! requests -> StagingLayout::plan -> staging writes -> destination init
//!          -> copy commands -> submit -> HandleAllocator::acquire
//! ```
//!
//! Handles are recycled once their fence has been observed, smallest first.

mod handle;
mod request;
mod staging;
mod uploader;

pub use handle::{CompletionHandle, HandleAllocator};
pub use request::{BufferUpload, ImageUpload, UploadRequest};
pub use staging::StagingLayout;
pub use uploader::Uploader;
