//! CPU-side pixel data for ferry uploads.
//!
//! This crate handles the host half of image uploads:
//! - [`Pixels`], tightly packed 8-bit pixel rows in one of several layouts
//! - [`PixelSource`], pixels that are either resident or still on disk
//! - conversion to the canonical RGBA8 upload layout

mod error;
pub mod pixels;

pub use error::{ResourceError, ResourceResult};
pub use pixels::{PixelFormat, PixelSource, Pixels};
