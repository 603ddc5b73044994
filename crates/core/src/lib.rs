//! Core utilities shared by the ferry crates.
//!
//! This crate provides foundational types used across the upload engine and
//! frame pipeline:
//! - Error types and result aliases
//! - Logging initialization
//! - The frame clock
//! - The explicit renderer configuration context

mod clock;
mod config;
mod error;
mod logging;

pub use clock::{FrameClock, FrameRate, FrameTime};
pub use config::{MAX_FRAMES_IN_FLIGHT, RendererConfig};
pub use error::{Error, Result};
pub use logging::init_logging;
