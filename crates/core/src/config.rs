//! Renderer configuration context.
//!
//! [`RendererConfig`] is built by the application (from a config file, CLI or
//! hard-coded values) and handed to the upload engine and frame pipeline by
//! value. Nothing in ferry looks configuration up from global state.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default number of frames that may be in flight on the GPU at once.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Resolved settings needed before pipeline construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RendererConfig {
    /// Window width in pixels; also the size of offscreen pass targets.
    pub window_width: u32,
    /// Window height in pixels.
    pub window_height: u32,
    /// Directory holding shader sources (`<name>.vert.hlsl`, `<name>.frag.hlsl`).
    pub shader_input_dir: PathBuf,
    /// Directory holding compiled shader bytecode.
    pub shader_output_dir: PathBuf,
    /// Depth of the frame pipeline.
    pub frames_in_flight: usize,
    /// Value forwarded to shaders through the frame constants.
    pub debug: bool,
}

impl RendererConfig {
    /// Sets the window extent.
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_width = width;
        self.window_height = height;
        self
    }

    /// Sets both shader directories.
    pub fn with_shader_dirs(mut self, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        self.shader_input_dir = input.as_ref().to_path_buf();
        self.shader_output_dir = output.as_ref().to_path_buf();
        self
    }

    /// Sets the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Sets the shader debug flag.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Checks that the configuration can drive a renderer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the window extent or the frame pipeline
    /// depth is zero.
    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(Error::Config(format!(
                "window size must be non-zero, got {}x{}",
                self.window_width, self.window_height
            )));
        }
        if self.frames_in_flight == 0 {
            return Err(Error::Config(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_width: 1280,
            window_height: 720,
            shader_input_dir: PathBuf::from("shaders"),
            shader_output_dir: PathBuf::from("shaders/bin"),
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            debug: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_zero_extent_rejected() {
        let config = RendererConfig::default().with_window_size(0, 720);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_frames_rejected() {
        let config = RendererConfig::default().with_frames_in_flight(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_builders_apply() {
        let config = RendererConfig::default()
            .with_window_size(64, 32)
            .with_shader_dirs("in", "out")
            .with_debug(true);
        assert_eq!((config.window_width, config.window_height), (64, 32));
        assert_eq!(config.shader_input_dir, PathBuf::from("in"));
        assert_eq!(config.shader_output_dir, PathBuf::from("out"));
        assert!(config.debug);
    }
}
