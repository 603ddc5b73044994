//! Per-frame shader constants.
//!
//! This structure must match the HLSL `FrameConstants` cbuffer exactly. It
//! uses `#[repr(C)]` for predictable memory layout and implements `Pod` and
//! `Zeroable` for safe byte casting.

use bytemuck::{Pod, Zeroable};
use glam::Vec2;

use ferry_core::RendererConfig;

/// Constants pushed to every uniform-declaring stage once per frame.
///
/// # Memory Layout
///
/// - Offset 0: window size (8 bytes)
/// - Offset 8: time in seconds (4 bytes)
/// - Offset 12: frame delta in seconds (4 bytes)
/// - Offset 16: debug flag (4 bytes)
/// - Total size: 20 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    /// Window size in pixels.
    pub window_size: Vec2,
    /// Seconds since start.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
    /// Nonzero when debug visualisation is on.
    pub debug: u32,
}

impl FrameConstants {
    /// Size of the struct in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds the constants for one frame.
    pub fn new(config: &RendererConfig, time: f32, delta: f32) -> Self {
        Self {
            window_size: Vec2::new(config.window_width as f32, config.window_height as f32),
            time,
            delta,
            debug: u32::from(config.debug),
        }
    }

    /// Raw bytes as pushed to the device.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
