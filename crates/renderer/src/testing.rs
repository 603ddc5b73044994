//! Helpers shared by unit tests.

use std::path::Path;
use std::sync::Arc;

use ferry_core::RendererConfig;
use ferry_rhi::headless::HeadlessDevice;
use ferry_rhi::shader::{SPIRV_MAGIC, ShaderCompiler, ShaderFormat, ShaderStage};
use ferry_rhi::types::{Extent2d, ImageFormat};
use ferry_rhi::RhiResult;

use crate::context::GpuContext;
use crate::render_pass::{PassConfig, PassTarget};

/// Returns a SPIR-V header for any source.
pub(crate) struct StubShaders;

impl ShaderCompiler for StubShaders {
    fn compile(&self, _source: &Path, _stage: ShaderStage, _format: ShaderFormat) -> RhiResult<Vec<u8>> {
        Ok(SPIRV_MAGIC.to_le_bytes().repeat(5))
    }
}

pub(crate) fn context(device: HeadlessDevice) -> GpuContext<HeadlessDevice> {
    let config = RendererConfig::default().with_window_size(16, 16);
    GpuContext::new(Arc::new(device), config, Arc::new(StubShaders))
        .expect("test config is valid")
}

pub(crate) fn offscreen(name: &str, width: u32, height: u32) -> PassConfig {
    PassConfig::new(
        name,
        PassTarget::Offscreen {
            extent: Extent2d::new(width, height),
            format: ImageFormat::Rgba8Unorm,
        },
    )
}
