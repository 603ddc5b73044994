#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use ferry_core::RendererConfig;
use ferry_renderer::GpuContext;
use ferry_rhi::RhiResult;
use ferry_rhi::headless::HeadlessDevice;
use ferry_rhi::shader::{SPIRV_MAGIC, ShaderCompiler, ShaderFormat, ShaderStage};

/// Hands out a SPIR-V header for every source.
pub struct StubShaders;

impl ShaderCompiler for StubShaders {
    fn compile(&self, _source: &Path, _stage: ShaderStage, _format: ShaderFormat) -> RhiResult<Vec<u8>> {
        Ok(SPIRV_MAGIC.to_le_bytes().repeat(5))
    }
}

/// Also routes log output through the test harness.
pub fn device() -> Arc<HeadlessDevice> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Arc::new(HeadlessDevice::default())
}

pub fn context(device: Arc<HeadlessDevice>, frames_in_flight: usize) -> GpuContext<HeadlessDevice> {
    let config = RendererConfig::default()
        .with_window_size(32, 32)
        .with_frames_in_flight(frames_in_flight);
    GpuContext::new(device, config, Arc::new(StubShaders)).expect("test config is valid")
}
