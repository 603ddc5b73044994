//! Explicit device context shared by passes and the renderer.

use std::sync::Arc;

use tracing::debug;

use ferry_core::RendererConfig;
use ferry_rhi::RhiResult;
use ferry_rhi::device::GpuDevice;
use ferry_rhi::shader::{ShaderCompiler, ShaderStage, source_path};

/// Device, configuration and shader service, constructed once and passed
/// down explicitly.
pub struct GpuContext<D: GpuDevice> {
    device: Arc<D>,
    config: RendererConfig,
    shaders: Arc<dyn ShaderCompiler>,
}

impl<D: GpuDevice> GpuContext<D> {
    /// Bundles a device with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ferry_core::Error::Config`] if the configuration is invalid.
    pub fn new(
        device: Arc<D>,
        config: RendererConfig,
        shaders: Arc<dyn ShaderCompiler>,
    ) -> ferry_core::Result<Self> {
        config.validate()?;
        Ok(Self {
            device,
            config,
            shaders,
        })
    }

    /// The graphics device.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Renderer configuration.
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Fetches bytecode for `<shader input dir>/<name>.<stage>.hlsl` in the
    /// device's bytecode format.
    pub fn load_shader(&self, name: &str, stage: ShaderStage) -> RhiResult<Vec<u8>> {
        let source = source_path(&self.config.shader_input_dir, name, stage);
        let format = self.device.shader_format();
        debug!("Loading {} shader {:?} as {:?}", stage, source, format);
        self.shaders.compile(&source, stage, format)
    }
}

impl<D: GpuDevice> Clone for GpuContext<D> {
    fn clone(&self) -> Self {
        Self {
            device: self.device.clone(),
            config: self.config.clone(),
            shaders: self.shaders.clone(),
        }
    }
}
