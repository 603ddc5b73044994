//! One pipeline replayed every frame against a fixed target.
//!
//! ```text
//!                init                 begin
//! Uninitialized -----> Idle <------------------> Recording
//!       ^               |         end
//!       +---- deinit ---+
//! ```
//!
//! `bind` and `exec` are only meaningful while recording. Calling them
//! outside a `begin`/`end` pair is a caller bug, asserted in debug builds and
//! ignored otherwise.

use std::sync::Arc;

use tracing::{debug, info};

use ferry_rhi::device::{Bindings, GpuDevice, RenderTarget};
use ferry_rhi::pipeline::{PipelineDesc, PrimitiveTopology, StageDesc, VertexBufferLayout};
use ferry_rhi::shader::{ShaderResources, ShaderStage};
use ferry_rhi::types::{Extent2d, ImageFormat, ImageUsage};
use ferry_rhi::{RhiError, RhiResult};

use crate::context::GpuContext;
use crate::gpu_image::GpuImage;

/// Lifecycle state of a [`RenderPass`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassState {
    /// No pipeline or target
    Uninitialized,
    /// Configured, not recording
    Idle,
    /// Between `begin` and `end`
    Recording,
}

/// Where a pass draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassTarget {
    /// An image owned by the pass
    Offscreen {
        /// Target dimensions
        extent: Extent2d,
        /// Target format
        format: ImageFormat,
    },
    /// The surface image acquired for the frame
    Surface,
}

/// Pipeline configuration of a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassConfig {
    /// Debug name of the pipeline and target
    pub name: String,
    /// Shader base name; stages load `<name>.vert.hlsl` and `<name>.frag.hlsl`
    pub shader: String,
    /// Color target
    pub target: PassTarget,
    /// Slots the vertex stage declares
    pub vertex: ShaderResources,
    /// Slots the fragment stage declares
    pub fragment: ShaderResources,
    /// Vertex buffer layouts; empty for generated full-screen geometry
    pub vertex_buffers: Vec<VertexBufferLayout>,
    /// Primitive topology
    pub topology: PrimitiveTopology,
}

impl PassConfig {
    /// A pass named `name` whose shaders share its name and declare no slots.
    pub fn new(name: impl Into<String>, target: PassTarget) -> Self {
        let name = name.into();
        Self {
            shader: name.clone(),
            name,
            target,
            vertex: ShaderResources::default(),
            fragment: ShaderResources::default(),
            vertex_buffers: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
        }
    }

    /// Sets the shader base name.
    pub fn with_shader(mut self, shader: impl Into<String>) -> Self {
        self.shader = shader.into();
        self
    }

    /// Sets the slots each stage declares.
    pub fn with_resources(mut self, vertex: ShaderResources, fragment: ShaderResources) -> Self {
        self.vertex = vertex;
        self.fragment = fragment;
        self
    }

    /// Sets the vertex buffer layouts.
    pub fn with_vertex_buffers(mut self, layouts: Vec<VertexBufferLayout>) -> Self {
        self.vertex_buffers = layouts;
        self
    }
}

/// A graphics pipeline plus, for offscreen passes, its owned target.
pub struct RenderPass<D: GpuDevice> {
    device: Arc<D>,
    name: String,
    pipeline: Option<D::Pipeline>,
    target: GpuImage<D>,
    surface_target: bool,
    state: PassState,
}

impl<D: GpuDevice> RenderPass<D> {
    /// Creates an uninitialized pass.
    pub fn new(device: Arc<D>) -> Self {
        Self {
            target: GpuImage::new(device.clone()),
            device,
            name: String::new(),
            pipeline: None,
            surface_target: false,
            state: PassState::Uninitialized,
        }
    }

    /// Builds the pipeline and, for offscreen passes, the target image.
    ///
    /// Re-initialising a configured pass releases its previous resources
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if a shader cannot be compiled or the device rejects
    /// the target or pipeline. The pass is left uninitialized with nothing
    /// allocated.
    pub fn init(&mut self, ctx: &GpuContext<D>, config: &PassConfig) -> RhiResult<()> {
        self.deinit();

        let vertex = ctx.load_shader(&config.shader, ShaderStage::Vertex)?;
        let fragment = ctx.load_shader(&config.shader, ShaderStage::Fragment)?;

        let color_format = match config.target {
            PassTarget::Offscreen { extent, format } => {
                self.target
                    .init(extent, format, ImageUsage::Target, &config.name)?;
                format
            }
            PassTarget::Surface => self.device.surface_format(),
        };

        let desc = PipelineDesc {
            name: &config.name,
            vertex: StageDesc {
                stage: ShaderStage::Vertex,
                code: &vertex,
                entry_point: "main",
                resources: config.vertex,
            },
            fragment: StageDesc {
                stage: ShaderStage::Fragment,
                code: &fragment,
                entry_point: "main",
                resources: config.fragment,
            },
            vertex_buffers: &config.vertex_buffers,
            topology: config.topology,
            color_format,
        };
        let pipeline = match self.device.create_pipeline(&desc) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                self.target.deinit();
                return Err(e);
            }
        };

        self.pipeline = Some(pipeline);
        self.name = config.name.clone();
        self.surface_target = config.target == PassTarget::Surface;
        self.state = PassState::Idle;
        info!(
            "Render pass '{}' initialized ({})",
            self.name,
            if self.surface_target { "surface" } else { "offscreen" }
        );
        Ok(())
    }

    /// Opens the pass on its target and binds the pipeline.
    ///
    /// `surface` is the image acquired for this frame; only passes drawing
    /// to the surface use it.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass is not idle, a surface pass is given no
    /// surface image, or the device cannot open the pass.
    pub fn begin(
        &mut self,
        cmd: &mut D::CommandList,
        surface: Option<&D::SurfaceImage>,
    ) -> RhiResult<()> {
        debug_assert!(
            self.state != PassState::Recording,
            "render pass '{}' begun twice",
            self.name
        );
        let Some(pipeline) = self.pipeline.as_ref().filter(|_| self.state == PassState::Idle)
        else {
            return Err(RhiError::InvalidHandle(format!(
                "render pass '{}' cannot begin while {:?}",
                self.name, self.state
            )));
        };

        let target = if self.surface_target {
            let surface = surface.ok_or_else(|| {
                RhiError::SurfaceError(format!(
                    "render pass '{}' draws to the surface but none was acquired",
                    self.name
                ))
            })?;
            RenderTarget::Surface(surface)
        } else {
            let image = self.target.get().ok_or_else(|| {
                RhiError::InvalidHandle(format!("render pass '{}' has no target", self.name))
            })?;
            RenderTarget::Image(image)
        };

        self.device.cmd_begin_render_pass(cmd, target)?;
        self.device.cmd_bind_pipeline(cmd, pipeline);
        self.state = PassState::Recording;
        Ok(())
    }

    /// Attaches resources for the next draw.
    pub fn bind(&self, cmd: &mut D::CommandList, bindings: &Bindings<'_, D>) {
        debug_assert!(
            self.state == PassState::Recording,
            "render pass '{}' bound before begin",
            self.name
        );
        if self.state == PassState::Recording {
            self.device.cmd_bind_resources(cmd, bindings);
        }
    }

    /// Records one indexed draw.
    pub fn exec(&self, cmd: &mut D::CommandList, index_count: u32, instance_count: u32) {
        debug_assert!(
            self.state == PassState::Recording,
            "render pass '{}' executed before begin",
            self.name
        );
        if self.state == PassState::Recording {
            self.device.cmd_draw_indexed(cmd, index_count, instance_count);
        }
    }

    /// Closes the pass. Does nothing unless recording.
    pub fn end(&mut self, cmd: &mut D::CommandList) {
        if self.state == PassState::Recording {
            self.device.cmd_end_render_pass(cmd);
            self.state = PassState::Idle;
        }
    }

    /// Releases the pipeline and owned target. Safe to call more than once.
    pub fn deinit(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            self.device.destroy_pipeline(pipeline);
            debug!("Released render pass '{}'", self.name);
        }
        self.target.deinit();
        self.surface_target = false;
        self.state = PassState::Uninitialized;
    }

    /// The owned target, if this is a configured offscreen pass.
    #[inline]
    pub fn target(&self) -> Option<&D::Image> {
        self.target.get()
    }

    /// Dimensions of the owned target; zero for surface passes.
    #[inline]
    pub fn target_extent(&self) -> Extent2d {
        self.target.extent()
    }

    /// Returns true if the pass draws to the surface.
    #[inline]
    pub fn targets_surface(&self) -> bool {
        self.surface_target
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> PassState {
        self.state
    }

    /// Debug name given at `init`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: GpuDevice> Drop for RenderPass<D> {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, offscreen};
    use ferry_rhi::headless::{Fault, HeadlessDevice};

    #[test]
    fn test_init_offscreen_creates_target_and_pipeline() {
        let ctx = context(HeadlessDevice::default());
        let mut pass = RenderPass::new(ctx.device().clone());
        pass.init(&ctx, &offscreen("screen", 8, 8)).unwrap();

        assert_eq!(pass.state(), PassState::Idle);
        assert_eq!(pass.target_extent(), Extent2d::new(8, 8));
        let stats = ctx.device().stats();
        assert_eq!((stats.pipelines, stats.images), (1, 1));
    }

    #[test]
    fn test_init_surface_pass_owns_no_image() {
        let ctx = context(HeadlessDevice::default());
        let mut pass = RenderPass::new(ctx.device().clone());
        pass.init(&ctx, &PassConfig::new("post2", PassTarget::Surface))
            .unwrap();
        assert!(pass.targets_surface());
        assert!(pass.target().is_none());
        assert_eq!(ctx.device().stats().images, 0);
    }

    #[test]
    fn test_pipeline_failure_releases_target() {
        let ctx = context(HeadlessDevice::default());
        ctx.device().inject(Fault::CreatePipeline);
        let mut pass = RenderPass::new(ctx.device().clone());

        assert!(pass.init(&ctx, &offscreen("screen", 4, 4)).is_err());
        assert_eq!(pass.state(), PassState::Uninitialized);
        assert_eq!(ctx.device().stats().images, 0);
    }

    #[test]
    fn test_begin_end_cycle() {
        let ctx = context(HeadlessDevice::default());
        let device = ctx.device().clone();
        let mut pass = RenderPass::new(device.clone());
        pass.init(&ctx, &offscreen("screen", 4, 4)).unwrap();

        let mut cmd = device.begin_commands().unwrap();
        pass.begin(&mut cmd, None).unwrap();
        assert_eq!(pass.state(), PassState::Recording);
        pass.exec(&mut cmd, 3, 1);
        pass.end(&mut cmd);
        assert_eq!(pass.state(), PassState::Idle);

        // Ending again is harmless.
        pass.end(&mut cmd);
        device.submit(cmd).unwrap();
        assert_eq!(device.stats().draws_recorded, 1);
    }

    #[test]
    fn test_surface_pass_requires_surface_image() {
        let ctx = context(HeadlessDevice::default());
        let device = ctx.device().clone();
        let mut pass = RenderPass::new(device.clone());
        pass.init(&ctx, &PassConfig::new("post2", PassTarget::Surface))
            .unwrap();

        let mut cmd = device.begin_commands().unwrap();
        assert!(matches!(
            pass.begin(&mut cmd, None),
            Err(RhiError::SurfaceError(_))
        ));
        assert_eq!(pass.state(), PassState::Idle);
        device.cancel(cmd);
    }

    #[test]
    fn test_begin_uninitialized_fails() {
        let device = Arc::new(HeadlessDevice::default());
        let mut pass = RenderPass::new(device.clone());
        let mut cmd = device.begin_commands().unwrap();
        assert!(pass.begin(&mut cmd, None).is_err());
        device.cancel(cmd);
    }

    #[test]
    fn test_deinit_twice_is_safe() {
        let ctx = context(HeadlessDevice::default());
        let mut pass = RenderPass::new(ctx.device().clone());
        pass.init(&ctx, &offscreen("screen", 4, 4)).unwrap();
        pass.deinit();
        pass.deinit();
        assert_eq!(pass.state(), PassState::Uninitialized);
        let stats = ctx.device().stats();
        assert_eq!((stats.pipelines, stats.images), (0, 0));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "executed before begin")]
    fn test_exec_before_begin_asserts() {
        let ctx = context(HeadlessDevice::default());
        let device = ctx.device().clone();
        let mut pass = RenderPass::new(device.clone());
        pass.init(&ctx, &offscreen("screen", 4, 4)).unwrap();
        let mut cmd = device.begin_commands().unwrap();
        pass.exec(&mut cmd, 3, 1);
    }
}
