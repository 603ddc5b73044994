//! The device abstraction consumed by the upload engine and frame pipeline.
//!
//! [`GpuDevice`] is the only seam between ferry's core and a graphics API.
//! Resources are plain associated types owned by the caller and released
//! explicitly through the device, so the device (not the language runtime)
//! decides destruction order.
//!
//! Two implementations ship with this crate:
//! - [`crate::vulkan::VulkanDevice`] on top of `ash` and `gpu-allocator`
//! - [`crate::headless::HeadlessDevice`], an in-memory device for tests and
//!   offscreen runs

use crate::error::RhiResult;
use crate::pipeline::PipelineDesc;
use crate::shader::{ShaderFormat, ShaderStage};
use crate::types::{BufferDesc, Extent2d, ImageDesc, ImageFormat, IndexFormat, SamplerDesc};

/// Color attachment of a render pass.
pub enum RenderTarget<'a, D: GpuDevice + ?Sized> {
    /// An image owned by the caller
    Image(&'a D::Image),
    /// The presentable surface image acquired for this frame
    Surface(&'a D::SurfaceImage),
}

impl<D: GpuDevice + ?Sized> Clone for RenderTarget<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: GpuDevice + ?Sized> Copy for RenderTarget<'_, D> {}

/// Resources attached for the next draw.
pub struct Bindings<'a, D: GpuDevice + ?Sized> {
    /// Images sampled by the fragment stage, in slot order
    pub textures: &'a [&'a D::Image],
    /// Sampler shared by every texture slot
    pub sampler: Option<&'a D::Sampler>,
    /// Fragment storage buffers, in slot order
    pub storage_buffers: &'a [&'a D::Buffer],
    /// Vertex buffers, in binding order
    pub vertex_buffers: &'a [&'a D::Buffer],
    /// Index buffer, always required
    pub index_buffer: &'a D::Buffer,
    /// Element width of `index_buffer`
    pub index_format: IndexFormat,
}

/// A graphics device able to upload data and record frames.
///
/// All methods take `&self`; implementations synchronize internally where the
/// underlying API requires it. Command lists are recorded by one thread at a
/// time.
pub trait GpuDevice: Send + Sync + 'static {
    /// Device-local buffer
    type Buffer: Send + Sync;
    /// Device image
    type Image: Send + Sync;
    /// Host-visible staging allocation
    type Staging: Send;
    /// Completion signal of one submission
    type Fence: Send;
    /// Graphics pipeline
    type Pipeline: Send + Sync;
    /// Texture sampler
    type Sampler: Send + Sync;
    /// Command recording context
    type CommandList: Send;
    /// Presentable image acquired for one frame
    type SurfaceImage: Send;

    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Bytecode format pipelines must be created from.
    fn shader_format(&self) -> ShaderFormat;

    /// Format of presentable surface images.
    fn surface_format(&self) -> ImageFormat;

    /// Current extent of the presentable surface.
    fn surface_extent(&self) -> Extent2d;

    /// Creates a device buffer.
    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<Self::Buffer>;

    /// Destroys a device buffer.
    fn destroy_buffer(&self, buffer: Self::Buffer);

    /// Creates a device image.
    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<Self::Image>;

    /// Destroys a device image.
    fn destroy_image(&self, image: Self::Image);

    /// Creates a sampler.
    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<Self::Sampler>;

    /// Destroys a sampler.
    fn destroy_sampler(&self, sampler: Self::Sampler);

    /// Allocates a host-visible staging region of `size` bytes.
    fn create_staging(&self, size: u64) -> RhiResult<Self::Staging>;

    /// Maps a staging region for host writes.
    fn map_staging<'a>(&self, staging: &'a mut Self::Staging) -> RhiResult<&'a mut [u8]>;

    /// Frees a staging region.
    fn destroy_staging(&self, staging: Self::Staging);

    /// Creates a graphics pipeline.
    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RhiResult<Self::Pipeline>;

    /// Destroys a graphics pipeline.
    fn destroy_pipeline(&self, pipeline: Self::Pipeline);

    /// Opens a new command list.
    fn begin_commands(&self) -> RhiResult<Self::CommandList>;

    /// Records a copy of `size` bytes from `src` at `src_offset` into the start of `dst`.
    fn cmd_copy_buffer(
        &self,
        cmd: &mut Self::CommandList,
        src: &Self::Staging,
        src_offset: u64,
        dst: &Self::Buffer,
        size: u64,
    );

    /// Records a copy of tightly packed texels at `src_offset` into the whole of `dst`.
    fn cmd_copy_image(
        &self,
        cmd: &mut Self::CommandList,
        src: &Self::Staging,
        src_offset: u64,
        dst: &Self::Image,
        extent: Extent2d,
    );

    /// Acquires the next presentable image.
    ///
    /// Returns `Ok(None)` when the surface has no image available right now;
    /// the caller skips the frame.
    fn acquire_surface(
        &self,
        cmd: &mut Self::CommandList,
    ) -> RhiResult<Option<Self::SurfaceImage>>;

    /// Pushes constant data for `stage`.
    ///
    /// The data applies to every pipeline bound afterwards on this command
    /// list whose `stage` declared a uniform slot.
    fn cmd_push_constants(&self, cmd: &mut Self::CommandList, stage: ShaderStage, data: &[u8]);

    /// Opens a render pass that loads and stores `target`.
    fn cmd_begin_render_pass(
        &self,
        cmd: &mut Self::CommandList,
        target: RenderTarget<'_, Self>,
    ) -> RhiResult<()>;

    /// Binds a graphics pipeline inside the open render pass.
    fn cmd_bind_pipeline(&self, cmd: &mut Self::CommandList, pipeline: &Self::Pipeline);

    /// Attaches per-draw resources.
    fn cmd_bind_resources(&self, cmd: &mut Self::CommandList, bindings: &Bindings<'_, Self>);

    /// Records one indexed draw.
    fn cmd_draw_indexed(&self, cmd: &mut Self::CommandList, index_count: u32, instance_count: u32);

    /// Closes the open render pass.
    fn cmd_end_render_pass(&self, cmd: &mut Self::CommandList);

    /// Submits recorded work and returns its completion signal.
    ///
    /// A surface image acquired on `cmd` is presented once the work completes.
    fn submit(&self, cmd: Self::CommandList) -> RhiResult<Self::Fence>;

    /// Discards a command list without executing it.
    fn cancel(&self, cmd: Self::CommandList);

    /// Blocks until `fence` is signaled.
    fn wait_fence(&self, fence: &Self::Fence) -> RhiResult<()>;

    /// Releases a completion signal and whatever its submission kept alive.
    fn release_fence(&self, fence: Self::Fence);

    /// Blocks until the device has no pending work.
    fn wait_idle(&self) -> RhiResult<()>;
}
