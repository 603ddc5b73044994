//! Frame orchestration.
//!
//! This module provides the [`Renderer`] that ties the frame cycler, the pass
//! chain and the shared full-screen resources together.

use std::sync::Arc;

use tracing::{debug, info};

use ferry_rhi::device::GpuDevice;
use ferry_rhi::shader::ShaderStage;
use ferry_rhi::types::{BufferUsage, SamplerDesc};

use crate::constants::FrameConstants;
use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::frame_cycler::FrameCycler;
use crate::gpu_buffer::GpuBuffer;
use crate::pass_chain::{PassChain, PassDesc, default_chain};
use crate::upload::{BufferUpload, UploadRequest, Uploader};

/// Indices of the generated full-screen triangle.
const FULLSCREEN_INDICES: [u16; 3] = [0, 1, 2];

/// Outcome of one [`Renderer::draw`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The frame was submitted and will be presented
    Presented,
    /// No surface image was available; nothing was submitted
    Skipped,
}

/// Records and submits frames through a [`PassChain`], keeping at most
/// `frames_in_flight` of them pending on the GPU.
pub struct Renderer<D: GpuDevice> {
    device: Arc<D>,
    chain: PassChain<D>,
    index_buffer: GpuBuffer<D>,
    sampler: Option<D::Sampler>,
    cycler: FrameCycler<D>,
}

impl<D: GpuDevice> Renderer<D> {
    /// Builds the default `screen`, `post`, `post2` chain.
    ///
    /// # Errors
    ///
    /// See [`Self::with_chain`].
    pub fn init(ctx: &GpuContext<D>, uploader: &mut Uploader<D>) -> RenderResult<Self> {
        Self::with_chain(ctx, uploader, &default_chain())
    }

    /// Builds `descs`, uploads the full-screen index buffer and creates the
    /// point sampler shared by every pass.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is invalid or any resource cannot be
    /// created or uploaded. Everything created before the failure is released.
    pub fn with_chain(
        ctx: &GpuContext<D>,
        uploader: &mut Uploader<D>,
        descs: &[PassDesc],
    ) -> RenderResult<Self> {
        let device = ctx.device().clone();
        info!("Initializing renderer on {}", device.name());

        let chain = PassChain::init(ctx, descs)?;

        let mut index_buffer = GpuBuffer::new(device.clone(), "fullscreen indices");
        uploader.upload([UploadRequest::from(BufferUpload::new(
            &FULLSCREEN_INDICES,
            &mut index_buffer,
            BufferUsage::Index,
        ))])?;

        let sampler = device.create_sampler(&SamplerDesc::POINT_CLAMP)?;
        let cycler = FrameCycler::new(device.clone(), ctx.config().frames_in_flight);

        info!(
            "Renderer initialized ({} passes, {} frames in flight)",
            chain.len(),
            cycler.len()
        );

        Ok(Self {
            device,
            chain,
            index_buffer,
            sampler: Some(sampler),
            cycler,
        })
    }

    /// Records and submits one frame.
    ///
    /// Waits first if the frame slot being reused still holds a pending
    /// frame. Returns [`FrameStatus::Skipped`] when the surface has no image
    /// available; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting, acquisition, recording or submission
    /// fails. The frame is abandoned and the next call starts afresh.
    pub fn draw(&mut self, constants: &FrameConstants) -> RenderResult<FrameStatus> {
        let Some(index_buffer) = self.index_buffer.get().filter(|_| !self.chain.is_empty())
        else {
            return Err(RenderError::InvalidState(
                "renderer is not initialized".to_string(),
            ));
        };

        let slot = self.cycler.begin_slot()?;
        let mut cmd = self.device.begin_commands()?;

        let surface = match self.device.acquire_surface(&mut cmd) {
            Ok(Some(surface)) => surface,
            Ok(None) => {
                self.device.cancel(cmd);
                debug!("No surface image available, skipping frame in slot {}", slot);
                return Ok(FrameStatus::Skipped);
            }
            Err(e) => {
                self.device.cancel(cmd);
                return Err(e.into());
            }
        };

        for stage in ShaderStage::ALL {
            self.device
                .cmd_push_constants(&mut cmd, stage, constants.as_bytes());
        }

        if let Err(e) =
            self.chain
                .record(&mut cmd, Some(&surface), index_buffer, self.sampler.as_ref())
        {
            self.device.cancel(cmd);
            return Err(e);
        }

        let fence = self.device.submit(cmd)?;
        self.cycler.store(fence);
        Ok(FrameStatus::Presented)
    }

    /// Number of submitted frames not yet waited on.
    pub fn frames_in_flight(&self) -> usize {
        self.cycler.pending()
    }

    /// Depth of the frame pipeline.
    pub fn frame_slots(&self) -> usize {
        self.cycler.len()
    }

    /// The pass chain.
    pub fn chain(&self) -> &PassChain<D> {
        &self.chain
    }

    /// Waits for every pending frame, then releases the chain, sampler and
    /// index buffer. Safe to call more than once.
    pub fn deinit(&mut self) {
        self.cycler.drain();
        let live = !self.chain.is_empty() || self.sampler.is_some();
        self.chain.deinit();
        if let Some(sampler) = self.sampler.take() {
            self.device.destroy_sampler(sampler);
        }
        self.index_buffer.deinit();
        if live {
            info!("Renderer deinitialized");
        }
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use ferry_rhi::headless::{Fault, HeadlessDevice};

    fn renderer() -> (GpuContext<HeadlessDevice>, Uploader<HeadlessDevice>, Renderer<HeadlessDevice>) {
        let ctx = context(HeadlessDevice::default());
        let mut uploader = Uploader::new(ctx.device().clone());
        let renderer = Renderer::init(&ctx, &mut uploader).unwrap();
        (ctx, uploader, renderer)
    }

    #[test]
    fn test_init_uploads_index_buffer() {
        let (ctx, uploader, renderer) = renderer();
        assert_eq!(uploader.live_handles(), 0);
        assert_eq!(renderer.index_buffer.size(), 6);
        let stats = ctx.device().stats();
        assert_eq!((stats.buffers, stats.samplers, stats.pipelines), (1, 1, 3));
    }

    #[test]
    fn test_upload_failure_releases_chain() {
        let ctx = context(HeadlessDevice::default());
        let mut uploader = Uploader::new(ctx.device().clone());
        ctx.device().inject(Fault::Submit);
        assert!(matches!(
            Renderer::init(&ctx, &mut uploader),
            Err(RenderError::Upload(_))
        ));
        let stats = ctx.device().stats();
        assert_eq!((stats.pipelines, stats.images, stats.buffers), (0, 0, 0));
    }

    #[test]
    fn test_draw_after_deinit_is_rejected() {
        let (ctx, _uploader, mut renderer) = renderer();
        renderer.deinit();
        renderer.deinit();
        let constants = FrameConstants::new(ctx.config(), 0.0, 0.0);
        assert!(matches!(
            renderer.draw(&constants),
            Err(RenderError::InvalidState(_))
        ));
    }
}
