//! Ferry headless driver.
//!
//! Runs the upload engine and the frame pipeline on the in-memory device for
//! a bounded number of frames, logging throughput once a second.
//!
//! ```text
//! ferry [FRAMES]
//! ```

mod shaders;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use glam::Vec3;
use tracing::{debug, error, info};

use ferry_core::{FrameClock, RendererConfig};
use ferry_renderer::{
    FrameConstants, FrameStatus, GpuContext, GpuImage, ImageUpload, Renderer, UploadRequest,
    Uploader,
};
use ferry_resources::{PixelFormat, PixelSource, Pixels};
use ferry_rhi::device::GpuDevice;
use ferry_rhi::headless::HeadlessDevice;
use ferry_rhi::types::{Extent2d, ImageUsage};

use crate::shaders::PlaceholderShaders;

const DEFAULT_FRAMES: u32 = 180;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// An RGB gradient between two corner colors.
fn gradient(width: u32, height: u32, from: Vec3, to: Vec3) -> Result<Pixels> {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let t = (x + y) as f32 / (width + height - 2).max(1) as f32;
            let color = from.lerp(to, t) * 255.0;
            data.extend([color.x as u8, color.y as u8, color.z as u8]);
        }
    }
    Ok(Pixels::new(width, height, PixelFormat::Rgb8, data)?)
}

fn main() -> Result<()> {
    ferry_core::init_logging();

    let frames = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u32>()
            .with_context(|| format!("invalid frame count '{}'", arg))?,
        None => DEFAULT_FRAMES,
    };

    let config = RendererConfig::default().with_window_size(640, 360);
    let device = Arc::new(HeadlessDevice::new(Extent2d::new(
        config.window_width,
        config.window_height,
    )));
    info!("Starting ferry on {} for {} frames", device.name(), frames);

    let ctx = GpuContext::new(device.clone(), config, Arc::new(PlaceholderShaders))
        .context("invalid renderer configuration")?;
    let mut uploader = Uploader::new(device.clone());
    let mut renderer =
        Renderer::init(&ctx, &mut uploader).context("failed to initialize renderer")?;

    // A texture uploaded in the background while the first frames render.
    let mut texture = GpuImage::new(device.clone());
    let mut source = PixelSource::from(gradient(
        64,
        64,
        Vec3::new(0.1, 0.2, 0.8),
        Vec3::new(0.9, 0.6, 0.1),
    )?);
    let pending = uploader
        .submit_async([UploadRequest::from(ImageUpload::new(
            &mut source,
            &mut texture,
            ImageUsage::Sampler,
            "gradient",
        ))])
        .context("failed to submit texture upload")?;

    let mut clock = FrameClock::new();
    for frame in 0..frames {
        let time = clock.begin_frame();
        let constants = FrameConstants::new(ctx.config(), time.time, time.delta);

        let presented = match renderer.draw(&constants) {
            Ok(FrameStatus::Presented) => true,
            Ok(FrameStatus::Skipped) => {
                debug!("Frame {} skipped", frame);
                false
            }
            Err(e) => {
                error!("Frame {} failed: {}", frame, e);
                false
            }
        };
        if let Some(rate) = clock.end_frame(presented) {
            info!(
                "{:.1} fps, {} skipped, {} in flight",
                rate.fps,
                rate.skipped,
                renderer.frames_in_flight()
            );
        }

        if frame == 0 {
            uploader.wait(pending).context("texture upload failed")?;
            info!(
                "Texture '{}' resident ({}x{})",
                texture.name(),
                texture.extent().width,
                texture.extent().height
            );
        }
        thread::sleep(FRAME_INTERVAL);
    }

    renderer.deinit();
    texture.deinit();
    uploader.deinit();
    info!("Shut down after {:.2}s", clock.elapsed().as_secs_f32());
    Ok(())
}
