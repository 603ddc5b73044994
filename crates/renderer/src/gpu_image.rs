//! Single-owner device images with explicit init/deinit.

use std::sync::Arc;

use tracing::debug;

use ferry_rhi::RhiResult;
use ferry_rhi::device::GpuDevice;
use ferry_rhi::types::{Extent2d, ImageDesc, ImageFormat, ImageUsage};

/// A device image that may be empty or live.
///
/// Unlike buffers, images are recreated on every `init` since their
/// dimensions must match the uploaded pixels exactly.
pub struct GpuImage<D: GpuDevice> {
    device: Arc<D>,
    image: Option<D::Image>,
    name: String,
    extent: Extent2d,
    format: Option<ImageFormat>,
    usage: Option<ImageUsage>,
}

impl<D: GpuDevice> GpuImage<D> {
    /// Creates an empty image handle.
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            image: None,
            name: String::new(),
            extent: Extent2d::default(),
            format: None,
            usage: None,
        }
    }

    /// Releases any live image and creates a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot create the image. The live image
    /// is untouched after a failure.
    pub fn init(
        &mut self,
        extent: Extent2d,
        format: ImageFormat,
        usage: ImageUsage,
        name: &str,
    ) -> RhiResult<()> {
        let image = self.reserve(extent, format, usage, name)?;
        self.commit(image, extent, format, usage, name);
        Ok(())
    }

    /// Creates the image `init` would switch to, without touching the live
    /// one. The result must be handed to [`Self::commit`] or destroyed by
    /// the caller.
    ///
    /// # Errors
    ///
    /// Same as [`Self::init`].
    pub(crate) fn reserve(
        &self,
        extent: Extent2d,
        format: ImageFormat,
        usage: ImageUsage,
        name: &str,
    ) -> RhiResult<D::Image> {
        self.device.create_image(&ImageDesc {
            name,
            extent,
            format,
            usage,
        })
    }

    /// Installs an image from [`Self::reserve`], releasing the one it
    /// replaces.
    pub(crate) fn commit(
        &mut self,
        image: D::Image,
        extent: Extent2d,
        format: ImageFormat,
        usage: ImageUsage,
        name: &str,
    ) {
        self.deinit();
        self.image = Some(image);
        self.name = name.to_string();
        self.extent = extent;
        self.format = Some(format);
        self.usage = Some(usage);
    }

    /// Releases the device image. Safe to call on an empty handle.
    pub fn deinit(&mut self) {
        if let Some(image) = self.image.take() {
            self.device.destroy_image(image);
            debug!("Released image '{}'", self.name);
        }
        self.extent = Extent2d::default();
        self.format = None;
        self.usage = None;
    }

    /// The device image, if live.
    #[inline]
    pub fn get(&self) -> Option<&D::Image> {
        self.image.as_ref()
    }

    /// Returns true if a device image is held.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.image.is_some()
    }

    /// Dimensions of the live image; zero when empty.
    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Format of the live image.
    #[inline]
    pub fn format(&self) -> Option<ImageFormat> {
        self.format
    }

    /// Usage of the live image.
    #[inline]
    pub fn usage(&self) -> Option<ImageUsage> {
        self.usage
    }

    /// Debug name given at the last `init`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: GpuDevice> Drop for GpuImage<D> {
    fn drop(&mut self) {
        self.deinit();
    }
}
