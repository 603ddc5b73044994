//! Presentable surface images on top of an externally created swapchain.
//!
//! The swapchain handle belongs to the caller, who destroys it after the
//! device. Image views, acquire semaphores and render-finished semaphores
//! belong to [`Surface`].

use ash::vk;
use tracing::{debug, warn};

use crate::error::{RhiError, RhiResult};
use crate::types::{Extent2d, ImageFormat};
use crate::vulkan::image::subresource_range;
use crate::vulkan::sync::SemaphorePool;

/// Swapchain handed to [`crate::vulkan::VulkanDevice`].
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    /// Swapchain handle
    pub handle: vk::SwapchainKHR,
    /// Format the swapchain was created with
    pub format: vk::Format,
    /// Swapchain extent
    pub extent: vk::Extent2D,
}

/// Index of an acquired swapchain image.
#[derive(Debug)]
pub struct VulkanSurfaceImage {
    pub(crate) index: u32,
}

impl VulkanSurfaceImage {
    /// Swapchain image index.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
}

pub(crate) struct Surface {
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    render_finished: Vec<vk::Semaphore>,
    format: ImageFormat,
    extent: Extent2d,
    semaphores: SemaphorePool,
}

impl Surface {
    /// Wraps `desc`, creating one view and one render-finished semaphore per image.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SurfaceError`] for formats other than 8-bit
    /// RGBA/BGRA color, or a Vulkan error if querying the images or creating
    /// views or semaphores fails.
    pub(crate) fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        desc: &SwapchainDesc,
    ) -> RhiResult<Self> {
        let format = ImageFormat::from_vk(desc.format)
            .filter(|format| !format.is_depth())
            .ok_or_else(|| {
                RhiError::SurfaceError(format!("Unsupported swapchain format {:?}", desc.format))
            })?;

        let loader = ash::khr::swapchain::Device::new(instance, device);
        let images = unsafe { loader.get_swapchain_images(desc.handle)? };

        let mut surface = Self {
            loader,
            handle: desc.handle,
            images: Vec::with_capacity(images.len()),
            views: Vec::with_capacity(images.len()),
            render_finished: Vec::with_capacity(images.len()),
            format,
            extent: Extent2d::new(desc.extent.width, desc.extent.height),
            semaphores: SemaphorePool::default(),
        };

        for image in images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(desc.format)
                .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));
            let view = match unsafe { device.create_image_view(&view_info, None) } {
                Ok(view) => view,
                Err(e) => {
                    surface.destroy(device);
                    return Err(e.into());
                }
            };
            surface.images.push(image);
            surface.views.push(view);

            let semaphore_info = vk::SemaphoreCreateInfo::default();
            match unsafe { device.create_semaphore(&semaphore_info, None) } {
                Ok(semaphore) => surface.render_finished.push(semaphore),
                Err(e) => {
                    surface.destroy(device);
                    return Err(e.into());
                }
            }
        }

        debug!(
            "Wrapped swapchain with {} images ({:?}, {}x{})",
            surface.images.len(),
            format,
            desc.extent.width,
            desc.extent.height
        );

        Ok(surface)
    }

    pub(crate) fn format(&self) -> ImageFormat {
        self.format
    }

    pub(crate) fn extent(&self) -> Extent2d {
        self.extent
    }

    pub(crate) fn image(&self, index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let index = index as usize;
        Some((*self.images.get(index)?, *self.views.get(index)?))
    }

    /// Acquires the next image, returning its index and the semaphore the
    /// acquisition signals.
    ///
    /// Returns `Ok(None)` when the swapchain is out of date or has no area.
    pub(crate) fn acquire(&self, device: &ash::Device) -> RhiResult<Option<(u32, vk::Semaphore)>> {
        if self.extent.is_empty() {
            return Ok(None);
        }

        let semaphore = self.semaphores.take(device)?;
        let acquired = unsafe {
            self.loader
                .acquire_next_image(self.handle, u64::MAX, semaphore, vk::Fence::null())
        };

        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("Swapchain is suboptimal");
                }
                Ok(Some((index, semaphore)))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.semaphores.give_back(semaphore);
                warn!("Swapchain out of date, skipping frame");
                Ok(None)
            }
            Err(e) => {
                self.semaphores.give_back(semaphore);
                Err(RhiError::SurfaceError(format!(
                    "Failed to acquire swapchain image: {}",
                    e
                )))
            }
        }
    }

    /// Semaphore the submission rendering into image `index` signals.
    pub(crate) fn render_finished(&self, index: u32) -> vk::Semaphore {
        self.render_finished
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Presents image `index` once its render-finished semaphore is signaled.
    pub(crate) fn present(&self, queue: vk::Queue, index: u32) -> RhiResult<()> {
        let swapchains = [self.handle];
        let image_indices = [index];
        let wait_semaphores = [self.render_finished(index)];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(()),
            Ok(true) => {
                debug!("Presented to a suboptimal swapchain");
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                warn!("Swapchain out of date at present");
                Ok(())
            }
            Err(e) => Err(RhiError::SurfaceError(format!(
                "Failed to present image {}: {}",
                index, e
            ))),
        }
    }

    /// Returns an acquire semaphore whose wait has completed.
    pub(crate) fn recycle(&self, semaphore: vk::Semaphore) {
        self.semaphores.give_back(semaphore);
    }

    /// Destroys views and semaphores. The swapchain itself is left alone.
    pub(crate) fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            for view in self.views.drain(..) {
                device.destroy_image_view(view, None);
            }
            for semaphore in self.render_finished.drain(..) {
                device.destroy_semaphore(semaphore, None);
            }
        }
        self.images.clear();
        self.semaphores.destroy(device);
        debug!("Released swapchain views and semaphores");
    }
}
