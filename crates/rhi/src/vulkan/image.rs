//! Vulkan images with gpu-allocator memory and layout tracking.
//!
//! Each [`VulkanImage`] remembers the layout its most recently recorded
//! command leaves it in, so copies and render passes can emit the right
//! barrier without the caller tracking layouts.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::{debug, error};

use crate::error::{RhiError, RhiResult};
use crate::lock;
use crate::types::{Extent2d, ImageDesc, ImageFormat, ImageUsage};

impl ImageFormat {
    /// Converts to the Vulkan format.
    pub fn to_vk(self) -> vk::Format {
        match self {
            ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            ImageFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
            ImageFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            ImageFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            ImageFormat::D32Float => vk::Format::D32_SFLOAT,
        }
    }

    /// Converts from a Vulkan format, if it is one ferry can render into.
    pub fn from_vk(format: vk::Format) -> Option<Self> {
        match format {
            vk::Format::R8G8B8A8_UNORM => Some(ImageFormat::Rgba8Unorm),
            vk::Format::R8G8B8A8_SRGB => Some(ImageFormat::Rgba8Srgb),
            vk::Format::B8G8R8A8_UNORM => Some(ImageFormat::Bgra8Unorm),
            vk::Format::B8G8R8A8_SRGB => Some(ImageFormat::Bgra8Srgb),
            vk::Format::D32_SFLOAT => Some(ImageFormat::D32Float),
            _ => None,
        }
    }

    /// Aspect of the image this format describes.
    pub fn aspect(self) -> vk::ImageAspectFlags {
        if self.is_depth() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        }
    }
}

impl ImageUsage {
    /// Converts to Vulkan image usage flags.
    ///
    /// Every usage can be a transfer destination so uploads may fill it.
    pub fn to_vk_usage(self) -> vk::ImageUsageFlags {
        let base = vk::ImageUsageFlags::TRANSFER_DST;
        match self {
            ImageUsage::Sampler => base | vk::ImageUsageFlags::SAMPLED,
            ImageUsage::Target => {
                base | vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
            }
            ImageUsage::Depth => base | vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            ImageUsage::Storage => base | vk::ImageUsageFlags::STORAGE,
        }
    }

    /// Layout an image of this usage rests in between passes.
    pub fn resting_layout(self) -> vk::ImageLayout {
        match self {
            ImageUsage::Sampler | ImageUsage::Target => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            ImageUsage::Depth => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            ImageUsage::Storage => vk::ImageLayout::GENERAL,
        }
    }
}

/// Layout of an image as seen by the next recorded command.
#[derive(Debug)]
pub(crate) struct LayoutCell(AtomicI32);

impl LayoutCell {
    fn new(layout: vk::ImageLayout) -> Self {
        Self(AtomicI32::new(layout.as_raw()))
    }

    pub(crate) fn get(&self) -> vk::ImageLayout {
        vk::ImageLayout::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Stores `layout`, returning the previous one.
    pub(crate) fn replace(&self, layout: vk::ImageLayout) -> vk::ImageLayout {
        vk::ImageLayout::from_raw(self.0.swap(layout.as_raw(), Ordering::AcqRel))
    }
}

/// Vulkan image, its view and its memory allocation.
pub struct VulkanImage {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    extent: Extent2d,
    format: ImageFormat,
    usage: ImageUsage,
    layout: Arc<LayoutCell>,
}

impl VulkanImage {
    /// Creates a 2D image with one mip level and one layer.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is empty, or image creation, memory
    /// allocation, binding or view creation fails. Partially created objects
    /// are released.
    pub(crate) fn new(
        device: &ash::Device,
        allocator: &Mutex<Allocator>,
        desc: &ImageDesc<'_>,
    ) -> RhiResult<Self> {
        if desc.extent.is_empty() {
            return Err(RhiError::ResourceCreation(format!(
                "image '{}' dimensions must be greater than 0",
                desc.name
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format.to_vk())
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&image_info, None)? };
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = match lock(allocator).allocate(&AllocationCreateDesc {
            name: desc.name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e.into());
            }
        };

        let release = |allocation: Allocation| {
            if let Err(e) = lock(allocator).free(allocation) {
                error!("Failed to free image allocation: {:?}", e);
            }
            unsafe { device.destroy_image(image, None) };
        };

        if let Err(e) =
            unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            release(allocation);
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format.to_vk())
            .subresource_range(subresource_range(desc.format.aspect()));

        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                release(allocation);
                return Err(e.into());
            }
        };

        debug!(
            "Created {} image '{}': {}x{} ({:?})",
            desc.usage.name(),
            desc.name,
            desc.extent.width,
            desc.extent.height,
            desc.format
        );

        Ok(Self {
            image,
            view,
            allocation: Some(allocation),
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
            layout: Arc::new(LayoutCell::new(vk::ImageLayout::UNDEFINED)),
        })
    }

    /// Destroys the view, then the image, then frees the allocation.
    pub(crate) fn destroy(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = lock(allocator).free(allocation) {
                error!("Failed to free image allocation: {:?}", e);
            }
        }

        debug!("Destroyed {} image", self.usage.name());
    }

    /// Returns the Vulkan image handle.
    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Returns the image view handle.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Returns the image dimensions.
    #[inline]
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Returns the texel format.
    #[inline]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Returns the image usage.
    #[inline]
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    pub(crate) fn layout(&self) -> &Arc<LayoutCell> {
        &self.layout
    }
}

/// Full subresource range of a single-mip, single-layer image.
pub(crate) fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect_mask)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_round_trips_through_vk() {
        for format in [
            ImageFormat::Rgba8Unorm,
            ImageFormat::Rgba8Srgb,
            ImageFormat::Bgra8Unorm,
            ImageFormat::Bgra8Srgb,
            ImageFormat::D32Float,
        ] {
            assert_eq!(ImageFormat::from_vk(format.to_vk()), Some(format));
        }
        assert_eq!(ImageFormat::from_vk(vk::Format::R16G16_SFLOAT), None);
    }

    #[test]
    fn test_target_usage_is_attachment_and_sampled() {
        let flags = ImageUsage::Target.to_vk_usage();
        assert!(flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
        assert!(flags.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(flags.contains(vk::ImageUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_depth_aspect() {
        assert_eq!(ImageFormat::D32Float.aspect(), vk::ImageAspectFlags::DEPTH);
        assert_eq!(ImageFormat::Rgba8Unorm.aspect(), vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn test_layout_cell_replace() {
        let cell = LayoutCell::new(vk::ImageLayout::UNDEFINED);
        let previous = cell.replace(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(previous, vk::ImageLayout::UNDEFINED);
        assert_eq!(cell.get(), vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }
}
