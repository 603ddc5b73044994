//! Vulkan backend.
//!
//! [`VulkanDevice`] wraps a logical device and queue created by the
//! application, plus an optional swapchain. It owns:
//! - a `gpu-allocator` allocator for every buffer and image it creates
//! - one transient command pool per recorded command list, released with
//!   the submission's fence
//! - the swapchain's image views and semaphores
//!
//! The instance, device and swapchain handles stay owned by the caller and
//! must outlive the [`VulkanDevice`].
//!
//! Required device features: Vulkan 1.3 dynamic rendering and
//! `VK_KHR_push_descriptor`.

mod buffer;
mod command;
mod image;
mod pipeline;
mod surface;
mod sync;

pub use buffer::VulkanBuffer;
pub use command::VulkanCommandList;
pub use image::VulkanImage;
pub use pipeline::{PUSH_CONSTANT_BYTES, VulkanPipeline};
pub use surface::{SwapchainDesc, VulkanSurfaceImage};
pub use sync::VulkanFence;

use std::sync::Mutex;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info, warn};

use crate::device::{Bindings, GpuDevice, RenderTarget};
use crate::error::{RhiError, RhiResult};
use crate::lock;
use crate::pipeline::PipelineDesc;
use crate::shader::{ShaderFormat, ShaderStage};
use crate::types::{
    AddressMode, BufferDesc, BufferUsage, Extent2d, Filter, ImageDesc, ImageFormat, ImageUsage,
    IndexFormat, SamplerDesc,
};
use command::{AcquiredSurface, BoundPipeline, OpenTarget, begin_transient, transition_image};
use surface::Surface;

impl IndexFormat {
    /// Converts to the Vulkan index type.
    pub fn to_vk(self) -> vk::IndexType {
        match self {
            IndexFormat::U16 => vk::IndexType::UINT16,
            IndexFormat::U32 => vk::IndexType::UINT32,
        }
    }
}

impl Filter {
    /// Converts to the Vulkan filter.
    pub fn to_vk(self) -> vk::Filter {
        match self {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl AddressMode {
    /// Converts to the Vulkan sampler address mode.
    pub fn to_vk(self) -> vk::SamplerAddressMode {
        match self {
            AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
            AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        }
    }
}

/// Pipeline stages that first read a buffer of `usage` after a transfer.
/// Returns true if a buffer-to-image copy may start at `offset`.
fn is_texel_aligned(offset: u64, format: ImageFormat) -> bool {
    offset % u64::from(format.bytes_per_texel()) == 0
}

fn read_stage(usage: BufferUsage) -> vk::PipelineStageFlags {
    match usage {
        BufferUsage::Vertex | BufferUsage::Index => vk::PipelineStageFlags::VERTEX_INPUT,
        BufferUsage::Storage | BufferUsage::Uniform => {
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER
        }
        BufferUsage::Staging => vk::PipelineStageFlags::TRANSFER,
    }
}

/// Handles the application created for the device.
pub struct VulkanDeviceDesc {
    /// Instance the device was created from
    pub instance: ash::Instance,
    /// Logical device with dynamic rendering and push descriptors enabled
    pub device: ash::Device,
    /// Physical device behind `device`
    pub physical_device: vk::PhysicalDevice,
    /// Graphics queue, also used for presentation
    pub queue: vk::Queue,
    /// Family of `queue`
    pub queue_family_index: u32,
    /// Swapchain to present into, if any
    pub swapchain: Option<SwapchainDesc>,
}

/// Vulkan texture sampler.
pub struct VulkanSampler {
    sampler: vk::Sampler,
}

impl VulkanSampler {
    /// Returns the Vulkan sampler handle.
    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

/// [`GpuDevice`] on top of `ash`.
pub struct VulkanDevice {
    device: ash::Device,
    allocator: Mutex<Allocator>,
    push_descriptor: ash::khr::push_descriptor::Device,
    queue: Mutex<vk::Queue>,
    queue_family_index: u32,
    surface: Option<Surface>,
    name: String,
}

impl VulkanDevice {
    /// Wraps externally created Vulkan handles.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator cannot be created or the swapchain
    /// cannot be wrapped.
    pub fn new(desc: VulkanDeviceDesc) -> RhiResult<Self> {
        let properties = unsafe {
            desc.instance
                .get_physical_device_properties(desc.physical_device)
        };
        let name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "vulkan".to_string());

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: desc.instance.clone(),
            device: desc.device.clone(),
            physical_device: desc.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        let surface = desc
            .swapchain
            .as_ref()
            .map(|swapchain| Surface::new(&desc.instance, &desc.device, swapchain))
            .transpose()?;

        let push_descriptor = ash::khr::push_descriptor::Device::new(&desc.instance, &desc.device);

        info!("Vulkan device '{}' ready", name);

        Ok(Self {
            device: desc.device,
            allocator: Mutex::new(allocator),
            push_descriptor,
            queue: Mutex::new(desc.queue),
            queue_family_index: desc.queue_family_index,
            surface,
            name,
        })
    }

    /// Returns the ash device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    fn surface(&self) -> RhiResult<&Surface> {
        self.surface
            .as_ref()
            .ok_or_else(|| RhiError::SurfaceError("device has no swapchain".to_string()))
    }

    /// Ends recording and submits, cleaning up everything on failure.
    fn finish(&self, mut cmd: VulkanCommandList) -> RhiResult<VulkanFence> {
        if let Some(e) = cmd.failed.take() {
            self.discard(cmd);
            return Err(e);
        }
        if cmd.open_target.is_some() {
            self.discard(cmd);
            return Err(RhiError::SubmitFailed(
                "command list submitted with an open render pass".to_string(),
            ));
        }

        if let Some(acquired) = cmd.surface.as_mut() {
            if let Some((image, _)) = self.surface()?.image(acquired.index) {
                transition_image(
                    &self.device,
                    cmd.buffer,
                    image,
                    acquired.layout,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::ImageAspectFlags::COLOR,
                );
                acquired.layout = vk::ImageLayout::PRESENT_SRC_KHR;
            }
        }

        if let Err(e) = unsafe { self.device.end_command_buffer(cmd.buffer) } {
            self.discard(cmd);
            return Err(e.into());
        }

        let fence = match sync::create_fence(&self.device) {
            Ok(fence) => fence,
            Err(e) => {
                self.discard(cmd);
                return Err(e);
            }
        };

        let command_buffers = [cmd.buffer];
        let mut wait_semaphores = Vec::new();
        let mut signal_semaphores = Vec::new();
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        if let Some(acquired) = &cmd.surface {
            wait_semaphores.push(acquired.acquire_semaphore);
            signal_semaphores.push(self.surface()?.render_finished(acquired.index));
        }
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages[..wait_semaphores.len()])
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let queue = lock(&self.queue);
        if let Err(e) = unsafe { self.device.queue_submit(*queue, &[submit_info], fence) } {
            drop(queue);
            unsafe { self.device.destroy_fence(fence, None) };
            self.discard(cmd);
            return Err(RhiError::SubmitFailed(format!("queue submit failed: {}", e)));
        }

        if let Some(acquired) = &cmd.surface {
            // The submission already owns the fence; a failed present only loses this frame
            if let Err(e) = self.surface()?.present(*queue, acquired.index) {
                error!("{}", e);
            }
        }
        drop(queue);

        Ok(VulkanFence {
            fence,
            pool: cmd.pool,
            acquire_semaphore: cmd.surface.map(|acquired| acquired.acquire_semaphore),
            scratch: cmd.scratch,
        })
    }

    /// Copies `len` bytes at `offset` of `src` into a new staging buffer, so
    /// they can be read from offset 0.
    fn realign(&self, src: &VulkanBuffer, offset: u64, len: u64) -> RhiResult<VulkanBuffer> {
        let bytes = usize::try_from(offset)
            .ok()
            .zip(usize::try_from(len).ok())
            .and_then(|(start, len)| src.mapped()?.get(start..start.checked_add(len)?))
            .ok_or_else(|| {
                RhiError::MappingFailed(format!(
                    "staging range {}+{} is not host-visible",
                    offset, len
                ))
            })?;

        let mut scratch = VulkanBuffer::new(
            &self.device,
            &self.allocator,
            "realigned staging",
            BufferUsage::Staging,
            len,
        )?;
        match scratch.mapped_mut() {
            Ok(mapped) => mapped.copy_from_slice(bytes),
            Err(e) => {
                scratch.destroy(&self.device, &self.allocator);
                return Err(e);
            }
        }
        debug!("Realigned {} staging bytes from offset {}", len, offset);
        Ok(scratch)
    }

    fn release_scratch(&self, scratch: Vec<VulkanBuffer>) {
        for buffer in scratch {
            buffer.destroy(&self.device, &self.allocator);
        }
    }

    /// Releases a command list that never reached the queue.
    fn discard(&self, mut cmd: VulkanCommandList) {
        self.release_scratch(std::mem::take(&mut cmd.scratch));
        if let Some(acquired) = cmd.surface {
            // The acquire may still be pending; its semaphore cannot be reused
            if let Err(e) = unsafe { self.device.device_wait_idle() } {
                error!("Failed to wait for device idle: {}", e);
            }
            unsafe { self.device.destroy_semaphore(acquired.acquire_semaphore, None) };
        }
        unsafe { self.device.destroy_command_pool(cmd.pool, None) };
        debug!("Discarded command list");
    }

    /// Hands an acquired surface image back by presenting it untouched.
    fn return_surface(&self, mut cmd: VulkanCommandList) -> RhiResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let restarted = unsafe {
            self.device
                .reset_command_pool(cmd.pool, vk::CommandPoolResetFlags::empty())
                .and_then(|()| self.device.begin_command_buffer(cmd.buffer, &begin_info))
        };
        if let Err(e) = restarted {
            self.discard(cmd);
            return Err(e.into());
        }
        cmd.open_target = None;
        cmd.bound = None;
        if let Some(acquired) = cmd.surface.as_mut() {
            acquired.layout = vk::ImageLayout::UNDEFINED;
        }

        let fence = self.finish(cmd)?;
        let waited = self.wait_fence(&fence);
        self.release_fence(fence);
        waited
    }
}

impl GpuDevice for VulkanDevice {
    type Buffer = VulkanBuffer;
    type Image = VulkanImage;
    type Staging = VulkanBuffer;
    type Fence = VulkanFence;
    type Pipeline = VulkanPipeline;
    type Sampler = VulkanSampler;
    type CommandList = VulkanCommandList;
    type SurfaceImage = VulkanSurfaceImage;

    fn name(&self) -> &str {
        &self.name
    }

    fn shader_format(&self) -> ShaderFormat {
        ShaderFormat::Spirv
    }

    fn surface_format(&self) -> ImageFormat {
        self.surface
            .as_ref()
            .map_or(ImageFormat::Bgra8Unorm, Surface::format)
    }

    fn surface_extent(&self) -> Extent2d {
        self.surface
            .as_ref()
            .map_or(Extent2d::new(0, 0), Surface::extent)
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<VulkanBuffer> {
        VulkanBuffer::new(
            &self.device,
            &self.allocator,
            desc.name,
            desc.usage,
            desc.size,
        )
    }

    fn destroy_buffer(&self, buffer: VulkanBuffer) {
        buffer.destroy(&self.device, &self.allocator);
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<VulkanImage> {
        VulkanImage::new(&self.device, &self.allocator, desc)
    }

    fn destroy_image(&self, image: VulkanImage) {
        image.destroy(&self.device, &self.allocator);
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<VulkanSampler> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(desc.mag_filter.to_vk())
            .min_filter(desc.min_filter.to_vk())
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(desc.address_mode.to_vk())
            .address_mode_v(desc.address_mode.to_vk())
            .address_mode_w(desc.address_mode.to_vk())
            .max_lod(0.0);
        let sampler = unsafe { self.device.create_sampler(&create_info, None)? };
        debug!("Created sampler {:?}", desc);
        Ok(VulkanSampler { sampler })
    }

    fn destroy_sampler(&self, sampler: VulkanSampler) {
        unsafe { self.device.destroy_sampler(sampler.sampler, None) };
    }

    fn create_staging(&self, size: u64) -> RhiResult<VulkanBuffer> {
        VulkanBuffer::new(
            &self.device,
            &self.allocator,
            "staging",
            BufferUsage::Staging,
            size,
        )
    }

    fn map_staging<'a>(&self, staging: &'a mut VulkanBuffer) -> RhiResult<&'a mut [u8]> {
        staging.mapped_mut()
    }

    fn destroy_staging(&self, staging: VulkanBuffer) {
        staging.destroy(&self.device, &self.allocator);
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RhiResult<VulkanPipeline> {
        VulkanPipeline::new(&self.device, desc, desc.color_format.to_vk())
    }

    fn destroy_pipeline(&self, pipeline: VulkanPipeline) {
        pipeline.destroy(&self.device);
    }

    fn begin_commands(&self) -> RhiResult<VulkanCommandList> {
        let (pool, buffer) = begin_transient(&self.device, self.queue_family_index)?;
        Ok(VulkanCommandList::new(pool, buffer))
    }

    fn cmd_copy_buffer(
        &self,
        cmd: &mut VulkanCommandList,
        src: &VulkanBuffer,
        src_offset: u64,
        dst: &VulkanBuffer,
        size: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset: 0,
            size,
        };
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(dst.usage().read_access())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(dst.handle())
            .offset(0)
            .size(size);

        unsafe {
            self.device
                .cmd_copy_buffer(cmd.buffer, src.handle(), dst.handle(), &[region]);
            self.device.cmd_pipeline_barrier(
                cmd.buffer,
                vk::PipelineStageFlags::TRANSFER,
                read_stage(dst.usage()),
                vk::DependencyFlags::empty(),
                &[],
                &[barrier],
                &[],
            );
        }
    }

    fn cmd_copy_image(
        &self,
        cmd: &mut VulkanCommandList,
        src: &VulkanBuffer,
        src_offset: u64,
        dst: &VulkanImage,
        extent: Extent2d,
    ) {
        // bufferOffset must be a multiple of the texel size; packed staging
        // places image payloads wherever the previous payload ended.
        let (source, buffer_offset) = if is_texel_aligned(src_offset, dst.format()) {
            (src.handle(), src_offset)
        } else {
            let len = u64::from(extent.width)
                * u64::from(extent.height)
                * u64::from(dst.format().bytes_per_texel());
            match self.realign(src, src_offset, len) {
                Ok(scratch) => {
                    let handle = scratch.handle();
                    cmd.scratch.push(scratch);
                    (handle, 0)
                }
                Err(e) => {
                    cmd.fail(e);
                    return;
                }
            }
        };

        let aspect = dst.format().aspect();
        let previous = dst.layout().replace(vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        transition_image(
            &self.device,
            cmd.buffer,
            dst.handle(),
            previous,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            aspect,
        );

        let region = vk::BufferImageCopy::default()
            .buffer_offset(buffer_offset)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });

        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd.buffer,
                source,
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        let resting = dst.usage().resting_layout();
        transition_image(
            &self.device,
            cmd.buffer,
            dst.handle(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            resting,
            aspect,
        );
        dst.layout().replace(resting);
    }

    fn acquire_surface(
        &self,
        cmd: &mut VulkanCommandList,
    ) -> RhiResult<Option<VulkanSurfaceImage>> {
        if cmd.surface.is_some() {
            return Err(RhiError::SurfaceError(
                "surface image already acquired on this command list".to_string(),
            ));
        }
        let Some((index, acquire_semaphore)) = self.surface()?.acquire(&self.device)? else {
            return Ok(None);
        };
        cmd.surface = Some(AcquiredSurface {
            index,
            acquire_semaphore,
            layout: vk::ImageLayout::UNDEFINED,
        });
        Ok(Some(VulkanSurfaceImage { index }))
    }

    fn cmd_push_constants(&self, cmd: &mut VulkanCommandList, stage: ShaderStage, data: &[u8]) {
        cmd.set_constants(stage, data);
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: &mut VulkanCommandList,
        target: RenderTarget<'_, Self>,
    ) -> RhiResult<()> {
        if cmd.open_target.is_some() {
            return Err(RhiError::InvalidHandle(
                "render pass already open on this command list".to_string(),
            ));
        }

        let (view, extent) = match target {
            RenderTarget::Image(image) => {
                if image.usage() != ImageUsage::Target {
                    return Err(RhiError::InvalidHandle(format!(
                        "{} image is not a render target",
                        image.usage().name()
                    )));
                }
                let previous = image
                    .layout()
                    .replace(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                transition_image(
                    &self.device,
                    cmd.buffer,
                    image.handle(),
                    previous,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageAspectFlags::COLOR,
                );
                cmd.open_target = Some(OpenTarget::Image(
                    image.handle(),
                    image.layout().clone(),
                    image.usage().resting_layout(),
                ));
                (image.view(), image.extent())
            }
            RenderTarget::Surface(surface_image) => {
                let surface = self.surface()?;
                let acquired = cmd
                    .surface
                    .as_mut()
                    .filter(|acquired| acquired.index == surface_image.index)
                    .ok_or_else(|| {
                        RhiError::SurfaceError(format!(
                            "surface image {} was not acquired on this command list",
                            surface_image.index
                        ))
                    })?;
                let (image, view) = surface.image(acquired.index).ok_or_else(|| {
                    RhiError::InvalidHandle(format!(
                        "surface image index {} out of range",
                        acquired.index
                    ))
                })?;
                transition_image(
                    &self.device,
                    cmd.buffer,
                    image,
                    acquired.layout,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageAspectFlags::COLOR,
                );
                acquired.layout = vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL;
                cmd.open_target = Some(OpenTarget::Surface(image));
                (view, surface.extent())
            }
        };

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::LOAD)
            .store_op(vk::AttachmentStoreOp::STORE)];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: extent.width,
                height: extent.height,
            },
        };
        let rendering_info = vk::RenderingInfo::default()
            .render_area(render_area)
            .layer_count(1)
            .color_attachments(&color_attachments);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        unsafe {
            self.device
                .cmd_begin_rendering(cmd.buffer, &rendering_info);
            self.device
                .cmd_set_viewport(cmd.buffer, 0, std::slice::from_ref(&viewport));
            self.device
                .cmd_set_scissor(cmd.buffer, 0, std::slice::from_ref(&render_area));
        }
        Ok(())
    }

    fn cmd_bind_pipeline(&self, cmd: &mut VulkanCommandList, pipeline: &VulkanPipeline) {
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.handle(),
            );
        }

        let push_stages = pipeline.push_stages();
        for (stage, data) in &cmd.constants {
            if !push_stages.contains(stage.to_vk_stage()) {
                continue;
            }
            // Push constant ranges are 4-byte granular
            let len = data.len().min(PUSH_CONSTANT_BYTES as usize) & !3;
            unsafe {
                self.device.cmd_push_constants(
                    cmd.buffer,
                    pipeline.layout(),
                    push_stages,
                    0,
                    &data[..len],
                );
            }
        }

        cmd.bound = Some(BoundPipeline {
            layout: pipeline.layout(),
            has_descriptors: pipeline.has_descriptors(),
        });
    }

    fn cmd_bind_resources(&self, cmd: &mut VulkanCommandList, bindings: &Bindings<'_, Self>) {
        let Some(bound) = cmd.bound else {
            warn!("Resources bound without a pipeline, ignoring");
            return;
        };

        if !bindings.vertex_buffers.is_empty() {
            let handles: Vec<vk::Buffer> =
                bindings.vertex_buffers.iter().map(|b| b.handle()).collect();
            let offsets = vec![0; handles.len()];
            unsafe {
                self.device
                    .cmd_bind_vertex_buffers(cmd.buffer, 0, &handles, &offsets);
            }
        }
        unsafe {
            self.device.cmd_bind_index_buffer(
                cmd.buffer,
                bindings.index_buffer.handle(),
                0,
                bindings.index_format.to_vk(),
            );
        }

        if !bound.has_descriptors {
            return;
        }

        let sampler = bindings.sampler.map_or(vk::Sampler::null(), |s| s.handle());
        if sampler == vk::Sampler::null() && !bindings.textures.is_empty() {
            warn!("Textures bound without a sampler");
        }
        let image_infos: Vec<vk::DescriptorImageInfo> = bindings
            .textures
            .iter()
            .map(|image| {
                vk::DescriptorImageInfo::default()
                    .sampler(sampler)
                    .image_view(image.view())
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            })
            .collect();
        let buffer_infos: Vec<vk::DescriptorBufferInfo> = bindings
            .storage_buffers
            .iter()
            .map(|buffer| {
                vk::DescriptorBufferInfo::default()
                    .buffer(buffer.handle())
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
            })
            .collect();

        let mut writes = Vec::with_capacity(image_infos.len() + buffer_infos.len());
        for (slot, info) in image_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_binding(slot as u32)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        for (slot, info) in buffer_infos.iter().enumerate() {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_binding((image_infos.len() + slot) as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }

        unsafe {
            self.push_descriptor.cmd_push_descriptor_set(
                cmd.buffer,
                vk::PipelineBindPoint::GRAPHICS,
                bound.layout,
                0,
                &writes,
            );
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: &mut VulkanCommandList,
        index_count: u32,
        instance_count: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw_indexed(cmd.buffer, index_count, instance_count, 0, 0, 0);
        }
    }

    fn cmd_end_render_pass(&self, cmd: &mut VulkanCommandList) {
        let Some(target) = cmd.open_target.take() else {
            warn!("No render pass open, ignoring end");
            return;
        };
        unsafe { self.device.cmd_end_rendering(cmd.buffer) };

        if let OpenTarget::Image(image, layout, resting) = target {
            transition_image(
                &self.device,
                cmd.buffer,
                image,
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                resting,
                vk::ImageAspectFlags::COLOR,
            );
            layout.replace(resting);
        }
        cmd.bound = None;
    }

    fn submit(&self, cmd: VulkanCommandList) -> RhiResult<VulkanFence> {
        self.finish(cmd)
    }

    fn cancel(&self, mut cmd: VulkanCommandList) {
        if cmd.surface.is_none() {
            self.release_scratch(std::mem::take(&mut cmd.scratch));
            unsafe { self.device.destroy_command_pool(cmd.pool, None) };
            debug!("Cancelled command list");
            return;
        }
        // An acquired image must still be presented before it can be acquired again
        if let Err(e) = self.return_surface(cmd) {
            error!("Failed to return surface image: {}", e);
        }
    }

    fn wait_fence(&self, fence: &VulkanFence) -> RhiResult<()> {
        sync::wait_fence(&self.device, fence.fence)
    }

    fn release_fence(&self, fence: VulkanFence) {
        if let Err(e) = sync::wait_fence(&self.device, fence.fence) {
            error!("Failed to wait for fence before release: {}", e);
        }
        unsafe {
            self.device.destroy_fence(fence.fence, None);
            self.device.destroy_command_pool(fence.pool, None);
        }
        self.release_scratch(fence.scratch);
        if let Some(semaphore) = fence.acquire_semaphore {
            match &self.surface {
                Some(surface) => surface.recycle(semaphore),
                None => unsafe { self.device.destroy_semaphore(semaphore, None) },
            }
        }
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let _queue = lock(&self.queue);
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(e) = self.wait_idle() {
            error!("Failed to wait for device idle: {}", e);
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.destroy(&self.device);
        }
        debug!("Vulkan device '{}' released", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_conversions() {
        assert_eq!(Filter::Nearest.to_vk(), vk::Filter::NEAREST);
        assert_eq!(Filter::Linear.to_vk(), vk::Filter::LINEAR);
        assert_eq!(
            AddressMode::ClampToEdge.to_vk(),
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        );
        assert_eq!(
            AddressMode::MirroredRepeat.to_vk(),
            vk::SamplerAddressMode::MIRRORED_REPEAT
        );
    }

    #[test]
    fn test_index_format_to_vk() {
        assert_eq!(IndexFormat::U16.to_vk(), vk::IndexType::UINT16);
        assert_eq!(IndexFormat::U32.to_vk(), vk::IndexType::UINT32);
    }

    #[test]
    fn test_read_stage_for_geometry_buffers() {
        assert_eq!(
            read_stage(BufferUsage::Index),
            vk::PipelineStageFlags::VERTEX_INPUT
        );
        assert!(read_stage(BufferUsage::Storage).contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }

    #[test]
    fn test_packed_image_offsets_need_realigning() {
        // A 6-byte index payload followed by an RGBA8 image
        assert!(is_texel_aligned(0, ImageFormat::Rgba8Unorm));
        assert!(!is_texel_aligned(6, ImageFormat::Rgba8Unorm));
        assert!(is_texel_aligned(8, ImageFormat::Bgra8Srgb));
        assert!(!is_texel_aligned(70, ImageFormat::D32Float));
    }

    #[test]
    fn test_vulkan_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanDevice>();
    }
}
