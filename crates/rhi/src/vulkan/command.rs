//! Per-submission command recording for the Vulkan backend.
//!
//! Every [`VulkanCommandList`] owns a transient command pool with a single
//! primary command buffer. The pool travels with the submission's fence and
//! is destroyed when that fence is released, so no command buffer is ever
//! reset while the GPU may still read it.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::error::{RhiError, RhiResult};
use crate::shader::ShaderStage;
use crate::vulkan::buffer::VulkanBuffer;
use crate::vulkan::image::{LayoutCell, subresource_range};

/// Creates a transient pool and allocates one primary command buffer from it.
///
/// # Errors
///
/// Returns an error if pool creation, allocation or `begin` fails. The pool
/// is destroyed on failure.
pub(crate) fn begin_transient(
    device: &ash::Device,
    queue_family_index: u32,
) -> RhiResult<(vk::CommandPool, vk::CommandBuffer)> {
    let create_info = vk::CommandPoolCreateInfo::default()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);

    let pool = unsafe { device.create_command_pool(&create_info, None)? };

    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    let result = unsafe {
        device
            .allocate_command_buffers(&alloc_info)
            .and_then(|buffers| {
                device
                    .begin_command_buffer(buffers[0], &begin_info)
                    .map(|()| buffers[0])
            })
    };

    match result {
        Ok(buffer) => Ok((pool, buffer)),
        Err(e) => {
            unsafe { device.destroy_command_pool(pool, None) };
            Err(e.into())
        }
    }
}

/// Surface image acquired on a command list.
#[derive(Debug)]
pub(crate) struct AcquiredSurface {
    pub(crate) index: u32,
    pub(crate) acquire_semaphore: vk::Semaphore,
    pub(crate) layout: vk::ImageLayout,
}

/// The color attachment of the open render pass.
pub(crate) enum OpenTarget {
    Image(vk::Image, Arc<LayoutCell>, vk::ImageLayout),
    Surface(vk::Image),
}

/// Pipeline state needed after `cmd_bind_pipeline`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BoundPipeline {
    pub(crate) layout: vk::PipelineLayout,
    pub(crate) has_descriptors: bool,
}

/// Vulkan command recording context.
pub struct VulkanCommandList {
    pub(crate) pool: vk::CommandPool,
    pub(crate) buffer: vk::CommandBuffer,
    pub(crate) surface: Option<AcquiredSurface>,
    pub(crate) open_target: Option<OpenTarget>,
    pub(crate) bound: Option<BoundPipeline>,
    pub(crate) constants: Vec<(ShaderStage, Vec<u8>)>,
    /// Staging copies the recorded commands read from; freed with the fence.
    pub(crate) scratch: Vec<VulkanBuffer>,
    /// First recording failure; the list cannot be submitted once set.
    pub(crate) failed: Option<RhiError>,
}

impl VulkanCommandList {
    pub(crate) fn new(pool: vk::CommandPool, buffer: vk::CommandBuffer) -> Self {
        Self {
            pool,
            buffer,
            surface: None,
            open_target: None,
            bound: None,
            constants: Vec::new(),
            scratch: Vec::new(),
            failed: None,
        }
    }

    /// Marks the list as unsubmittable, keeping the first error.
    pub(crate) fn fail(&mut self, error: RhiError) {
        warn!("Command recording failed: {}", error);
        self.failed.get_or_insert(error);
    }

    /// Returns the command buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Records the latest constant data for `stage`.
    pub(crate) fn set_constants(&mut self, stage: ShaderStage, data: &[u8]) {
        match self.constants.iter_mut().find(|(s, _)| *s == stage) {
            Some((_, existing)) => {
                existing.clear();
                existing.extend_from_slice(data);
            }
            None => self.constants.push((stage, data.to_vec())),
        }
    }
}

/// Records an image layout transition.
pub(crate) fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    aspect_mask: vk::ImageAspectFlags,
) {
    if old_layout == new_layout {
        return;
    }

    let (src_stage, src_access) = source_scope(old_layout);
    let (dst_stage, dst_access) = destination_scope(new_layout);

    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect_mask))
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    debug!("Transition {:?}: {:?} -> {:?}", image, old_layout, new_layout);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Stages and accesses that must finish before leaving `layout`.
fn source_scope(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::empty(),
        ),
        other => {
            warn!("Unhandled source layout {:?}, using a full barrier", other);
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}

/// Stages and accesses that wait for the transition into `layout`.
fn destination_scope(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::PipelineStageFlags::TRANSFER,
            vk::AccessFlags::TRANSFER_WRITE,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            vk::AccessFlags::empty(),
        ),
        other => {
            warn!("Unhandled destination layout {:?}, using a full barrier", other);
            (
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            )
        }
    }
}
