//! Fences and semaphores for the Vulkan backend.

use ash::vk;
use tracing::debug;

use crate::error::RhiResult;
use crate::lock;
use crate::vulkan::buffer::VulkanBuffer;

/// Completion signal of one Vulkan submission.
///
/// Owns what the submission keeps using until the fence is signaled: the
/// transient command pool it was recorded from, the acquire semaphore it
/// waited on and any realigned staging copies.
pub struct VulkanFence {
    pub(crate) fence: vk::Fence,
    pub(crate) pool: vk::CommandPool,
    pub(crate) acquire_semaphore: Option<vk::Semaphore>,
    pub(crate) scratch: Vec<VulkanBuffer>,
}

impl VulkanFence {
    /// Returns the Vulkan fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

/// Creates an unsignaled fence.
pub(crate) fn create_fence(device: &ash::Device) -> RhiResult<vk::Fence> {
    let create_info = vk::FenceCreateInfo::default();
    let fence = unsafe { device.create_fence(&create_info, None)? };
    debug!("Created fence");
    Ok(fence)
}

/// Blocks until `fence` is signaled.
pub(crate) fn wait_fence(device: &ash::Device, fence: vk::Fence) -> RhiResult<()> {
    unsafe { device.wait_for_fences(&[fence], true, u64::MAX)? };
    Ok(())
}

/// Binary semaphores recycled across frames.
///
/// A semaphore returns to the pool only after the submission that waited on
/// it has completed, so a pooled semaphore is always unsignaled.
#[derive(Default)]
pub(crate) struct SemaphorePool {
    free: std::sync::Mutex<Vec<vk::Semaphore>>,
}

impl SemaphorePool {
    /// Takes a free semaphore, creating one if none is available.
    pub(crate) fn take(&self, device: &ash::Device) -> RhiResult<vk::Semaphore> {
        if let Some(semaphore) = lock(&self.free).pop() {
            return Ok(semaphore);
        }
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
        debug!("Created semaphore");
        Ok(semaphore)
    }

    /// Returns an unsignaled semaphore to the pool.
    pub(crate) fn give_back(&self, semaphore: vk::Semaphore) {
        lock(&self.free).push(semaphore);
    }

    /// Destroys every pooled semaphore.
    pub(crate) fn destroy(&self, device: &ash::Device) {
        let free = std::mem::take(&mut *lock(&self.free));
        for semaphore in free {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.free).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_recycles_returned_semaphores() {
        let pool = SemaphorePool::default();
        pool.give_back(vk::Semaphore::null());
        assert_eq!(pool.len(), 1);
        let free = std::mem::take(&mut *lock(&pool.free));
        assert_eq!(free, vec![vk::Semaphore::null()]);
    }
}
