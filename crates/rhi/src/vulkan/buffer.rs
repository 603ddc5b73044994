//! Vulkan buffers backed by gpu-allocator.
//!
//! Device-local buffers live in `GpuOnly` memory and are filled through a
//! staging buffer; staging buffers live in persistently mapped `CpuToGpu`
//! memory.

use std::sync::Mutex;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use tracing::{debug, error};

use crate::error::{RhiError, RhiResult};
use crate::lock;
use crate::types::BufferUsage;

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            // Filled by transfer commands
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            // Host-written
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Access mask of the first read after a transfer into this buffer.
    pub(crate) fn read_access(self) -> vk::AccessFlags {
        match self {
            BufferUsage::Vertex => vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            BufferUsage::Index => vk::AccessFlags::INDEX_READ,
            BufferUsage::Storage => vk::AccessFlags::SHADER_READ,
            BufferUsage::Uniform => vk::AccessFlags::UNIFORM_READ,
            BufferUsage::Staging => vk::AccessFlags::TRANSFER_READ,
        }
    }
}

/// Vulkan buffer with its memory allocation.
///
/// Released through [`VulkanBuffer::destroy`]; the owning device decides when.
pub struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl VulkanBuffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size is zero, or buffer creation, memory
    /// allocation or binding fails. Partially created objects are released.
    pub(crate) fn new(
        device: &ash::Device,
        allocator: &Mutex<Allocator>,
        name: &str,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "buffer '{}' size must be greater than 0",
                name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let allocation = lock(allocator).allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: usage.memory_location(),
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound =
            unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            if let Err(free_err) = lock(allocator).free(allocation) {
                error!("Failed to free buffer allocation: {:?}", free_err);
            }
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        debug!("Created {} buffer '{}': {} bytes", usage.name(), name, size);

        Ok(Self {
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Host-visible bytes of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::MappingFailed`] if the memory is not host-mapped.
    pub(crate) fn mapped_mut(&mut self) -> RhiResult<&mut [u8]> {
        let size = self.size as usize;
        let usage = self.usage;
        self.allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .map(|slice| &mut slice[..size])
            .ok_or_else(|| {
                RhiError::MappingFailed(format!("{} buffer is not mapped", usage.name()))
            })
    }

    /// Host-visible bytes of the buffer, if it is mapped.
    pub(crate) fn mapped(&self) -> Option<&[u8]> {
        let size = self.size as usize;
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_slice())
            .map(|slice| &slice[..size])
    }

    /// Frees the allocation, then destroys the buffer.
    pub(crate) fn destroy(mut self, device: &ash::Device, allocator: &Mutex<Allocator>) {
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = lock(allocator).free(allocation) {
                error!("Failed to free buffer allocation: {:?}", e);
            }
        }

        unsafe { device.destroy_buffer(self.buffer, None) };

        debug!("Destroyed {} buffer", self.usage.name());
    }

    /// Returns the Vulkan buffer handle.
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Storage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::STORAGE_BUFFER)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Vertex.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Index.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Storage.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Staging.memory_location(),
            MemoryLocation::CpuToGpu
        );
    }

    #[test]
    fn test_read_access_follows_usage() {
        assert_eq!(BufferUsage::Index.read_access(), vk::AccessFlags::INDEX_READ);
        assert_eq!(
            BufferUsage::Vertex.read_access(),
            vk::AccessFlags::VERTEX_ATTRIBUTE_READ
        );
    }
}
