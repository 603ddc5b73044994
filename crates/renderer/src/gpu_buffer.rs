//! Single-owner device buffers with explicit init/deinit.

use std::sync::Arc;

use tracing::debug;

use ferry_rhi::device::GpuDevice;
use ferry_rhi::types::{BufferDesc, BufferUsage};
use ferry_rhi::{RhiError, RhiResult};

/// A device buffer that may be empty, live, or re-initialised for new data.
///
/// The buffer is released exactly once, by [`GpuBuffer::deinit`] or on drop.
pub struct GpuBuffer<D: GpuDevice> {
    device: Arc<D>,
    name: String,
    buffer: Option<D::Buffer>,
    usage: Option<BufferUsage>,
    size: u64,
    capacity: u64,
}

impl<D: GpuDevice> GpuBuffer<D> {
    /// Creates an empty buffer handle.
    pub fn new(device: Arc<D>, name: impl Into<String>) -> Self {
        Self {
            device,
            name: name.into(),
            buffer: None,
            usage: None,
            size: 0,
            capacity: 0,
        }
    }

    /// Makes the buffer hold at least `size` bytes of `usage`.
    ///
    /// Existing storage is kept when it already has the same usage and
    /// enough capacity. Otherwise the old buffer is released and a new one
    /// created.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the device cannot create the
    /// buffer. The live buffer is untouched after a failure.
    pub fn init(&mut self, usage: BufferUsage, size: u64) -> RhiResult<()> {
        let replacement = self.reserve(usage, size)?;
        self.commit(replacement, usage, size);
        Ok(())
    }

    /// Creates the storage `init(usage, size)` would switch to, without
    /// touching the live buffer.
    ///
    /// Returns `None` when the live buffer can be reused. Storage returned
    /// here must be handed to [`Self::commit`] or destroyed by the caller.
    ///
    /// # Errors
    ///
    /// Same as [`Self::init`].
    pub(crate) fn reserve(&self, usage: BufferUsage, size: u64) -> RhiResult<Option<D::Buffer>> {
        if size == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "buffer '{}' size must be greater than 0",
                self.name
            )));
        }
        if self.buffer.is_some() && self.usage == Some(usage) && size <= self.capacity {
            return Ok(None);
        }
        let buffer = self.device.create_buffer(&BufferDesc {
            name: &self.name,
            usage,
            size,
        })?;
        Ok(Some(buffer))
    }

    /// Installs storage from [`Self::reserve`], releasing the buffer it
    /// replaces.
    pub(crate) fn commit(&mut self, replacement: Option<D::Buffer>, usage: BufferUsage, size: u64) {
        let Some(buffer) = replacement else {
            debug!(
                "Reusing {} buffer '{}' ({} of {} bytes)",
                usage.name(),
                self.name,
                size,
                self.capacity
            );
            self.size = size;
            return;
        };
        self.deinit();
        self.buffer = Some(buffer);
        self.usage = Some(usage);
        self.size = size;
        self.capacity = size;
    }

    /// Releases the device buffer. Safe to call on an empty handle.
    pub fn deinit(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.device.destroy_buffer(buffer);
            debug!("Released buffer '{}'", self.name);
        }
        self.usage = None;
        self.size = 0;
        self.capacity = 0;
    }

    /// The device buffer, if live.
    #[inline]
    pub fn get(&self) -> Option<&D::Buffer> {
        self.buffer.as_ref()
    }

    /// Returns true if a device buffer is held.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.buffer.is_some()
    }

    /// Usage of the live buffer.
    #[inline]
    pub fn usage(&self) -> Option<BufferUsage> {
        self.usage
    }

    /// Size requested by the last `init`, in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Allocated size of the live buffer, in bytes.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Debug name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D: GpuDevice> Drop for GpuBuffer<D> {
    fn drop(&mut self) {
        self.deinit();
    }
}
