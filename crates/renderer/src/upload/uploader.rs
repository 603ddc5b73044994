//! Batched staging uploads tracked by completion handles.

use std::sync::Arc;

use tracing::{debug, info, warn};

use ferry_rhi::device::GpuDevice;
use ferry_rhi::types::{Extent2d, ImageFormat};
use ferry_rhi::{RhiError, RhiResult};

use crate::error::{UploadError, UploadResult};
use crate::upload::handle::{CompletionHandle, HandleAllocator};
use crate::upload::request::UploadRequest;
use crate::upload::staging::StagingLayout;

/// Format every uploaded image is created with.
const UPLOAD_IMAGE_FORMAT: ImageFormat = ImageFormat::Rgba8Unorm;

/// Device storage created for one request before its destination changes.
enum Reserved<D: GpuDevice> {
    /// The destination's live buffer is reused
    Existing,
    Buffer(D::Buffer),
    Image(D::Image, Extent2d),
}

/// Copies host data into device buffers and images.
///
/// Each batch gets one staging allocation and one submission. The staging
/// allocation stays alive until the batch's handle is waited on.
pub struct Uploader<D: GpuDevice> {
    device: Arc<D>,
    handles: HandleAllocator<D::Fence, D::Staging>,
}

impl<D: GpuDevice> Uploader<D> {
    /// Creates an uploader with an empty handle table.
    pub fn new(device: Arc<D>) -> Self {
        info!("Uploader initialized on {}", device.name());
        Self {
            device,
            handles: HandleAllocator::new(),
        }
    }

    /// Packs `requests` into one staging allocation and submits their copies.
    ///
    /// Storage fitting every payload is created before any copy is recorded;
    /// destinations switch to it once the batch has been submitted. Image
    /// sources are made resident as RGBA8 first, replacing the caller's
    /// source.
    ///
    /// # Errors
    ///
    /// Fails if the batch is empty, an image source cannot be loaded, or the
    /// device rejects the staging allocation, a destination or the
    /// submission. On failure nothing is submitted, every destination keeps
    /// its previous storage and the staging allocation is freed.
    pub fn submit_async<'a>(
        &mut self,
        requests: impl IntoIterator<Item = UploadRequest<'a, D>>,
    ) -> UploadResult<CompletionHandle> {
        let mut requests: Vec<UploadRequest<'a, D>> = requests.into_iter().collect();
        if requests.is_empty() {
            return Err(UploadError::EmptyBatch);
        }

        for request in &mut requests {
            if let UploadRequest::Image(upload) = request {
                upload.prepare()?;
            }
        }

        let layout = StagingLayout::plan(requests.iter().map(|r| r.payload().len() as u64));
        let mut staging = self.device.create_staging(layout.total())?;

        match self.record(&mut requests, &layout, &mut staging) {
            Ok(fence) => {
                let handle = self.handles.acquire(fence, staging);
                debug!(
                    "Submitted upload batch {} ({} payloads, {} bytes)",
                    handle.index(),
                    layout.len(),
                    layout.total()
                );
                Ok(handle)
            }
            Err(e) => {
                self.device.destroy_staging(staging);
                warn!("Upload batch aborted: {}", e);
                Err(e)
            }
        }
    }

    /// Fills `staging`, records every copy into fresh destination storage and
    /// submits. Destinations switch to that storage only once the submission
    /// has been accepted.
    fn record(
        &self,
        requests: &mut [UploadRequest<'_, D>],
        layout: &StagingLayout,
        staging: &mut D::Staging,
    ) -> UploadResult<D::Fence> {
        {
            let mapped = self.device.map_staging(staging)?;
            for (index, request) in requests.iter().enumerate() {
                mapped[layout.range(index)].copy_from_slice(request.payload());
            }
        }

        let mut storage = Vec::with_capacity(requests.len());
        for request in requests.iter() {
            match self.reserve(request) {
                Ok(reserved) => storage.push(reserved),
                Err(e) => {
                    self.discard(storage);
                    return Err(e.into());
                }
            }
        }

        match self.submit_copies(requests, &storage, layout, staging) {
            Ok(fence) => {
                for (request, reserved) in requests.iter_mut().zip(storage) {
                    self.commit(request, reserved);
                }
                Ok(fence)
            }
            Err(e) => {
                self.discard(storage);
                Err(e)
            }
        }
    }

    /// Creates the storage `request` will be copied into, leaving its
    /// destination untouched.
    fn reserve(&self, request: &UploadRequest<'_, D>) -> RhiResult<Reserved<D>> {
        match request {
            UploadRequest::Buffer(upload) => Ok(upload
                .destination
                .reserve(upload.usage, upload.byte_len())?
                .map_or(Reserved::Existing, Reserved::Buffer)),
            UploadRequest::Image(upload) => {
                let extent = upload
                    .pixels()
                    .map(|pixels| Extent2d::new(pixels.width(), pixels.height()))
                    .unwrap_or_default();
                let image = upload.destination.reserve(
                    extent,
                    UPLOAD_IMAGE_FORMAT,
                    upload.usage,
                    upload.name,
                )?;
                Ok(Reserved::Image(image, extent))
            }
        }
    }

    fn submit_copies(
        &self,
        requests: &[UploadRequest<'_, D>],
        storage: &[Reserved<D>],
        layout: &StagingLayout,
        staging: &D::Staging,
    ) -> UploadResult<D::Fence> {
        let mut cmd = self.device.begin_commands()?;
        for (index, (request, reserved)) in requests.iter().zip(storage).enumerate() {
            let offset = layout.offset(index);
            let recorded = match (request, reserved) {
                (UploadRequest::Buffer(upload), Reserved::Buffer(dst)) => {
                    self.device
                        .cmd_copy_buffer(&mut cmd, staging, offset, dst, upload.byte_len());
                    true
                }
                (UploadRequest::Buffer(upload), Reserved::Existing) => {
                    match upload.destination.get() {
                        Some(dst) => {
                            self.device.cmd_copy_buffer(
                                &mut cmd,
                                staging,
                                offset,
                                dst,
                                upload.byte_len(),
                            );
                            true
                        }
                        None => false,
                    }
                }
                (UploadRequest::Image(_), Reserved::Image(dst, extent)) => {
                    self.device
                        .cmd_copy_image(&mut cmd, staging, offset, dst, *extent);
                    true
                }
                _ => false,
            };
            if !recorded {
                self.device.cancel(cmd);
                return Err(RhiError::InvalidHandle(format!(
                    "upload destination {} is not live",
                    index
                ))
                .into());
            }
        }

        Ok(self.device.submit(cmd)?)
    }

    /// Hands reserved storage over to the request's destination.
    fn commit(&self, request: &mut UploadRequest<'_, D>, reserved: Reserved<D>) {
        match (request, reserved) {
            (UploadRequest::Buffer(upload), Reserved::Buffer(buffer)) => {
                let size = upload.byte_len();
                upload.destination.commit(Some(buffer), upload.usage, size);
            }
            (UploadRequest::Buffer(upload), Reserved::Existing) => {
                let size = upload.byte_len();
                upload.destination.commit(None, upload.usage, size);
            }
            (UploadRequest::Image(upload), Reserved::Image(image, extent)) => {
                upload.destination.commit(
                    image,
                    extent,
                    UPLOAD_IMAGE_FORMAT,
                    upload.usage,
                    upload.name,
                );
            }
            (_, reserved) => self.discard(vec![reserved]),
        }
    }

    /// Destroys storage that never reached a destination.
    fn discard(&self, storage: Vec<Reserved<D>>) {
        for reserved in storage {
            match reserved {
                Reserved::Existing => {}
                Reserved::Buffer(buffer) => self.device.destroy_buffer(buffer),
                Reserved::Image(image, _) => self.device.destroy_image(image),
            }
        }
    }

    /// Submits `requests` and blocks until their copies have completed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::submit_async`], plus failures waiting on the batch.
    pub fn upload<'a>(
        &mut self,
        requests: impl IntoIterator<Item = UploadRequest<'a, D>>,
    ) -> UploadResult<()> {
        let handle = self.submit_async(requests)?;
        self.wait(handle)
    }

    /// Blocks until the batch behind `handle` has completed, then retires it.
    ///
    /// Waiting on a handle that is already retired is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the device fails while waiting. The handle stays
    /// live in that case.
    pub fn wait(&mut self, handle: CompletionHandle) -> UploadResult<()> {
        let Some(fence) = self.handles.signal(handle) else {
            return Ok(());
        };
        self.device.wait_fence(fence)?;
        if let Some((fence, staging)) = self.handles.retire(handle) {
            self.device.release_fence(fence);
            self.device.destroy_staging(staging);
            debug!("Retired upload batch {}", handle.index());
        }
        Ok(())
    }

    /// Waits on every live handle.
    ///
    /// # Errors
    ///
    /// Returns the first wait failure; handles after it stay live.
    pub fn wait_all(&mut self) -> UploadResult<()> {
        for handle in self.handles.live_handles() {
            self.wait(handle)?;
        }
        Ok(())
    }

    /// Returns true if `handle` refers to a batch that has not been waited on.
    pub fn is_pending(&self, handle: CompletionHandle) -> bool {
        self.handles.is_live(handle)
    }

    /// Number of batches not yet waited on.
    pub fn live_handles(&self) -> usize {
        self.handles.live()
    }

    /// Waits for every batch and releases all staging allocations.
    ///
    /// Safe to call more than once.
    pub fn deinit(&mut self) {
        if self.handles.capacity() == 0 {
            return;
        }
        if let Err(e) = self.wait_all() {
            warn!("Waiting on uploads failed, idling device: {}", e);
            if let Err(e) = self.device.wait_idle() {
                warn!("Device idle wait failed: {}", e);
            }
        }
        for (fence, staging) in self.handles.clear() {
            self.device.release_fence(fence);
            self.device.destroy_staging(staging);
        }
        info!("Uploader deinitialized");
    }
}

impl<D: GpuDevice> Drop for Uploader<D> {
    fn drop(&mut self) {
        self.deinit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_rhi::headless::{FenceMode, HeadlessDevice};
    use ferry_rhi::types::BufferUsage;

    use crate::gpu_buffer::GpuBuffer;
    use crate::upload::BufferUpload;

    #[test]
    fn test_uploader_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Uploader<HeadlessDevice>>();
    }

    #[test]
    fn test_empty_batch_is_rejected() {
        let device = Arc::new(HeadlessDevice::default());
        let mut uploader = Uploader::new(device.clone());
        let result = uploader.submit_async(Vec::<UploadRequest<'_, HeadlessDevice>>::new());
        assert!(matches!(result, Err(UploadError::EmptyBatch)));
        assert_eq!(device.stats().staging, 0);
    }

    #[test]
    fn test_pending_handle_keeps_staging_alive() {
        let device = Arc::new(HeadlessDevice::default());
        device.set_fence_mode(FenceMode::Manual);
        let mut uploader = Uploader::new(device.clone());
        let mut buffer = GpuBuffer::new(device.clone(), "data");

        let handle = uploader
            .submit_async([UploadRequest::from(BufferUpload::new(
                &[1u32, 2, 3],
                &mut buffer,
                BufferUsage::Storage,
            ))])
            .unwrap();
        assert!(uploader.is_pending(handle));
        assert_eq!(device.stats().staging, 1);

        device.signal_all();
        uploader.wait(handle).unwrap();
        assert!(!uploader.is_pending(handle));
        assert_eq!(device.stats().staging, 0);

        // Already retired.
        uploader.wait(handle).unwrap();
    }
}
