//! Payloads of an upload batch.

use bytemuck::Pod;

use ferry_resources::{PixelSource, Pixels, ResourceResult};
use ferry_rhi::device::GpuDevice;
use ferry_rhi::types::{BufferUsage, ImageUsage};

use crate::gpu_buffer::GpuBuffer;
use crate::gpu_image::GpuImage;

/// Typed elements bound for a device buffer.
pub struct BufferUpload<'a, D: GpuDevice> {
    pub(crate) bytes: &'a [u8],
    pub(crate) destination: &'a mut GpuBuffer<D>,
    pub(crate) usage: BufferUsage,
}

impl<'a, D: GpuDevice> BufferUpload<'a, D> {
    /// Uploads `elements` into `destination`, (re)initialised for `usage`.
    pub fn new<T: Pod>(
        elements: &'a [T],
        destination: &'a mut GpuBuffer<D>,
        usage: BufferUsage,
    ) -> Self {
        Self {
            bytes: bytemuck::cast_slice(elements),
            destination,
            usage,
        }
    }

    /// Payload size in bytes.
    pub fn byte_len(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Pixels bound for a device image.
///
/// The source is converted to RGBA8 in place before the batch is packed, so
/// after a successful upload it holds resident canonical pixels.
pub struct ImageUpload<'a, D: GpuDevice> {
    pub(crate) source: &'a mut PixelSource,
    pub(crate) destination: &'a mut GpuImage<D>,
    pub(crate) usage: ImageUsage,
    pub(crate) name: &'a str,
}

impl<'a, D: GpuDevice> ImageUpload<'a, D> {
    /// Uploads `source` into `destination`, recreated with `usage` and debug `name`.
    pub fn new(
        source: &'a mut PixelSource,
        destination: &'a mut GpuImage<D>,
        usage: ImageUsage,
        name: &'a str,
    ) -> Self {
        Self {
            source,
            destination,
            usage,
            name,
        }
    }

    pub(crate) fn prepare(&mut self) -> ResourceResult<()> {
        self.source.ensure_canonical().map(|_| ())
    }

    pub(crate) fn pixels(&self) -> Option<&Pixels> {
        match &*self.source {
            PixelSource::Loaded(pixels) => Some(pixels),
            PixelSource::File(_) => None,
        }
    }
}

/// One payload of an upload batch.
pub enum UploadRequest<'a, D: GpuDevice> {
    /// Buffer payload
    Buffer(BufferUpload<'a, D>),
    /// Image payload
    Image(ImageUpload<'a, D>),
}

impl<D: GpuDevice> UploadRequest<'_, D> {
    /// Bytes to stage. Images contribute nothing until their source is resident.
    pub(crate) fn payload(&self) -> &[u8] {
        match self {
            UploadRequest::Buffer(upload) => upload.bytes,
            UploadRequest::Image(upload) => upload.pixels().map_or(&[], Pixels::data),
        }
    }
}

impl<'a, D: GpuDevice> From<BufferUpload<'a, D>> for UploadRequest<'a, D> {
    fn from(upload: BufferUpload<'a, D>) -> Self {
        UploadRequest::Buffer(upload)
    }
}

impl<'a, D: GpuDevice> From<ImageUpload<'a, D>> for UploadRequest<'a, D> {
    fn from(upload: ImageUpload<'a, D>) -> Self {
        UploadRequest::Image(upload)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use ferry_resources::PixelFormat;
    use ferry_rhi::headless::HeadlessDevice;

    #[test]
    fn test_buffer_upload_views_elements_as_bytes() {
        let device = Arc::new(HeadlessDevice::default());
        let mut buffer = GpuBuffer::new(device, "indices");
        let indices = [0u16, 1, 2];
        let upload = BufferUpload::new(&indices, &mut buffer, BufferUsage::Index);
        assert_eq!(upload.byte_len(), 6);

        let request = UploadRequest::from(upload);
        assert_eq!(request.payload(), &[0, 0, 1, 0, 2, 0]);
    }

    #[test]
    fn test_image_payload_follows_conversion() {
        let device = Arc::new(HeadlessDevice::default());
        let mut image = GpuImage::new(device);
        let mut source =
            PixelSource::from(Pixels::new(1, 1, PixelFormat::Bgra8, vec![1, 2, 3, 4]).unwrap());

        let mut upload = ImageUpload::new(&mut source, &mut image, ImageUsage::Sampler, "px");
        upload.prepare().unwrap();
        let request = UploadRequest::from(upload);
        assert_eq!(request.payload(), &[3, 2, 1, 4]);
        drop(request);
        assert!(source.is_canonical());
    }
}
