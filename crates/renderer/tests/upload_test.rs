//! Upload engine behaviour against the headless device.

mod common;

use ferry_renderer::{
    BufferUpload, GpuBuffer, GpuImage, ImageUpload, UploadError, UploadRequest, Uploader,
};
use ferry_resources::{PixelFormat, PixelSource, Pixels};
use ferry_rhi::headless::{Command, FenceMode, Fault};
use ferry_rhi::types::{BufferUsage, Extent2d, ImageFormat, ImageUsage};

fn checkerboard(size: u32) -> PixelSource {
    let data = (0..size * size)
        .flat_map(|i| if i % 2 == 0 { [255, 0, 0, 255] } else { [0, 0, 255, 255] })
        .collect();
    PixelSource::from(Pixels::new(size, size, PixelFormat::Rgba8, data).unwrap())
}

#[test]
fn test_index_buffer_and_image_batch() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut indices = GpuBuffer::new(device.clone(), "indices");
    let mut image = GpuImage::new(device.clone());
    let mut pixels = checkerboard(4);

    let handle = uploader
        .submit_async([
            UploadRequest::from(BufferUpload::new(&[0u16, 1, 2], &mut indices, BufferUsage::Index)),
            UploadRequest::from(ImageUpload::new(
                &mut pixels,
                &mut image,
                ImageUsage::Sampler,
                "checker",
            )),
        ])
        .unwrap();
    uploader.wait(handle).unwrap();

    assert_eq!(indices.size(), 6);
    assert_eq!(indices.get().unwrap().contents(), vec![0, 0, 1, 0, 2, 0]);
    assert_eq!(image.extent(), Extent2d::new(4, 4));
    assert_eq!(image.format(), Some(ImageFormat::Rgba8Unorm));
    assert_eq!(&image.get().unwrap().texels()[..4], &[255, 0, 0, 255]);

    assert!(!uploader.is_pending(handle));
    assert_eq!(device.stats().staging, 0);

    // The retired handle is handed out again.
    let again = uploader
        .submit_async([UploadRequest::from(BufferUpload::new(
            &[3u16, 4, 5],
            &mut indices,
            BufferUsage::Index,
        ))])
        .unwrap();
    assert_eq!(again, handle);
    uploader.wait(again).unwrap();
}

#[test]
fn test_payloads_are_packed_in_request_order() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut a = GpuBuffer::new(device.clone(), "a");
    let mut b = GpuBuffer::new(device.clone(), "b");
    let mut c = GpuBuffer::new(device.clone(), "c");

    uploader
        .upload([
            UploadRequest::from(BufferUpload::new(&[1u16, 2, 3], &mut a, BufferUsage::Index)),
            UploadRequest::from(BufferUpload::new(&[7u32; 16], &mut b, BufferUsage::Storage)),
            UploadRequest::from(BufferUpload::new(&[9u8; 3], &mut c, BufferUsage::Vertex)),
        ])
        .unwrap();

    let submissions = device.submissions();
    assert_eq!(submissions.len(), 1);
    let copies: Vec<(u64, u64)> = submissions[0]
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::CopyBuffer {
                src_offset, size, ..
            } => Some((*src_offset, *size)),
            _ => None,
        })
        .collect();
    assert_eq!(copies, vec![(0, 6), (6, 64), (70, 3)]);
    assert_eq!(c.get().unwrap().contents(), vec![9, 9, 9]);
}

#[test]
fn test_failed_destination_submits_nothing() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut first = GpuBuffer::new(device.clone(), "first");
    let mut image = GpuImage::new(device.clone());
    let mut pixels = checkerboard(2);

    uploader
        .upload([UploadRequest::from(BufferUpload::new(
            &[7u32, 8],
            &mut first,
            BufferUsage::Storage,
        ))])
        .unwrap();
    let id = first.get().unwrap().id();
    let submissions = device.stats().submissions;

    // The index storage is created, then the image creation fails
    device.inject(Fault::CreateResource { after: 1 });
    let result = uploader.submit_async([
        UploadRequest::from(BufferUpload::new(&[1u16, 2, 3], &mut first, BufferUsage::Index)),
        UploadRequest::from(ImageUpload::new(&mut pixels, &mut image, ImageUsage::Sampler, "img")),
    ]);

    assert!(matches!(result, Err(UploadError::Device(_))));
    let stats = device.stats();
    assert_eq!(stats.copies_recorded, 1);
    assert_eq!(stats.submissions, submissions);
    assert_eq!(stats.staging, 0);
    assert_eq!(stats.open_command_lists, 0);
    assert_eq!((stats.buffers, stats.images), (1, 0));
    assert_eq!(uploader.live_handles(), 0);
    assert!(!image.is_live());

    assert_eq!(first.get().unwrap().id(), id);
    assert_eq!(first.get().unwrap().contents(), vec![7, 0, 0, 0, 8, 0, 0, 0]);
    assert_eq!(first.usage(), Some(BufferUsage::Storage));
    assert_eq!(first.size(), 8);
}

#[test]
fn test_rejected_submission_keeps_previous_image() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut image = GpuImage::new(device.clone());
    let mut pixels = checkerboard(2);

    uploader
        .upload([UploadRequest::from(ImageUpload::new(
            &mut pixels,
            &mut image,
            ImageUsage::Sampler,
            "background",
        ))])
        .unwrap();
    let id = image.get().unwrap().id();
    let texels = image.get().unwrap().texels();

    let mut larger = checkerboard(4);
    device.inject(Fault::Submit);
    let result = uploader.submit_async([UploadRequest::from(ImageUpload::new(
        &mut larger,
        &mut image,
        ImageUsage::Sampler,
        "background",
    ))]);

    assert!(matches!(result, Err(UploadError::Device(_))));
    assert_eq!(image.get().unwrap().id(), id);
    assert_eq!(image.extent(), Extent2d::new(2, 2));
    assert_eq!(image.get().unwrap().texels(), texels);
    assert_eq!(device.stats().images, 1);
}

#[test]
fn test_staging_failures_abort_batch() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut buffer = GpuBuffer::new(device.clone(), "data");

    for fault in [Fault::CreateStaging, Fault::MapStaging, Fault::Submit] {
        device.inject(fault);
        let result = uploader.submit_async([UploadRequest::from(BufferUpload::new(
            &[1u8, 2, 3, 4],
            &mut buffer,
            BufferUsage::Vertex,
        ))]);
        assert!(matches!(result, Err(UploadError::Device(_))), "{:?}", fault);
        assert_eq!(device.stats().staging, 0);
    }
    assert_eq!(device.stats().submissions, 0);
}

#[test]
fn test_missing_file_allocates_nothing() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut image = GpuImage::new(device.clone());
    let mut source = PixelSource::File("missing/texture.png".into());

    let result = uploader.upload([UploadRequest::from(ImageUpload::new(
        &mut source,
        &mut image,
        ImageUsage::Sampler,
        "missing",
    ))]);
    assert!(matches!(result, Err(UploadError::Resource(_))));
    assert_eq!(device.stats().staging, 0);
    assert!(matches!(source, PixelSource::File(_)));
}

#[test]
fn test_source_is_converted_in_place() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut image = GpuImage::new(device.clone());
    let mut source =
        PixelSource::from(Pixels::new(2, 1, PixelFormat::Luma8, vec![10, 20]).unwrap());

    uploader
        .upload([UploadRequest::from(ImageUpload::new(
            &mut source,
            &mut image,
            ImageUsage::Sampler,
            "gray",
        ))])
        .unwrap();

    assert!(source.is_canonical());
    assert_eq!(
        image.get().unwrap().texels(),
        vec![10, 10, 10, 255, 20, 20, 20, 255]
    );
}

#[test]
fn test_handles_reuse_smallest_retired() {
    let device = common::device();
    device.set_fence_mode(FenceMode::Manual);
    let mut uploader = Uploader::new(device.clone());
    let mut buffers: Vec<_> = (0..3)
        .map(|i| GpuBuffer::new(device.clone(), format!("b{}", i)))
        .collect();

    let mut handles = Vec::new();
    for buffer in &mut buffers {
        handles.push(
            uploader
                .submit_async([UploadRequest::from(BufferUpload::new(
                    &[1u32],
                    buffer,
                    BufferUsage::Storage,
                ))])
                .unwrap(),
        );
    }
    assert_eq!(
        handles.iter().map(|h| h.index()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );

    device.signal_all();
    uploader.wait(handles[2]).unwrap();
    uploader.wait(handles[0]).unwrap();
    assert_eq!(uploader.live_handles(), 1);

    let next = uploader
        .submit_async([UploadRequest::from(BufferUpload::new(
            &[2u32],
            &mut buffers[0],
            BufferUsage::Storage,
        ))])
        .unwrap();
    assert_eq!(next.index(), 0);
    device.signal_all();
}

#[test]
fn test_deinit_twice_is_safe() {
    let device = common::device();
    let mut uploader = Uploader::new(device.clone());
    let mut buffer = GpuBuffer::new(device.clone(), "data");
    uploader
        .submit_async([UploadRequest::from(BufferUpload::new(
            &[1u8; 8],
            &mut buffer,
            BufferUsage::Vertex,
        ))])
        .unwrap();

    uploader.deinit();
    uploader.deinit();
    let stats = device.stats();
    assert_eq!((stats.staging, stats.fences), (0, 0));
    assert_eq!(uploader.live_handles(), 0);
}
