//! Integration tests for loading pixel sources from disk.

use std::path::PathBuf;

use ferry_resources::{PixelFormat, PixelSource, ResourceError};

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("ferry_resources_{}_{}", std::process::id(), name))
}

#[test]
fn test_file_source_loads_as_rgba8() {
    let path = temp_path("rgb.png");
    let rgb = image::RgbImage::from_raw(2, 2, vec![
        255, 0, 0, 0, 255, 0, //
        0, 0, 255, 255, 255, 255,
    ])
    .expect("2x2 RGB buffer");
    rgb.save(&path).expect("Failed to write test PNG");

    let mut source = PixelSource::File(path.clone());
    let pixels = source.ensure_canonical().expect("Failed to load test PNG");
    assert_eq!((pixels.width(), pixels.height()), (2, 2));
    assert_eq!(pixels.format(), PixelFormat::Rgba8);
    assert_eq!(pixels.byte_len(), 16);
    assert_eq!(&pixels.data()[..4], &[255, 0, 0, 255]);

    // The decoded pixels replace the path
    assert!(source.is_canonical());
    assert!(matches!(source, PixelSource::Loaded(_)));

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_corrupt_file_reports_image_error() {
    let path = temp_path("corrupt.png");
    std::fs::write(&path, b"not a png").expect("Failed to write test file");

    let mut source = PixelSource::File(path.clone());
    assert!(matches!(
        source.ensure_canonical(),
        Err(ResourceError::Image(_))
    ));
    assert_eq!(source, PixelSource::File(path.clone()));

    std::fs::remove_file(&path).ok();
}
