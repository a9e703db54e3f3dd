//! Compressed frame glue around the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageError, RgbImage};
use marker_ranger_core::GrayImage;

/// Decode any format `image` recognises into an RGB working frame.
pub fn decode_frame(bytes: &[u8]) -> Result<RgbImage, ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Encode an annotated frame as JPEG.
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageError> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(frame)?;
    Ok(out)
}

/// Luma conversion used by the detector.
pub fn to_gray(frame: &RgbImage) -> GrayImage {
    let luma = image::imageops::grayscale(frame);
    GrayImage {
        width: luma.width() as usize,
        height: luma.height() as usize,
        data: luma.into_raw(),
    }
}
