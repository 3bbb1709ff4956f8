use crate::error::{Error, Result};
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, ColorType};

/// Longest side of a stored photo, in pixels.
pub const MAX_EDGE: u32 = 1600;
pub const JPEG_QUALITY: u8 = 85;

/// A photo re-encoded for storage.
#[derive(Debug, Clone)]
pub struct PreparedPhoto {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Size that fits `(width, height)` inside a `max` square, keeping the aspect
/// ratio. Images are never enlarged.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = (max as f64 / width as f64)
        .min(max as f64 / height as f64)
        .min(1.0);
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

/// Decode an uploaded image, downscale it to [`MAX_EDGE`] and re-encode it as
/// JPEG. CPU bound; call from a blocking thread.
pub fn prepare_photo(raw: &[u8]) -> Result<PreparedPhoto> {
    if !infer::is_image(raw) {
        return Err(Error::validation("upload is not an image"));
    }
    let img = image::load_from_memory(raw)?;
    let (width, height) = fit_within(img.width(), img.height(), MAX_EDGE);
    let img = if (width, height) == (img.width(), img.height()) {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY).encode(
        rgb.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;
    Ok(PreparedPhoto {
        bytes: Bytes::from(out),
        width,
        height,
    })
}
