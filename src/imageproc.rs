use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageOutputFormat};
use std::io::Cursor;

/// Photos wider than this are downsized before transcription; narrower ones
/// are never upscaled.
pub const MAX_WIDTH: u32 = 2048;

const JPEG_QUALITY: u8 = 90;
const SHARPEN_SIGMA: f32 = 1.0;
const SHARPEN_THRESHOLD: i32 = 2;

/// Normalize a raw photo for transcription: grayscale, contrast stretch,
/// unsharp mask, width cap, JPEG re-encode. The original bytes are left to
/// the caller; only the normalized copy goes to the transcriber.
pub fn normalize(bytes: &[u8]) -> Result<Vec<u8>> {
    normalize_with_max_width(bytes, MAX_WIDTH)
}

fn normalize_with_max_width(bytes: &[u8], max_width: u32) -> Result<Vec<u8>> {
    let decoded = image::load_from_memory(bytes).context("failed to decode image")?;

    let mut gray = decoded.to_luma8();
    stretch_contrast(&mut gray);
    let sharpened = imageops::unsharpen(&gray, SHARPEN_SIGMA, SHARPEN_THRESHOLD);

    let bounded = if sharpened.width() > max_width {
        let height = ((sharpened.height() as u64 * max_width as u64) / sharpened.width() as u64)
            .max(1) as u32;
        imageops::resize(&sharpened, max_width, height, FilterType::Lanczos3)
    } else {
        sharpened
    };

    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(bounded)
        .write_to(&mut out, ImageOutputFormat::Jpeg(JPEG_QUALITY))
        .context("failed to encode normalized image")?;
    Ok(out.into_inner())
}

/// Linear min/max stretch. Flat images are left untouched.
fn stretch_contrast(img: &mut GrayImage) {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for pixel in img.pixels() {
        min = min.min(pixel[0]);
        max = max.max(pixel[0]);
    }
    if min >= max || (min == 0 && max == u8::MAX) {
        return;
    }
    let range = (max - min) as u16;
    for pixel in img.pixels_mut() {
        pixel[0] = (((pixel[0] - min) as u16 * 255) / range) as u8;
    }
}
