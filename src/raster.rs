//! Attachment → monochrome bitmap conversion.
//!
//! Images are scaled to the paper width keeping their aspect ratio, flattened
//! onto white, converted to gray, then thresholded at 110% of the median gray
//! value so that both dark photos and pale scans keep visible detail.

use crate::model::{RasterImage, PRINT_WIDTH_PX};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageReader, Limits, Luma};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

/// Threshold = median × MEDIAN_NUM / MEDIAN_DEN (110%).
const MEDIAN_NUM: f32 = 11.0;
const MEDIAN_DEN: f32 = 10.0;

/// Longest printable image in dots after scaling (about one metre of paper).
pub const MAX_HEIGHT_PX: u32 = 8192;
/// Largest source dimension accepted by the decoder.
const MAX_SOURCE_DIM: u32 = 16_384;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image has no pixels")]
    Empty,
    #[error("image too tall to print: {width}x{height} scales to {scaled_height} rows")]
    TooTall {
        width: u32,
        height: u32,
        scaled_height: u64,
    },
    #[error("cannot read image file: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode encoded image bytes (PNG, JPEG, GIF, BMP) and rasterize them.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub fn from_bytes(bytes: &[u8]) -> Result<RasterImage, ConversionError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIM);
    limits.max_image_height = Some(MAX_SOURCE_DIM);
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(limits);
    let img = reader.decode()?;
    rasterize(&img, PRINT_WIDTH_PX)
}

/// Read and rasterize an image file from disk.
pub async fn from_path(path: &Path) -> Result<RasterImage, ConversionError> {
    let bytes = tokio::fs::read(path).await?;
    tokio::task::spawn_blocking(move || from_bytes(&bytes))
        .await
        .map_err(|e| ConversionError::Io(std::io::Error::other(e)))?
}

/// Scale `img` to `width` pixels wide and threshold it.
pub fn rasterize(img: &DynamicImage, width: u32) -> Result<RasterImage, ConversionError> {
    if img.width() == 0 || img.height() == 0 || width == 0 {
        return Err(ConversionError::Empty);
    }
    let scaled = scaled_height(img.width(), img.height(), width);
    if scaled > u64::from(MAX_HEIGHT_PX) {
        return Err(ConversionError::TooTall {
            width: img.width(),
            height: img.height(),
            scaled_height: scaled,
        });
    }
    let height = scaled.max(1) as u32;
    let resized = img.resize_exact(width, height, FilterType::Triangle);
    let gray = flatten_to_gray(&resized);

    let threshold = f32::from(median(&gray)) * MEDIAN_NUM / MEDIAN_DEN;
    debug!(width, height, threshold, "rasterizing");

    let mut out = RasterImage::blank(width, height);
    for (x, y, Luma([v])) in gray.enumerate_pixels() {
        if (*v as f32) < threshold {
            out.set_black(x, y);
        }
    }
    Ok(out)
}

fn scaled_height(src_w: u32, src_h: u32, width: u32) -> u64 {
    (u64::from(src_h) * u64::from(width) + u64::from(src_w) / 2) / u64::from(src_w)
}

/// Gray image with transparent areas composited onto white.
fn flatten_to_gray(img: &DynamicImage) -> GrayImage {
    let rgba = img.to_rgba8();
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let luma = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
        let alpha = p[3] as f32 / 255.0;
        let v = luma * alpha + 255.0 * (1.0 - alpha);
        Luma([v.round().clamp(0.0, 255.0) as u8])
    })
}

/// Lower median of all gray values.
fn median(gray: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for Luma([v]) in gray.pixels() {
        hist[*v as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    let half = total.div_ceil(2);
    let mut seen = 0;
    for (value, count) in hist.iter().enumerate() {
        seen += count;
        if seen >= half {
            return value as u8;
        }
    }
    255
}
