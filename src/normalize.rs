//! Image normalization: raw upload bytes → bounded JPEG → base64.
//!
//! The description service only needs enough pixels to understand the
//! scene, so uploads are shrunk to fit inside [`MaxDimensions`] and
//! re-encoded as JPEG before being embedded in the JSON request body.
//! Images are never enlarged and never stretched.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use tracing::debug;

use crate::error::DecodeError;

/// Media type of every [`EncodedPayload`].
pub const JPEG_MEDIA_TYPE: &str = "image/jpeg";

/// Upper bound on the normalized image, per axis. Always at least 1×1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxDimensions {
    width: u32,
    height: u32,
}

impl MaxDimensions {
    /// A zero axis is raised to 1: no encoded image is smaller than 1×1.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn square(side: u32) -> Self {
        Self::new(side, side)
    }

    /// Size an image of `width` × `height` takes once fitted inside `self`.
    ///
    /// Scales by `min(max_w / w, max_h / h, 1.0)` and rounds, clamping each
    /// axis to `1..=max`.
    pub fn fit(&self, width: u32, height: u32) -> (u32, u32) {
        if width <= self.width && height <= self.height {
            return (width, height);
        }
        let scale = (self.width as f64 / width as f64)
            .min(self.height as f64 / height as f64)
            .min(1.0);
        let w = ((width as f64 * scale).round() as u32).clamp(1, self.width);
        let h = ((height as f64 * scale).round() as u32).clamp(1, self.height);
        (w, h)
    }
}

/// A re-compressed image as base64 text, ready for a JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// Standard alphabet, padded, no line breaks.
    pub data: String,
    pub media_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Decode `raw`, shrink it to fit `max`, re-encode it as JPEG at `quality`
/// and base64 the result.
pub fn normalize(
    raw: &[u8],
    max: MaxDimensions,
    quality: u8,
) -> Result<EncodedPayload, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::Empty);
    }

    let img = image::load_from_memory(raw).map_err(|e| DecodeError::Unreadable {
        detail: e.to_string(),
    })?;

    let (orig_w, orig_h) = img.dimensions();
    let (w, h) = max.fit(orig_w, orig_h);
    let resized = if (w, h) == (orig_w, orig_h) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    };
    debug!("Normalized {}x{} → {}x{}", orig_w, orig_h, w, h);

    let jpeg = encode_jpeg(&resized, quality)?;
    let data = STANDARD.encode(&jpeg);
    debug!("Encoded image → {} bytes JPEG, {} bytes base64", jpeg.len(), data.len());

    Ok(EncodedPayload {
        data,
        media_type: JPEG_MEDIA_TYPE,
        width: w,
        height: h,
    })
}

/// JPEG has no alpha channel, so everything goes through RGB8 first.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, DecodeError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(
        &mut Cursor::new(&mut buf),
        ImageOutputFormat::Jpeg(quality.clamp(1, 100)),
    )
    .map_err(|e| DecodeError::Unreadable {
        detail: format!("re-encoding failed: {e}"),
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage, Rgba, RgbaImage};

    fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([30, 120, 200])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(90))
            .unwrap();
        buf
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 128])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)
            .unwrap();
        buf
    }

    fn decoded_dimensions(payload: &EncodedPayload) -> (u32, u32) {
        let bytes = STANDARD.decode(&payload.data).expect("valid base64");
        let img = image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg)
            .expect("payload is a JPEG");
        img.dimensions()
    }

    #[test]
    fn fit_never_upscales() {
        let max = MaxDimensions::square(800);
        assert_eq!(max.fit(100, 50), (100, 50));
        assert_eq!(max.fit(800, 800), (800, 800));
    }

    #[test]
    fn fit_preserves_aspect_ratio() {
        let max = MaxDimensions::square(800);
        assert_eq!(max.fit(2000, 1000), (800, 400));
        assert_eq!(max.fit(1000, 2000), (400, 800));
        assert_eq!(max.fit(801, 800), (800, 799));
    }

    #[test]
    fn fit_respects_rectangular_bounds() {
        let max = MaxDimensions::new(640, 480);
        let (w, h) = max.fit(1920, 1080);
        assert!(w <= 640 && h <= 480);
        assert_eq!((w, h), (640, 360));
    }

    #[test]
    fn fit_keeps_extreme_strips_visible() {
        let max = MaxDimensions::square(800);
        assert_eq!(max.fit(10_000, 1), (800, 1));
    }

    #[test]
    fn zero_bound_is_raised_to_one_pixel() {
        let max = MaxDimensions::new(0, 0);
        assert_eq!((max.width(), max.height()), (1, 1));

        let payload = normalize(&png_bytes(10, 10), max, 75).unwrap();
        assert!(payload.width <= max.width() && payload.height <= max.height());
        assert_eq!(decoded_dimensions(&payload), (1, 1));
    }

    #[test]
    fn large_jpeg_is_downscaled() {
        let payload = normalize(&jpeg_bytes(2000, 1000), MaxDimensions::square(800), 75).unwrap();
        assert_eq!(payload.media_type, "image/jpeg");
        assert_eq!((payload.width, payload.height), (800, 400));
        assert_eq!(decoded_dimensions(&payload), (800, 400));
    }

    #[test]
    fn aspect_ratio_within_one_pixel() {
        let (ow, oh) = (1234, 567);
        let payload = normalize(&jpeg_bytes(ow, oh), MaxDimensions::square(300), 75).unwrap();
        let (w, h) = decoded_dimensions(&payload);
        assert!(w <= 300 && h <= 300);
        let expected_h = w as f64 * oh as f64 / ow as f64;
        assert!((h as f64 - expected_h).abs() <= 1.0, "{w}x{h}");
    }

    #[test]
    fn small_image_passes_through() {
        let payload = normalize(&png_bytes(120, 80), MaxDimensions::square(800), 75).unwrap();
        assert_eq!(decoded_dimensions(&payload), (120, 80));
    }

    #[test]
    fn png_with_alpha_becomes_jpeg() {
        let payload = normalize(&png_bytes(1600, 1600), MaxDimensions::square(800), 75).unwrap();
        assert_eq!(payload.media_type, JPEG_MEDIA_TYPE);
        assert_eq!(decoded_dimensions(&payload), (800, 800));
    }

    #[test]
    fn payload_is_unwrapped_base64() {
        let payload = normalize(&jpeg_bytes(900, 900), MaxDimensions::square(800), 75).unwrap();
        assert!(!payload.data.contains('\n'));
        assert!(!payload.data.is_empty());
    }

    #[test]
    fn empty_input_is_decode_error() {
        assert_eq!(
            normalize(&[], MaxDimensions::square(800), 75),
            Err(DecodeError::Empty)
        );
    }

    #[test]
    fn garbage_input_is_decode_error() {
        let garbage: Vec<u8> = (0..512u32).map(|i| (i * 37 % 251) as u8).collect();
        let err = normalize(&garbage, MaxDimensions::square(800), 75).unwrap_err();
        assert!(matches!(err, DecodeError::Unreadable { .. }));
    }

    #[test]
    fn truncated_png_is_decode_error() {
        let mut bytes = png_bytes(64, 64);
        bytes.truncate(bytes.len() / 2);
        let err = normalize(&bytes, MaxDimensions::square(800), 75).unwrap_err();
        assert!(matches!(err, DecodeError::Unreadable { .. }));
    }
}
