use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

/// Default JPEG quality for published frames.
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Encode an RGB frame as JPEG. Quality is clamped to `1..=100`.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn produces_jpeg_markers() {
        let image = RgbImage::from_pixel(16, 8, Rgb([10, 200, 30]));
        let bytes = encode_jpeg(&image, DEFAULT_JPEG_QUALITY).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn out_of_range_quality_is_clamped() {
        let image = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        assert!(encode_jpeg(&image, 0).is_ok());
        assert!(encode_jpeg(&image, 255).is_ok());
    }
}
