//! Decoded frame container.
//!
//! - `Frame`: owned RGB image plus a per-source sequence number.
//! - `CropRegion`: the operative sub-region handed to detection.
//!
//! Every frame entering a worker is first normalized to the working resolution
//! (`WORK_WIDTH` x `WORK_HEIGHT`). ROI polygons and crop origins are expressed
//! in that coordinate space.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

/// Working resolution width. All stream geometry is configured against it.
pub const WORK_WIDTH: u32 = 600;

/// Working resolution height.
pub const WORK_HEIGHT: u32 = 400;

/// One decoded video frame.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Sequence number assigned by the source (restarts after a rewind).
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self { image, sequence }
    }

    /// Build a frame from packed RGB24 bytes.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} RGB buffer", width, height))?;
        Ok(Self { image, sequence })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    /// Resize to the given resolution. A frame already at that size is returned as is.
    pub fn resized(self, width: u32, height: u32) -> Self {
        if self.image.width() == width && self.image.height() == height {
            return self;
        }
        let image = imageops::resize(&self.image, width, height, FilterType::Triangle);
        Self {
            image,
            sequence: self.sequence,
        }
    }

    /// Resize to the working resolution.
    pub fn normalized(self) -> Self {
        self.resized(WORK_WIDTH, WORK_HEIGHT)
    }

    /// Copy out the sub-image starting at `region`'s origin.
    ///
    /// A zero origin returns a plain clone so the detection path never pays
    /// for an extra crop when the whole frame is operative.
    pub fn crop(&self, region: CropRegion) -> Result<Frame> {
        let (x, y) = (region.x, region.y);
        if x >= self.width() || y >= self.height() {
            return Err(anyhow!(
                "crop origin ({}, {}) outside {}x{} frame",
                x,
                y,
                self.width(),
                self.height()
            ));
        }
        if x == 0 && y == 0 {
            return Ok(self.clone());
        }
        let image =
            imageops::crop_imm(&self.image, x, y, self.width() - x, self.height() - y).to_image();
        Ok(Frame {
            image,
            sequence: self.sequence,
        })
    }
}

/// Top-left origin of the detection sub-region, in working-frame pixels.
///
/// The sub-region always extends to the bottom-right corner of the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
}

impl CropRegion {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Translate a point from crop coordinates back into full-frame coordinates.
    pub fn to_frame(&self, point: (f32, f32)) -> (f32, f32) {
        (point.0 + self.x as f32, point.1 + self.y as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_rgb(vec![value; (width * height * 3) as usize], width, height, 1).unwrap()
    }

    #[test]
    fn from_rgb_rejects_short_buffer() {
        assert!(Frame::from_rgb(vec![0; 10], 4, 4, 0).is_err());
    }

    #[test]
    fn normalized_frame_has_working_resolution() {
        let frame = solid(1280, 720, 40).normalized();
        assert_eq!(frame.width(), WORK_WIDTH);
        assert_eq!(frame.height(), WORK_HEIGHT);
        assert_eq!(frame.sequence, 1);
    }

    #[test]
    fn crop_keeps_bottom_right_region() {
        let frame = solid(600, 400, 10);
        let cropped = frame.crop(CropRegion::new(50, 130)).unwrap();
        assert_eq!(cropped.width(), 550);
        assert_eq!(cropped.height(), 270);
    }

    #[test]
    fn crop_origin_outside_frame_is_an_error() {
        let frame = solid(600, 400, 10);
        assert!(frame.crop(CropRegion::new(600, 0)).is_err());
    }

    #[test]
    fn crop_translates_points_back() {
        let region = CropRegion::new(50, 130);
        assert_eq!(region.to_frame((10.0, 20.0)), (60.0, 150.0));
    }
}
