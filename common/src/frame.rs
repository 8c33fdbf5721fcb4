use chrono::{DateTime, Utc};
use image::{GrayImage, RgbImage};

/// A decoded camera frame: an 8-bit RGB raster tagged with acquisition metadata.
///
/// Owned by the processing loop for one iteration and dropped afterwards.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
    /// Position in acquisition order, starting at 0.
    pub seq: u64,
}

impl Frame {
    pub fn new(image: RgbImage, captured_at: DateTime<Utc>, seq: u64) -> Self {
        Self {
            image,
            captured_at,
            seq,
        }
    }

    /// Build a frame from a packed `rgb24` buffer (`height * width * 3` bytes).
    pub fn from_rgb24(
        width: u32,
        height: u32,
        data: Vec<u8>,
        captured_at: DateTime<Utc>,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        let got = data.len();
        let image = RgbImage::from_raw(width, height, data)
            .filter(|_| got == expected)
            .ok_or(FrameError::BufferSize { got, expected })?;
        Ok(Self::new(image, captured_at, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Luma plane of the frame.
    pub fn luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rgb24_accepts_exact_buffer() {
        let frame = Frame::from_rgb24(4, 2, vec![10; 4 * 2 * 3], Utc::now(), 7).unwrap();
        assert_eq!(frame.dimensions(), (4, 2));
        assert_eq!(frame.seq, 7);
    }

    #[test]
    fn from_rgb24_rejects_short_buffer() {
        let err = Frame::from_rgb24(4, 2, vec![0; 10], Utc::now(), 0).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { got: 10, expected: 24 }));
    }

    #[test]
    fn from_rgb24_rejects_long_buffer() {
        let result = Frame::from_rgb24(2, 2, vec![0; 13], Utc::now(), 0);
        assert!(result.is_err());
    }

    #[test]
    fn luma_of_grey_frame_is_uniform() {
        let frame = Frame::from_rgb24(3, 3, vec![128; 27], Utc::now(), 0).unwrap();
        let luma = frame.luma();
        assert!(luma.pixels().all(|p| p.0[0] == 128));
    }
}
