//! Frame type — RGB raster with JPEG encoding and clamped cropping.

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// A decoded camera frame.
///
/// Owned transiently by the capture loop and handed to callers behind an
/// `Arc`; the capture side replaces its slot each cycle, it never mutates
/// a frame after publishing it.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Encode the frame as JPEG.
    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>, FrameError> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality).encode(
            &self.data,
            self.width,
            self.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(buf)
    }

    /// Crop a region with bounds clamped to the frame extents.
    ///
    /// Returns `None` when the clamped region is empty (a box entirely
    /// outside the frame), which callers treat as a drop, not an error.
    pub fn crop(&self, x: f32, y: f32, w: f32, h: f32) -> Option<Frame> {
        let x0 = (x.max(0.0) as u32).min(self.width);
        let y0 = (y.max(0.0) as u32).min(self.height);
        let x1 = ((x + w).max(0.0) as u32).min(self.width);
        let y1 = ((y + h).max(0.0) as u32).min(self.height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let crop_w = x1 - x0;
        let crop_h = y1 - y0;
        let row_bytes = (crop_w as usize) * 3;
        let stride = (self.width as usize) * 3;

        let mut data = Vec::with_capacity(row_bytes * crop_h as usize);
        for row in y0..y1 {
            let start = (row as usize) * stride + (x0 as usize) * 3;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }

        Some(Frame {
            data,
            width: crop_w,
            height: crop_h,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_4x2() -> Frame {
        // 4x2 RGB image, pixel value = its flat index.
        let data: Vec<u8> = (0..4 * 2 * 3).map(|i| i as u8).collect();
        Frame::new(data, 4, 2, 1).unwrap()
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(matches!(
            Frame::new(vec![0u8; 10], 4, 2, 1),
            Err(FrameError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_crop_interior_region() {
        let frame = frame_4x2();
        let crop = frame.crop(1.0, 0.0, 2.0, 2.0).unwrap();
        assert_eq!(crop.width, 2);
        assert_eq!(crop.height, 2);
        // Row 0 pixels 1..3 then row 1 pixels 1..3.
        assert_eq!(crop.data[..3], [3, 4, 5]);
        assert_eq!(crop.data.len(), 2 * 2 * 3);
    }

    #[test]
    fn test_crop_clamps_to_extents() {
        let frame = frame_4x2();
        let crop = frame.crop(-10.0, -10.0, 100.0, 100.0).unwrap();
        assert_eq!(crop.width, 4);
        assert_eq!(crop.height, 2);
        assert_eq!(crop.data, frame.data);
    }

    #[test]
    fn test_crop_outside_frame_is_empty() {
        let frame = frame_4x2();
        assert!(frame.crop(100.0, 100.0, 10.0, 10.0).is_none());
        assert!(frame.crop(0.0, 0.0, 0.0, 0.0).is_none());
    }

    #[test]
    fn test_to_jpeg_produces_nonempty_output() {
        let frame = Frame::new(vec![128u8; 16 * 16 * 3], 16, 16, 1).unwrap();
        let jpeg = frame.to_jpeg(80).unwrap();
        assert!(!jpeg.is_empty());
        // JPEG SOI marker.
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }
}
