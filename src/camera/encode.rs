use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, imageops};

use super::{CameraError, Orientation, RawFrame};

/// Orientation fix + JPEG compression for raw frames
#[derive(Debug, Clone, Copy)]
pub struct FrameEncoder {
    orientation: Orientation,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(orientation: Orientation, quality: u8) -> Self {
        Self {
            orientation,
            quality: quality.clamp(1, 100),
        }
    }

    /// Encode a raw frame to JPEG
    ///
    /// The orientation fix is applied in place, so the raw pixels are
    /// consumed; the buffer itself stays in `raw` for reuse either way.
    pub fn encode(&self, raw: &mut RawFrame) -> Result<Vec<u8>, CameraError> {
        let expected = RawFrame::expected_len(raw.width, raw.height);
        if raw.pixels.len() < expected {
            return Err(CameraError::BadDimensions {
                width: raw.width,
                height: raw.height,
                len: raw.pixels.len(),
                expected,
            });
        }

        let len = raw.pixels.len();
        let pixels = std::mem::take(&mut raw.pixels);
        let mut image = RgbImage::from_raw(raw.width, raw.height, pixels).ok_or_else(|| {
            CameraError::BadDimensions {
                width: raw.width,
                height: raw.height,
                len,
                expected,
            }
        })?;

        match self.orientation {
            Orientation::None => {}
            Orientation::FlipHorizontal => imageops::flip_horizontal_in_place(&mut image),
            Orientation::FlipVertical => imageops::flip_vertical_in_place(&mut image),
            Orientation::Rotate180 => imageops::rotate180_in_place(&mut image),
        }

        let mut jpeg = Vec::with_capacity(expected / 8);
        let result = JpegEncoder::new_with_quality(&mut jpeg, self.quality).encode_image(&image);
        raw.pixels = image.into_raw();
        result?;

        Ok(jpeg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RawFrame {
        let mut raw = RawFrame::new(width, height);
        for (i, px) in raw.pixels.chunks_mut(3).enumerate() {
            let x = (i as u32 % width) as u8;
            px.copy_from_slice(&[x.wrapping_mul(8), 0, 255 - x.wrapping_mul(8)]);
        }
        raw
    }

    #[test]
    fn test_encodes_jpeg_and_keeps_buffer() {
        let encoder = FrameEncoder::new(Orientation::Rotate180, 80);
        let mut raw = gradient(32, 16);

        let jpeg = encoder.encode(&mut raw).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(raw.pixels.len(), 32 * 16 * 3);
    }

    #[test]
    fn test_rotation_moves_pixels() {
        let encoder = FrameEncoder::new(Orientation::Rotate180, 80);
        let mut raw = RawFrame::new(2, 1);
        raw.pixels.copy_from_slice(&[1, 2, 3, 4, 5, 6]);

        encoder.encode(&mut raw).unwrap();
        assert_eq!(raw.pixels, vec![4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn test_short_buffer_is_rejected() {
        let encoder = FrameEncoder::new(Orientation::None, 80);
        let mut raw = RawFrame::new(4, 4);
        raw.pixels.truncate(10);

        let err = encoder.encode(&mut raw).unwrap_err();
        assert!(matches!(err, CameraError::BadDimensions { len: 10, .. }));
        assert_eq!(raw.pixels.len(), 10);
    }
}
