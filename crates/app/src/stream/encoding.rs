//! JPEG encoding of raw capture frames.

use actix_web::web::Bytes;
use anyhow::{Result, anyhow, bail};
use image::{ImageBuffer, Rgb, codecs::jpeg::JpegEncoder};
use video_ingest::{Frame, FrameFormat};

pub(crate) struct FrameEncoder {
    quality: u8,
}

impl FrameEncoder {
    pub(crate) fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    /// Encode `frame` into a self-contained JPEG image.
    pub(crate) fn encode(&self, frame: &Frame) -> Result<Bytes> {
        if frame.width <= 0 || frame.height <= 0 {
            bail!("frame has no pixels ({}x{})", frame.width, frame.height);
        }
        if frame.data.len() != frame.expected_len() {
            bail!(
                "frame payload is {} bytes, expected {} for {}x{}",
                frame.data.len(),
                frame.expected_len(),
                frame.width,
                frame.height
            );
        }

        let rgb = match frame.format {
            FrameFormat::Bgr8 => bgr_to_rgb(&frame.data),
        };
        let image =
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(frame.width as u32, frame.height as u32, rgb)
                .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))?;

        let mut buffer = Vec::with_capacity(frame.data.len() / 8);
        JpegEncoder::new_with_quality(&mut buffer, self.quality)
            .encode_image(&image)
            .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
        Ok(Bytes::from(buffer))
    }
}

fn bgr_to_rgb(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks_exact(3) {
        output.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
    }
    output
}

#[cfg(test)]
mod tests {
    use video_ingest::{CameraDevice, TestPattern};

    use super::*;

    #[test]
    fn encodes_a_decodable_jpeg() {
        let frame = TestPattern::new(64, 48).read_frame().unwrap();
        let jpeg = FrameEncoder::new(85).encode(&frame).unwrap();

        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
    }

    #[test]
    fn rejects_truncated_frames() {
        let mut frame = TestPattern::new(16, 16).read_frame().unwrap();
        frame.data.truncate(10);
        assert!(FrameEncoder::new(85).encode(&frame).is_err());
    }

    #[test]
    fn swaps_channel_order() {
        assert_eq!(bgr_to_rgb(&[1, 2, 3, 4, 5, 6]), vec![3, 2, 1, 6, 5, 4]);
    }
}
