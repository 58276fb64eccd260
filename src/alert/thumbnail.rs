use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::frame::Frame;

/// JPEG quality used for alert thumbnails unless configured otherwise.
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 80;

/// Encode a BGR frame as JPEG at the given quality (1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let rgb: Vec<u8> = frame
        .pixels()
        .chunks_exact(3)
        .flat_map(|bgr| [bgr[2], bgr[1], bgr[0]])
        .collect();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(&rgb, frame.width, frame.height, ExtendedColorType::Rgb8)
        .context("encode jpeg thumbnail")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_jpeg_with_markers() -> Result<()> {
        let frame = Frame::new(vec![128u8; 16 * 16 * 3], 16, 16)?;
        let jpeg = encode_jpeg(&frame, DEFAULT_THUMBNAIL_QUALITY)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn decoded_thumbnail_keeps_dimensions_and_color() -> Result<()> {
        // Pure blue in BGR order.
        let data = [255u8, 0, 0].repeat(8 * 8);
        let frame = Frame::new(data, 8, 8)?;
        let jpeg = encode_jpeg(&frame, 95)?;
        let decoded = image::load_from_memory(&jpeg)?.into_rgb8();
        assert_eq!(decoded.dimensions(), (8, 8));
        let px = decoded.get_pixel(4, 4).0;
        assert!(px[2] > 200 && px[0] < 60, "expected blue, got {:?}", px);
        Ok(())
    }
}
