//! Frame to input-tensor conversion.

use std::borrow::Cow;

use anyhow::{Context, Result};
use fast_image_resize as fr;

use super::tensor::Tensor;
use crate::frame::{Frame, CHANNELS};

/// Resize (bilinear), swap BGR to RGB, scale to [0, 1] and lay out as
/// `(1, 3, height, width)`.
///
/// The resize runs on the BGR buffer with a fixed-support bilinear kernel and
/// half-pixel centres, so downscaling interpolates between the two nearest
/// source pixels instead of averaging the covered area. The channel swap
/// happens while the tensor is filled.
pub fn preprocess(frame: &Frame, height: u32, width: u32) -> Result<Tensor> {
    let pixels: Cow<'_, [u8]> = if (frame.width, frame.height) == (width, height) {
        Cow::Borrowed(frame.pixels())
    } else {
        Cow::Owned(resize_bilinear(frame, width, height)?)
    };

    let row = width as usize * CHANNELS;
    Ok(Tensor::from_shape_fn4(
        [1, 3, height as usize, width as usize],
        |(_, channel, y, x)| {
            // channel 0 = red = BGR index 2
            pixels[y * row + x * CHANNELS + (2 - channel)] as f32 / 255.0
        },
    ))
}

fn resize_bilinear(frame: &Frame, width: u32, height: u32) -> Result<Vec<u8>> {
    // U8x3 is channel-order agnostic; the bytes stay BGR.
    let src = fr::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.pixels().to_vec(),
        fr::PixelType::U8x3,
    )
    .context("wrap frame for resize")?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);
    fr::Resizer::new()
        .resize(
            &src,
            &mut dst,
            &fr::ResizeOptions::new()
                .resize_alg(fr::ResizeAlg::Interpolation(fr::FilterType::Bilinear)),
        )
        .with_context(|| {
            format!(
                "resize {}x{} frame to {}x{}",
                frame.width, frame.height, width, height
            )
        })?;
    Ok(dst.into_vec())
}
