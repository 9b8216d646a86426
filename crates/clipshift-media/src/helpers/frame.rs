// crates/clipshift-media/src/helpers/frame.rs
//
// Moving pixels between packed RGBA images and strided ffmpeg frames.
// ffmpeg rows may carry padding past `width * 4`; the image crate's never do.

use anyhow::{anyhow, Result};
use image::RgbaImage;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;

/// Copy visible pixels out of an RGBA frame, dropping stride padding.
pub fn destripe_rgba(frame: &VideoFrame, width: u32, height: u32) -> Result<RgbaImage> {
    let stride    = frame.stride(0);
    let raw       = frame.data(0);
    let row_bytes = width as usize * 4;
    let data: Vec<u8> = (0..height as usize)
        .flat_map(|row| &raw[row * stride..row * stride + row_bytes])
        .copied()
        .collect();
    RgbaImage::from_raw(width, height, data).ok_or_else(|| anyhow!("scaled frame size mismatch"))
}

/// New RGBA frame holding `image`, row by row into the frame's stride.
pub fn rgba_to_frame(image: &RgbaImage) -> VideoFrame {
    let (w, h) = image.dimensions();
    let mut frame = VideoFrame::new(Pixel::RGBA, w, h);
    let stride    = frame.stride(0);
    let row_bytes = w as usize * 4;
    let src       = image.as_raw();
    let dst       = frame.data_mut(0);
    for row in 0..h as usize {
        dst[row * stride..row * stride + row_bytes]
            .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
    }
    frame
}
