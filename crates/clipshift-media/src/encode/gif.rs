// crates/clipshift-media/src/encode/gif.rs
//
// Animated GIF through the image crate's encoder.
//
// Frames are sampled at the job fps and held in memory until the whole window
// is read, then written in one pass. Each frame lasts `1000 / fps` ms (integer
// milliseconds, as GIF players round anyway).
//
// With transparency kept, pixels with alpha 0 become the GIF transparent
// index; otherwise alpha is forced opaque before quantization.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};

use crate::error::PipelineResult;
use crate::exec::ExecContext;
use crate::source::FrameSource;

use super::{drop_alpha, for_each_frame};

/// NeuQuant sampling factor: 1 is best quality, 30 fastest.
const QUANTIZE_SPEED: i32 = 10;

/// `loop_count` 0 loops forever; GIF caps finite counts at u16.
pub fn repeat_for(loop_count: u32) -> Repeat {
    match loop_count {
        0 => Repeat::Infinite,
        n => Repeat::Finite(n.min(u16::MAX as u32) as u16),
    }
}

pub fn write_gif(
    source:     &dyn FrameSource,
    fps:        u32,
    loop_count: u32,
    alpha:      bool,
    output:     &Path,
    ctx:        &ExecContext,
) -> PipelineResult<()> {
    let delay = Delay::from_numer_denom_ms(1000 / fps.max(1), 1);

    let mut frames = Vec::new();
    for_each_frame(source, fps, ctx, |_, mut img| {
        if !alpha {
            drop_alpha(&mut img);
        }
        frames.push(Frame::from_parts(img, 0, 0, delay));
        Ok(())
    })?;

    log::debug!("[encode] gif: {} frames, {}ms each, loop {loop_count}", frames.len(), 1000 / fps.max(1));

    let writer = BufWriter::new(File::create(output)?);
    let mut encoder = GifEncoder::new_with_speed(writer, QUANTIZE_SPEED);
    encoder.set_repeat(repeat_for(loop_count))?;
    for frame in frames {
        ctx.checkpoint()?;
        encoder.encode_frame(frame)?;
    }
    Ok(())
}
