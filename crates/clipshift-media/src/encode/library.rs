// crates/clipshift-media/src/encode/library.rs
//
// Frame-by-frame video encode through ffmpeg-the-third.
//
// Used for WebM (VP9), animated WebP and MP4 from image sequences. Every
// format goes through the same LibraryWriter; only VideoCodecSpec differs.
//
// Stream layout: a single video stream 0, no audio.
//
// PTS strategy: output frame counter in 1/fps, starting at 0. Packets are
// rescaled into whatever time base the muxer picked in write_header.
//
// Pixel path: RgbaImage → RGBA VideoFrame → swscale → codec pixel format
// (yuva420p when alpha is kept, yuv420p otherwise).

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::{output as open_output, Pixel};
use ffmpeg::software::scaling::{Context as ScaleCtx, Flags as ScaleFlags};
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::{Dictionary, Packet};

use image::RgbaImage;

use clipshift_core::FormatOptions;

use crate::error::{PipelineError, PipelineResult};
use crate::exec::ExecContext;
use crate::helpers::frame::rgba_to_frame;
use crate::source::FrameSource;

use super::{drop_alpha, for_each_frame};

/// libwebp quality for animated WebP output.
const WEBP_QUALITY: &str = "85";

// ── Codec description ─────────────────────────────────────────────────────────

/// What a format needs from the encoder and muxer.
pub struct VideoCodecSpec {
    /// Tried in order with `encoder::find_by_name`.
    pub encoder_names: &'static [&'static str],
    /// Used when none of the names are available.
    pub fallback:      Option<CodecId>,
    pub pixel:         Pixel,
    /// Bits per second; 0 leaves rate control to the codec options.
    pub bit_rate:      usize,
    pub codec_options: Vec<(&'static str, String)>,
    /// Passed to `write_header_with`.
    pub muxer_options: Vec<(&'static str, String)>,
}

impl VideoCodecSpec {
    pub fn vp9(options: &FormatOptions, alpha: bool) -> Self {
        Self {
            encoder_names: &["libvpx-vp9"],
            fallback:      Some(CodecId::VP9),
            pixel:         if alpha { Pixel::YUVA420P } else { Pixel::YUV420P },
            bit_rate:      options.bitrate_bps(),
            // alt-ref frames are incompatible with an alpha plane in libvpx
            codec_options: vec![("auto-alt-ref", "0".into()), ("deadline", "good".into())],
            muxer_options: Vec::new(),
        }
    }

    pub fn animated_webp(options: &FormatOptions, alpha: bool) -> Self {
        Self {
            encoder_names: &["libwebp_anim", "libwebp"],
            fallback:      None,
            pixel:         if alpha { Pixel::YUVA420P } else { Pixel::YUV420P },
            bit_rate:      0,
            codec_options: vec![("quality", WEBP_QUALITY.into()), ("lossless", "0".into())],
            muxer_options: vec![("loop", options.loop_count.to_string())],
        }
    }

    pub fn h264(options: &FormatOptions) -> Self {
        Self {
            encoder_names: &["libx264"],
            fallback:      Some(CodecId::H264),
            pixel:         Pixel::YUV420P,
            bit_rate:      options.bitrate_bps(),
            codec_options: vec![("preset", "fast".into())],
            muxer_options: Vec::new(),
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// An open output file accepting RGBA frames in display order.
pub struct LibraryWriter {
    octx:     ffmpeg::format::context::Output,
    encoder:  ffmpeg::encoder::video::Video,
    scaler:   ScaleCtx,
    frame_tb: Rational,
    ost_tb:   Rational,
    next_pts: i64,
    width:    u32,
    height:   u32,
}

impl LibraryWriter {
    pub fn create(output: &Path, width: u32, height: u32, fps: u32, spec: &VideoCodecSpec) -> PipelineResult<Self> {
        let fps = fps.max(1) as i32;
        let mut octx = open_output(output)?;
        let codec = spec.encoder_names
            .iter()
            .find_map(|name| encoder::find_by_name(name))
            .or_else(|| spec.fallback.and_then(encoder::find))
            .ok_or_else(|| PipelineError::Encode(format!(
                "no encoder available (tried {})", spec.encoder_names.join(", ")
            )))?;

        let frame_tb = Rational::new(1, fps);
        let mut ost = octx.add_stream(codec)?;
        ost.set_time_base(frame_tb);

        let mut enc = codec::context::Context::new_with_codec(codec).encoder().video()?;
        enc.set_width(width);
        enc.set_height(height);
        enc.set_format(spec.pixel);
        enc.set_time_base(frame_tb);
        enc.set_frame_rate(Some(Rational::new(fps, 1)));
        enc.set_bit_rate(spec.bit_rate);

        let mut opts = Dictionary::new();
        for (k, v) in &spec.codec_options {
            opts.set(k, v);
        }
        let mut encoder = enc.open_as_with(codec, opts)?;
        encoder.set_aspect_ratio(Rational::new(1, 1));

        // encoder::Video has no AsPtr<AVCodecParameters>; copy through FFI.
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
                encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(PipelineError::Encode(format!("avcodec_parameters_from_context failed: {ret}")));
            }
        }

        let mut muxer_opts = Dictionary::new();
        for (k, v) in &spec.muxer_options {
            muxer_opts.set(k, v);
        }
        octx.write_header_with(muxer_opts)?;

        // Muxers may replace the stream time base during write_header.
        let ost_tb = octx
            .stream(0)
            .map(|s| s.time_base())
            .ok_or_else(|| PipelineError::Encode("output stream missing after header".into()))?;

        let scaler = ScaleCtx::get(
            Pixel::RGBA, width, height,
            spec.pixel,  width, height,
            ScaleFlags::BILINEAR,
        )?;

        log::debug!(
            "[encode] library writer {}x{} @ {fps}fps {:?} tb {frame_tb:?} → {ost_tb:?} ← {}",
            width, height, spec.pixel, output.display()
        );

        Ok(Self { octx, encoder, scaler, frame_tb, ost_tb, next_pts: 0, width, height })
    }

    pub fn push(&mut self, image: &RgbaImage) -> PipelineResult<()> {
        if image.dimensions() != (self.width, self.height) {
            return Err(PipelineError::Encode(format!(
                "frame is {}x{}, writer expects {}x{}",
                image.width(), image.height(), self.width, self.height
            )));
        }
        let rgba = rgba_to_frame(image);
        let mut yuv = VideoFrame::empty();
        self.scaler.run(&rgba, &mut yuv)?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;

        self.encoder.send_frame(&yuv)?;
        self.drain()
    }

    fn drain(&mut self) -> PipelineResult<()> {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(0);
            pkt.rescale_ts(self.frame_tb, self.ost_tb);
            pkt.write_interleaved(&mut self.octx)?;
        }
        Ok(())
    }

    /// Flush the encoder and write the trailer. Frames pushed so far are
    /// all that the file will contain.
    pub fn finish(mut self) -> PipelineResult<u64> {
        self.encoder.send_eof()?;
        self.drain()?;
        self.octx.write_trailer()?;
        Ok(self.next_pts as u64)
    }
}

// ── Formats ───────────────────────────────────────────────────────────────────

/// Stream every frame straight into the encoder.
fn encode_streaming(
    source: &dyn FrameSource,
    fps:    u32,
    alpha:  bool,
    spec:   &VideoCodecSpec,
    output: &Path,
    ctx:    &ExecContext,
) -> PipelineResult<()> {
    let (w, h) = source.size();
    let mut writer = LibraryWriter::create(output, w, h, fps, spec)?;
    for_each_frame(source, fps, ctx, |_, mut frame| {
        if !alpha {
            drop_alpha(&mut frame);
        }
        writer.push(&frame)
    })?;
    let frames = writer.finish()?;
    log::debug!("[encode] wrote {frames} frames → {}", output.display());
    Ok(())
}

pub fn write_webm(
    source:  &dyn FrameSource,
    fps:     u32,
    options: &FormatOptions,
    alpha:   bool,
    output:  &Path,
    ctx:     &ExecContext,
) -> PipelineResult<()> {
    encode_streaming(source, fps, alpha, &VideoCodecSpec::vp9(options, alpha), output, ctx)
}

pub fn write_mp4(
    source:  &dyn FrameSource,
    fps:     u32,
    options: &FormatOptions,
    output:  &Path,
    ctx:     &ExecContext,
) -> PipelineResult<()> {
    encode_streaming(source, fps, false, &VideoCodecSpec::h264(options), output, ctx)
}

/// Animated WebP. Frames are collected first and written in one pass, the
/// same as GIF, so a cancelled run never opens the output.
pub fn write_webp(
    source:  &dyn FrameSource,
    fps:     u32,
    options: &FormatOptions,
    alpha:   bool,
    output:  &Path,
    ctx:     &ExecContext,
) -> PipelineResult<()> {
    let mut frames = Vec::new();
    for_each_frame(source, fps, ctx, |_, mut frame| {
        if !alpha {
            drop_alpha(&mut frame);
        }
        frames.push(frame);
        Ok(())
    })?;

    let (w, h) = source.size();
    let mut writer = LibraryWriter::create(output, w, h, fps, &VideoCodecSpec::animated_webp(options, alpha))?;
    for frame in &frames {
        ctx.checkpoint()?;
        writer.push(frame)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_follows_alpha() {
        let opts = FormatOptions::default();
        assert_eq!(VideoCodecSpec::vp9(&opts, true).pixel, Pixel::YUVA420P);
        assert_eq!(VideoCodecSpec::vp9(&opts, false).pixel, Pixel::YUV420P);
        assert_eq!(VideoCodecSpec::h264(&opts).pixel, Pixel::YUV420P);
    }

    #[test]
    fn bitrate_and_loop_reach_the_codec() {
        let opts = FormatOptions { bitrate_mbps: 4.0, loop_count: 2, ..Default::default() };
        assert_eq!(VideoCodecSpec::vp9(&opts, false).bit_rate, 4_000_000);
        let webp = VideoCodecSpec::animated_webp(&opts, true);
        assert_eq!(webp.muxer_options, vec![("loop", "2".to_string())]);
        assert!(webp.codec_options.contains(&("quality", "85".to_string())));
    }
}
