// crates/clipshift-media/src/source/video.rs
//
// VideoDecoderSource: in-process ffmpeg decode of a video (or animated image)
// file, read as a FrameSource.
//
// A single LiveDecoder is kept open between queries so sequential reads (the
// common case: an encoder walking forward at its own fps) cost one decode per
// source frame instead of an open + seek per request. The decoder is rebuilt
// with a fresh seek when a query goes backwards or jumps more than
// RESEEK_JUMP_SECS ahead.
//
// Hold-frame semantics: frame_at(t) returns the last frame whose pts <= t, so
// a 30 fps reader over a 24 fps file repeats frames rather than skipping
// ahead.
//
// Times are measured from the video stream's start_time, so t = 0 is always
// the first frame even in containers (MPEG-TS, some MOV edits) whose
// timestamps start later.
//
// Only one query runs against the decoder at a time (parking_lot Mutex).

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use image::RgbaImage;
use parking_lot::Mutex;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::frame::video::Video as VideoFrame;

use clipshift_core::media_types::MediaInfo;

use super::{clamp_time, FrameSource};
use crate::error::{PipelineError, PipelineResult};
use crate::helpers::frame::destripe_rgba;
use crate::helpers::seek::seek_to_secs;

/// Forward jumps larger than this re-seek instead of decoding through.
const RESEEK_JUMP_SECS: f64 = 2.0;

/// Slack when comparing frame pts against a requested time.
const PTS_EPSILON: f64 = 1e-4;

// ── Stateful decoder ──────────────────────────────────────────────────────────

struct LiveDecoder {
    ictx:      ffmpeg::format::context::Input,
    decoder:   ffmpeg::decoder::video::Video,
    scaler:    SwsContext,
    video_idx: usize,
    tb_num:    i32,
    tb_den:    i32,
    /// Stream start_time in time-base units; 0 when the container has none.
    start_pts: i64,
    width:     u32,
    height:    u32,
    last_pts:  i64,
    drained:   bool,
    /// Last frame handed out or passed over, with its time in seconds.
    current:   Option<(f64, RgbaImage)>,
    /// First frame decoded past the last request.
    pending:   Option<(f64, RgbaImage)>,
}

// SAFETY: every ffmpeg handle inside is owned exclusively by this struct and
// only touched through `&mut self`; VideoDecoderSource keeps it behind a Mutex.
unsafe impl Send for LiveDecoder {}

impl LiveDecoder {
    fn open(path: &Path, t: f64) -> Result<Self> {
        let mut ictx = input(path)?;
        let video_idx = ictx.streams().best(Type::Video)
            .ok_or_else(|| anyhow!("no video stream"))?.index();

        let (tb_num, tb_den, start_pts) = {
            let stream = ictx.stream(video_idx).ok_or_else(|| anyhow!("stream gone"))?;
            let tb = stream.time_base();
            (tb.numerator(), tb.denominator().max(1), stream_origin(stream.start_time()))
        };

        let origin_secs = pts_to_secs(start_pts, 0, tb_num, tb_den);
        seek_to_secs(&mut ictx, seek_target(t, origin_secs), "frame source");

        // Second context for decoder params (Parameters borrows from ictx).
        let ictx2   = input(path)?;
        let stream2 = ictx2.stream(video_idx).ok_or_else(|| anyhow!("stream gone"))?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())?
            .decoder()
            .video()?;

        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            bail!("video stream reports no frame size");
        }

        let scaler = SwsContext::get(
            decoder.format(), width, height,
            Pixel::RGBA, width, height, Flags::BILINEAR,
        )?;

        Ok(Self {
            ictx, decoder, scaler, video_idx, tb_num, tb_den, start_pts, width, height,
            last_pts: -1, drained: false, current: None, pending: None,
        })
    }

    /// Pull one already-decoded frame out of the decoder, if it has one.
    fn receive(&mut self) -> Result<Option<(f64, RgbaImage)>> {
        let mut decoded = VideoFrame::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let pts = decoded.pts().unwrap_or(self.last_pts + 1);
        self.last_pts = pts;

        let mut out = VideoFrame::empty();
        self.scaler.run(&decoded, &mut out)?;
        let image = destripe_rgba(&out, self.width, self.height)?;
        Ok(Some((pts_to_secs(pts, self.start_pts, self.tb_num, self.tb_den), image)))
    }

    /// Next frame in decode order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<(f64, RgbaImage)>> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.drained {
                return Ok(None);
            }
            let mut fed = false;
            for (stream, packet) in self.ictx.packets().flatten() {
                if stream.index() != self.video_idx { continue; }
                if self.decoder.send_packet(&packet).is_ok() {
                    fed = true;
                    break;
                }
            }
            if !fed {
                let _ = self.decoder.send_eof();
                self.drained = true;
            }
        }
    }

    /// Last frame with pts <= `t`. Before the first decoded frame (seek
    /// landed late) the earliest available frame is returned instead.
    fn frame_at(&mut self, t: f64) -> Result<Option<RgbaImage>> {
        loop {
            match self.pending.as_ref().map(|(pts, _)| *pts) {
                Some(pts) if pts > t + PTS_EPSILON => break,
                Some(_) => self.current = self.pending.take(),
                None    => {}
            }
            match self.next_frame()? {
                Some(frame) => self.pending = Some(frame),
                None        => break,
            }
        }
        Ok(self.current.as_ref().or(self.pending.as_ref()).map(|(_, img)| img.clone()))
    }

    /// Time of the frame most recently returned.
    fn position(&self) -> Option<f64> {
        self.current.as_ref().map(|(pts, _)| *pts)
    }
}

/// A stream's start_time, with "not set" read as 0.
fn stream_origin(start_time: i64) -> i64 {
    if start_time == ffmpeg::ffi::AV_NOPTS_VALUE { 0 } else { start_time }
}

/// Seconds since the stream origin for a frame at `pts`.
fn pts_to_secs(pts: i64, start_pts: i64, tb_num: i32, tb_den: i32) -> f64 {
    pts.saturating_sub(start_pts) as f64 * tb_num as f64 / tb_den.max(1) as f64
}

/// Container seek position for source time `t`. The demuxer seeks in
/// absolute time, so the stream origin is added back.
fn seek_target(t: f64, origin_secs: f64) -> f64 {
    if t > 0.0 { t + origin_secs } else { 0.0 }
}

pub(crate) fn pixel_has_alpha(fmt: Pixel) -> bool {
    matches!(
        fmt,
        Pixel::RGBA | Pixel::BGRA | Pixel::ARGB | Pixel::ABGR
            | Pixel::YUVA420P | Pixel::YUVA422P | Pixel::YUVA444P
            | Pixel::YA8 | Pixel::PAL8
    )
}

// ── FrameSource ───────────────────────────────────────────────────────────────

pub struct VideoDecoderSource {
    path:      PathBuf,
    width:     u32,
    height:    u32,
    fps:       f64,
    duration:  f64,
    has_alpha: bool,
    live:      Mutex<Option<LiveDecoder>>,
}

impl VideoDecoderSource {
    /// Open `path`. When `known` carries a positive duration (from analysis)
    /// it is used as-is; otherwise the container is asked.
    pub fn open(path: &Path, known: Option<MediaInfo>) -> PipelineResult<Self> {
        let live = LiveDecoder::open(path, 0.0).map_err(|e| PipelineError::unreadable(path, e))?;

        let (container_secs, fps) = {
            let secs = live.ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
            let fps  = live.ictx.stream(live.video_idx)
                .map(|s| f64::from(s.avg_frame_rate()))
                .filter(|f| f.is_finite() && *f > 0.0)
                .unwrap_or(0.0);
            (secs, fps)
        };
        let duration = known
            .map(|m| m.duration)
            .filter(|d| d.is_finite() && *d > 0.0)
            .unwrap_or(container_secs);
        if !(duration.is_finite() && duration > 0.0) {
            return Err(PipelineError::unreadable(path, "duration unknown"));
        }
        let fps = known.map(|m| m.fps).filter(|f| *f > 0.0).unwrap_or(fps);
        let has_alpha = pixel_has_alpha(live.decoder.format());

        log::debug!(
            "[probe] decoder {}x{} {fps:.3}fps {duration:.2}s alpha={has_alpha} ← {}",
            live.width, live.height, path.display()
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: live.width,
            height: live.height,
            fps,
            duration,
            has_alpha,
            live: Mutex::new(Some(live)),
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// Native frame rate, or 0 when the container does not say.
    pub fn fps(&self) -> f64 { self.fps }

    fn decode_at(&self, t: f64) -> Result<RgbaImage> {
        let mut guard = self.live.lock();

        let reseek = match guard.as_ref().and_then(LiveDecoder::position) {
            Some(pos) => t + PTS_EPSILON < pos || t - pos > RESEEK_JUMP_SECS,
            None      => guard.is_none(),
        };
        if reseek {
            log::debug!("[probe] reseek to {t:.3}s ← {}", self.path.display());
            *guard = Some(LiveDecoder::open(&self.path, t)?);
        }

        let live = guard.as_mut().ok_or_else(|| anyhow!("decoder unavailable"))?;
        let frame = live.frame_at(t)?.ok_or_else(|| anyhow!("no frame decoded at {t:.3}s"))?;
        if frame.dimensions() != (self.width, self.height) {
            return Ok(image::imageops::resize(
                &frame, self.width, self.height, image::imageops::FilterType::Triangle,
            ));
        }
        Ok(frame)
    }
}

impl FrameSource for VideoDecoderSource {
    fn duration(&self) -> f64 { self.duration }

    fn size(&self) -> (u32, u32) { (self.width, self.height) }

    fn has_alpha(&self) -> bool { self.has_alpha }

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        let t = clamp_time(t, self.duration);
        let mut frame = self.decode_at(t).map_err(|e| PipelineError::unreadable(&self.path, e))?;
        if !self.has_alpha {
            for px in frame.pixels_mut() {
                px[3] = 255;
            }
        }
        Ok(frame)
    }
}
