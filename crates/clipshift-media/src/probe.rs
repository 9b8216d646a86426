// crates/clipshift-media/src/probe.rs
//
// Media probing: size, frame rate, duration and alpha of a source file.
//
// Order of attempts:
//   1. GIF: walk the frames with the image crate and add up their delays.
//   2. ffprobe (JSON output) under a hard timeout.
//   3. In-process ffmpeg: container duration, falling back to the stream's.
//
// Each step that fails logs why and hands over to the next one.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use serde_json::Value;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;

use clipshift_core::media_types::MediaInfo;
use clipshift_core::PipelineConfig;

use crate::error::{PipelineError, PipelineResult};
use crate::process::output_with_timeout;
use crate::source::video::pixel_has_alpha;

/// GIF frames that declare no delay play at this rate in browsers.
const GIF_DEFAULT_DELAY_MS: f64 = 100.0;
const GIF_FALLBACK_FPS:     f64 = 10.0;

/// Used when a container reports no duration at all.
const MIN_DURATION: f64 = 0.1;

const FFPROBE_DEFAULT_FPS:    f64 = 30.0;
const FFPROBE_DEFAULT_WIDTH:  u32 = 1280;
const FFPROBE_DEFAULT_HEIGHT: u32 = 720;

/// Pixel formats ffprobe reports that carry an alpha plane.
const ALPHA_PIX_FMTS: &[&str] = &[
    "rgba", "bgra", "argb", "abgr", "ya8", "ya16le", "pal8",
    "yuva420p", "yuva422p", "yuva444p", "yuva420p10le", "yuva444p10le",
    "gbrap", "rgba64le", "bgra64le",
];

pub fn probe(path: &Path, config: &PipelineConfig) -> PipelineResult<MediaInfo> {
    if !path.is_file() {
        return Err(PipelineError::unreadable(path, "file not found"));
    }

    let is_gif = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("gif"))
        .unwrap_or(false);
    if is_gif {
        match probe_gif(path) {
            Ok(info) => return Ok(info),
            Err(e)   => log::warn!("[probe] gif walk failed for {}: {e:#}", path.display()),
        }
    }

    match probe_ffprobe(path, config) {
        Ok(info) => return Ok(info),
        Err(e)   => log::debug!("[probe] ffprobe unavailable for {}: {e:#}", path.display()),
    }

    probe_library(path).map_err(|e| PipelineError::unreadable(path, format!("{e:#}")))
}

// ── GIF ───────────────────────────────────────────────────────────────────────

pub fn probe_gif(path: &Path) -> Result<MediaInfo> {
    let decoder = GifDecoder::new(BufReader::new(File::open(path)?))?;
    let mut frames   = 0usize;
    let mut total_ms = 0.0;
    let mut size     = None;
    let mut has_alpha = false;

    for frame in decoder.into_frames() {
        let frame = frame?;
        let (n, d) = frame.delay().numer_denom_ms();
        let ms = if n == 0 { GIF_DEFAULT_DELAY_MS } else { n as f64 / d.max(1) as f64 };
        total_ms += ms;
        if size.is_none() {
            let buf = frame.buffer();
            size = Some(buf.dimensions());
            has_alpha = buf.pixels().any(|p| p[3] < 255);
        }
        frames += 1;
    }

    let (width, height) = size.ok_or_else(|| anyhow!("gif has no frames"))?;
    let duration = if total_ms > 0.0 { total_ms / 1000.0 } else { MIN_DURATION };
    let fps = if duration > 0.0 && frames > 0 { frames as f64 / duration } else { GIF_FALLBACK_FPS };

    log::debug!("[probe] gif {frames} frames {duration:.2}s {fps:.2}fps ← {}", path.display());
    Ok(MediaInfo { width, height, fps, duration, has_alpha })
}

// ── ffprobe ───────────────────────────────────────────────────────────────────

fn probe_ffprobe(path: &Path, config: &PipelineConfig) -> Result<MediaInfo> {
    let mut cmd = Command::new(&config.ffprobe_bin);
    cmd.args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path);

    let out = output_with_timeout(&mut cmd, config.probe_timeout())
        .with_context(|| format!("spawn {}", config.ffprobe_bin.display()))?
        .ok_or_else(|| anyhow!("timed out after {:?}", config.probe_timeout()))?;
    if !out.status.success() {
        bail!("ffprobe exited with {}: {}", out.status, String::from_utf8_lossy(&out.stderr).trim());
    }
    let info = parse_ffprobe_json(&String::from_utf8_lossy(&out.stdout))?;
    log::debug!(
        "[probe] ffprobe {}x{} {:.3}fps {:.2}s ← {}",
        info.width, info.height, info.fps, info.duration, path.display()
    );
    Ok(info)
}

/// `"30000/1001"` → 29.97. A zero denominator or numerator means "unknown".
fn parse_rate(text: &str) -> Option<f64> {
    let (n, d) = text.split_once('/').unwrap_or((text, "1"));
    let n: f64 = n.trim().parse().ok()?;
    let d: f64 = d.trim().parse().ok()?;
    (n > 0.0 && d > 0.0).then(|| n / d)
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _                => None,
    }
}

/// Read `ffprobe -print_format json -show_format -show_streams` output.
/// Missing fields take defaults (30 fps, 1280×720); a file with no video
/// stream is an error.
pub fn parse_ffprobe_json(text: &str) -> Result<MediaInfo> {
    let doc: Value = serde_json::from_str(text).context("ffprobe output is not JSON")?;
    let stream = doc["streams"]
        .as_array()
        .and_then(|s| s.iter().find(|s| s["codec_type"] == "video"))
        .ok_or_else(|| anyhow!("no video stream"))?;

    let dim = |key: &str, default: u32| {
        stream[key].as_u64().filter(|v| *v > 0).map(|v| v as u32).unwrap_or(default)
    };
    let fps = stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_rate)
        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_rate))
        .unwrap_or(FFPROBE_DEFAULT_FPS);
    let duration = number(&doc["format"]["duration"])
        .or_else(|| number(&stream["duration"]))
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(MIN_DURATION);
    let has_alpha = stream["pix_fmt"]
        .as_str()
        .map(|f| ALPHA_PIX_FMTS.contains(&f))
        .unwrap_or(false);

    Ok(MediaInfo {
        width:  dim("width", FFPROBE_DEFAULT_WIDTH),
        height: dim("height", FFPROBE_DEFAULT_HEIGHT),
        fps,
        duration,
        has_alpha,
    })
}

// ── In-process ────────────────────────────────────────────────────────────────

pub fn probe_library(path: &Path) -> Result<MediaInfo> {
    let ictx = input(path)?;
    let stream = ictx.streams().best(Type::Video).ok_or_else(|| anyhow!("no video stream"))?;

    let mut duration = ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64;
    if !(duration.is_finite() && duration > 0.0) {
        // Fall back to stream duration
        let tb = stream.time_base();
        duration = stream.duration() as f64 * tb.numerator() as f64 / tb.denominator().max(1) as f64;
    }
    if !(duration.is_finite() && duration > 0.0) {
        duration = MIN_DURATION;
    }

    let fps = Some(f64::from(stream.avg_frame_rate()))
        .filter(|f| f.is_finite() && *f > 0.0)
        .unwrap_or(FFPROBE_DEFAULT_FPS);

    let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
        .decoder()
        .video()?;
    let (width, height) = (decoder.width(), decoder.height());
    if width == 0 || height == 0 {
        bail!("video stream reports no frame size");
    }
    let has_alpha = pixel_has_alpha(decoder.format());

    log::debug!("[probe] library {width}x{height} {fps:.3}fps {duration:.2}s ← {}", path.display());
    Ok(MediaInfo { width, height, fps, duration, has_alpha })
}
