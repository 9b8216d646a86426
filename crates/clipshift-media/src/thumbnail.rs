// crates/clipshift-media/src/thumbnail.rs
//
// Queue previews: a 160×90-bounded opaque RGBA thumbnail, graded when the
// job's grade is active.
//
// Sequences read their frame straight from disk. File sources first ask the
// external ffmpeg for a single PNG over a pipe (fast, and it handles every
// container ffmpeg does) under a hard timeout, then fall back to the
// in-process decoder.

use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use image::{imageops, imageops::FilterType, RgbaImage};

use clipshift_core::grade::{apply_grade, GradeSettings};
use clipshift_core::helpers::geometry::fit_within;
use clipshift_core::job::{JobSource, Thumbnail};
use clipshift_core::media_types::MediaInfo;
use clipshift_core::PipelineConfig;

use crate::error::PipelineResult;
use crate::process::output_with_timeout;
use crate::source::{FrameSource, SequenceSource, VideoDecoderSource};

pub const THUMB_W: u32 = 160;
pub const THUMB_H: u32 = 90;

/// Analysis grabs this far in, past any black lead-in frame.
pub const ANALYSIS_TIME: f64 = 0.1;

/// Shrink `frame` into the thumbnail box, force it opaque and grade it.
pub fn make_thumbnail(frame: &RgbaImage, grade: &GradeSettings) -> Thumbnail {
    let (w, h) = fit_within(frame.width(), frame.height(), THUMB_W, THUMB_H);
    let mut small = if (w, h) == frame.dimensions() {
        frame.clone()
    } else {
        imageops::resize(frame, w, h, FilterType::Lanczos3)
    };
    for px in small.pixels_mut() {
        px[3] = 255;
    }
    if grade.is_active() {
        apply_grade(&mut small, grade);
    }
    Thumbnail { width: w, height: h, data: small.into_raw() }
}

/// Thumbnail of `source` at `at` seconds.
pub fn capture(
    source: &JobSource,
    at:     f64,
    grade:  &GradeSettings,
    media:  Option<MediaInfo>,
    config: &PipelineConfig,
) -> PipelineResult<Thumbnail> {
    let frame = match source {
        JobSource::Sequence { paths, fps } => SequenceSource::new(paths.clone(), *fps)?.frame_at(at)?,
        JobSource::File { path } => match grab_external(path, at, config) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("[probe] ffmpeg thumbnail failed for {}: {e:#}", path.display());
                VideoDecoderSource::open(path, media)?.frame_at(at)?
            }
        },
    };
    Ok(make_thumbnail(&frame, grade))
}

/// One frame at `at` as a PNG on ffmpeg's stdout, already scaled to the
/// thumbnail width.
fn grab_external(path: &Path, at: f64, config: &PipelineConfig) -> Result<RgbaImage> {
    let mut cmd = Command::new(&config.ffmpeg_bin);
    cmd.args(["-v", "error", "-nostdin", "-ss", &format!("{at:.3}"), "-i"])
        .arg(path)
        .args(["-vframes", "1", "-an", "-sn"])
        .args(["-vf", &format!("scale={THUMB_W}:-1")])
        .args(["-f", "image2pipe", "-vcodec", "png", "-"]);

    let out = output_with_timeout(&mut cmd, config.thumbnail_timeout())
        .with_context(|| format!("spawn {}", config.ffmpeg_bin.display()))?
        .ok_or_else(|| anyhow!("timed out after {:?}", config.thumbnail_timeout()))?;
    if !out.status.success() || out.stdout.is_empty() {
        bail!("ffmpeg exited with {}: {}", out.status, String::from_utf8_lossy(&out.stderr).trim());
    }
    Ok(image::load_from_memory(&out.stdout)?.to_rgba8())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::path::PathBuf;

    #[test]
    fn wide_frames_fit_the_box_and_lose_alpha() {
        let frame = RgbaImage::from_pixel(640, 360, Rgba([10, 20, 30, 0]));
        let t = make_thumbnail(&frame, &GradeSettings::default());
        assert_eq!((t.width, t.height), (160, 90));
        assert_eq!(t.data.len(), 160 * 90 * 4);
        assert!(t.data.chunks_exact(4).all(|px| px[3] == 255));
    }

    #[test]
    fn small_frames_are_not_enlarged() {
        let frame = RgbaImage::from_pixel(40, 30, Rgba([1, 2, 3, 255]));
        let t = make_thumbnail(&frame, &GradeSettings::default());
        assert_eq!((t.width, t.height), (40, 30));
        assert_eq!(&t.data[..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn active_grade_changes_the_preview() {
        let frame = RgbaImage::from_pixel(16, 9, Rgba([100, 100, 100, 255]));
        let bright = GradeSettings { enabled: true, exposure: 50.0, ..Default::default() };
        let t = make_thumbnail(&frame, &bright);
        assert!(t.data[0] > 100);
    }

    #[test]
    fn sequence_thumbnail_reads_the_requested_frame() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<PathBuf> = (0..3u8)
            .map(|i| {
                let p = dir.path().join(format!("f_{i:03}.png"));
                RgbaImage::from_pixel(32, 18, Rgba([i * 100, 0, 0, 255])).save(&p).unwrap();
                p
            })
            .collect();
        let source = JobSource::Sequence { paths, fps: 1.0 };
        let t = capture(&source, 2.0, &GradeSettings::default(), None, &PipelineConfig::default()).unwrap();
        assert_eq!((t.width, t.height), (32, 18));
        assert_eq!(t.data[0], 200);
    }
}
