// crates/clipshift-media/src/encode/mod.rs
//
// EncodeTarget: one strategy per export format.
//
// Two execution paths:
//   • In-process: open the leaf FrameSource, wrap it in the transform stack,
//     pull frames at the job fps and hand them to a writer (gif.rs, still.rs,
//     library.rs).
//   • Direct: MP4 from a plain file goes straight to an external ffmpeg
//     process with an equivalent filter chain (direct.rs). Nothing is decoded
//     here; the process keeps the source's native timestamps.
//
// Dispatch is an explicit enum picked from (format, source kind). Writers only
// ever see a FrameSource, never the job's source type.
//
// Output naming: `name.ext`, then `name_1.ext`, `name_2.ext`, … until a path
// is free. Sequence output is a directory picked the same way.

pub mod direct;
pub mod gif;
pub mod library;
pub mod still;

use std::path::{Path, PathBuf};

use image::RgbaImage;

use clipshift_core::{ConversionJob, ExportFormat, JobSource, PipelineConfig};

use crate::error::{PipelineError, PipelineResult};
use crate::exec::ExecContext;
use crate::source::{build_stack, open_source, FrameSource};

/// Slack added to `duration * fps` before flooring, so a 3 s window at 10 fps
/// yields 30 frames even when the product lands on 29.999….
const FRAME_COUNT_EPSILON: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeTarget {
    Gif,
    WebP,
    WebM,
    /// External ffmpeg against the original file.
    Mp4Direct,
    /// Frame-by-frame libx264; used for sequence sources.
    Mp4Library,
    Sequence,
    Thumbnail,
}

impl EncodeTarget {
    pub fn for_job(job: &ConversionJob) -> Self {
        match (job.format, &job.source) {
            (ExportFormat::Gif, _)                     => Self::Gif,
            (ExportFormat::WebP, _)                    => Self::WebP,
            (ExportFormat::WebM, _)                    => Self::WebM,
            (ExportFormat::Mp4, JobSource::File { .. }) => Self::Mp4Direct,
            (ExportFormat::Mp4, JobSource::Sequence { .. }) => Self::Mp4Library,
            (ExportFormat::Sequence, _)                => Self::Sequence,
            (ExportFormat::Thumbnail, _)               => Self::Thumbnail,
        }
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Mp4Direct)
    }
}

// ── Frame timing ──────────────────────────────────────────────────────────────

/// Output frame times `i / fps` covering `[0, duration)`.
///
/// ```
/// use clipshift_media::encode::frame_times;
/// let t = frame_times(3.0, 10);
/// assert_eq!(t.len(), 30);
/// assert_eq!(t[29], 2.9);
/// assert_eq!(frame_times(0.05, 10).len(), 1);
/// assert!(frame_times(0.0, 10).is_empty());
/// ```
pub fn frame_times(duration: f64, fps: u32) -> Vec<f64> {
    if !(duration.is_finite() && duration > 0.0) || fps == 0 {
        return Vec::new();
    }
    let fps = fps as f64;
    // A non-empty window always produces at least one frame.
    let n = ((duration * fps + FRAME_COUNT_EPSILON).floor() as usize).max(1);
    (0..n).map(|i| i as f64 / fps).collect()
}

/// Pull every output frame from `source` in time order, honoring pause and
/// cancel before each one and reporting progress after it.
pub fn for_each_frame<F>(source: &dyn FrameSource, fps: u32, ctx: &ExecContext, mut f: F) -> PipelineResult<usize>
where
    F: FnMut(usize, RgbaImage) -> PipelineResult<()>,
{
    let times = frame_times(source.duration(), fps);
    if times.is_empty() {
        return Err(PipelineError::Validation(format!(
            "nothing to encode: {:.3}s at {fps}fps", source.duration()
        )));
    }
    let total = times.len();
    for (i, t) in times.into_iter().enumerate() {
        ctx.checkpoint()?;
        let frame = source.frame_at(t)?;
        f(i, frame)?;
        ctx.report_frames(i + 1, total);
    }
    Ok(total)
}

/// Set every alpha to 255, keeping color as-is.
pub fn drop_alpha(frame: &mut RgbaImage) {
    for px in frame.pixels_mut() {
        px[3] = 255;
    }
}

// ── Output paths ──────────────────────────────────────────────────────────────

/// First of `dir/stem.ext`, `dir/stem_1.ext`, `dir/stem_2.ext`, … that does
/// not exist yet. `ext` includes the dot, or is empty for directories.
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let first = dir.join(format!("{stem}{ext}"));
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|i| dir.join(format!("{stem}_{i}{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Run one job to completion. Returns the output path (a directory for
/// Sequence). Blocking; call from a worker thread.
pub fn run_job(
    job:     &ConversionJob,
    out_dir: &Path,
    ctx:     &ExecContext,
    config:  &PipelineConfig,
) -> PipelineResult<PathBuf> {
    ctx.checkpoint()?;
    std::fs::create_dir_all(out_dir)?;

    let target      = EncodeTarget::for_job(job);
    let (stem, ext) = job.output_name();
    let output      = unique_path(out_dir, &stem, ext);
    log::info!("[encode] {} → {} ({target:?})", job.name, output.display());

    if target.is_direct() {
        direct::encode(job, &output, ctx, config)?;
    } else {
        let leaf  = open_source(&job.source, job.media)?;
        let stack = build_stack(leaf, job);
        encode_source(target, stack.as_ref(), job, &output, ctx)?;
    }

    ctx.report(1.0);
    log::info!("[encode] done {}", output.display());
    Ok(output)
}

/// In-process encode of an already-built stack.
pub fn encode_source(
    target: EncodeTarget,
    source: &dyn FrameSource,
    job:    &ConversionJob,
    output: &Path,
    ctx:    &ExecContext,
) -> PipelineResult<()> {
    let alpha = job.wants_alpha(source.has_alpha());
    match target {
        EncodeTarget::Gif        => gif::write_gif(source, job.fps, job.options.loop_count, alpha, output, ctx),
        EncodeTarget::WebP       => library::write_webp(source, job.fps, &job.options, alpha, output, ctx),
        EncodeTarget::WebM       => library::write_webm(source, job.fps, &job.options, alpha, output, ctx),
        EncodeTarget::Mp4Library => library::write_mp4(source, job.fps, &job.options, output, ctx),
        EncodeTarget::Sequence   => still::write_sequence(source, job.fps, job.options.still_format, alpha, output, ctx).map(|_| ()),
        EncodeTarget::Thumbnail  => still::write_thumbnail(source, job.options.still_format, alpha, output, ctx),
        EncodeTarget::Mp4Direct  => Err(PipelineError::Validation(
            "direct MP4 needs the source file, not a frame source".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn mp4_path_depends_on_source_kind() {
        let file = ConversionJob::new(JobSource::File { path: PathBuf::from("a.mov") }, ExportFormat::Mp4);
        assert_eq!(EncodeTarget::for_job(&file), EncodeTarget::Mp4Direct);

        let seq = ConversionJob::new(
            JobSource::Sequence { paths: vec![PathBuf::from("a_1.png")], fps: 24.0 },
            ExportFormat::Mp4,
        );
        assert_eq!(EncodeTarget::for_job(&seq), EncodeTarget::Mp4Library);
    }

    #[test]
    fn frame_count_survives_float_products() {
        assert_eq!(frame_times(2.9, 10).len(), 29);
        assert_eq!(frame_times(10.0 / 3.0, 3).len(), 10);
        assert!(frame_times(1.0, 0).is_empty());
    }

    #[test]
    fn unique_path_counts_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let a = unique_path(dir.path(), "clip", ".gif");
        assert!(a.ends_with("clip.gif"));
        std::fs::write(&a, b"x").unwrap();
        let b = unique_path(dir.path(), "clip", ".gif");
        assert!(b.ends_with("clip_1.gif"));
        std::fs::write(&b, b"x").unwrap();
        assert!(unique_path(dir.path(), "clip", ".gif").ends_with("clip_2.gif"));

        std::fs::create_dir(dir.path().join("walk")).unwrap();
        assert!(unique_path(dir.path(), "walk", "").ends_with("walk_1"));
    }
}
