// crates/clipshift-media/src/source/mod.rs
//
// FrameSource: the one read interface every encoder consumes.
//
// Leaves are SequenceSource (still images on disk) and VideoDecoderSource
// (in-process ffmpeg decode). Transform stages wrap any FrameSource and are
// FrameSources themselves, so encoders never branch on what they are reading.
//
// Frames are always RGBA8. Sources without alpha return alpha = 255.

pub mod sequence;
pub mod transform;
pub mod video;

use std::sync::Arc;

use image::RgbaImage;

use clipshift_core::job::JobSource;
use clipshift_core::media_types::MediaInfo;

use crate::error::PipelineResult;

pub use sequence::SequenceSource;
pub use transform::build_stack;
pub use video::VideoDecoderSource;

/// Out-of-range times clamp to `[0, duration - TIME_EPSILON]`.
pub const TIME_EPSILON: f64 = 1e-3;

pub trait FrameSource: Send + Sync {
    /// Seconds.
    fn duration(&self) -> f64;

    /// Every frame returned by `frame_at` has exactly this size.
    fn size(&self) -> (u32, u32);

    /// Fixed for the lifetime of the source.
    fn has_alpha(&self) -> bool;

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn duration(&self) -> f64 { (**self).duration() }
    fn size(&self) -> (u32, u32) { (**self).size() }
    fn has_alpha(&self) -> bool { (**self).has_alpha() }
    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> { (**self).frame_at(t) }
}

impl<S: FrameSource + ?Sized> FrameSource for Arc<S> {
    fn duration(&self) -> f64 { (**self).duration() }
    fn size(&self) -> (u32, u32) { (**self).size() }
    fn has_alpha(&self) -> bool { (**self).has_alpha() }
    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> { (**self).frame_at(t) }
}

/// Clamp `t` into the readable range of a `duration`-long source.
///
/// ```
/// use clipshift_media::source::clamp_time;
/// assert_eq!(clamp_time(-1.0, 10.0), 0.0);
/// assert_eq!(clamp_time(4.0, 10.0), 4.0);
/// assert!(clamp_time(99.0, 10.0) < 10.0);
/// ```
pub fn clamp_time(t: f64, duration: f64) -> f64 {
    let hi = (duration - TIME_EPSILON).max(0.0);
    if t.is_finite() { t.clamp(0.0, hi) } else { 0.0 }
}

/// Open the leaf source a job reads from. `media` is the analysis result if
/// one exists; file sources reuse its duration instead of trusting the
/// container header again.
pub fn open_source(source: &JobSource, media: Option<MediaInfo>) -> PipelineResult<Arc<dyn FrameSource>> {
    match source {
        JobSource::Sequence { paths, fps } => Ok(Arc::new(SequenceSource::new(paths.clone(), *fps)?)),
        JobSource::File { path }           => Ok(Arc::new(VideoDecoderSource::open(path, media)?)),
    }
}

/// Source info in the shape analysis reports it.
pub fn describe(source: &dyn FrameSource, fps: f64) -> MediaInfo {
    let (width, height) = source.size();
    MediaInfo { width, height, fps, duration: source.duration(), has_alpha: source.has_alpha() }
}
