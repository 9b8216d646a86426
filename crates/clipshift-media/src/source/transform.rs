// crates/clipshift-media/src/source/transform.rs
//
// ClipTransformStack: trim → crop → resize → grade, each stage a FrameSource
// wrapping the previous one.
//
// Times passed to the top of the stack are relative to the trim window. Only
// Trim rewrites time; the other stages are per-frame pixel operations.

use std::sync::Arc;

use image::{imageops::FilterType, RgbaImage};

use clipshift_core::crop::PixelRect;
use clipshift_core::grade::{apply_grade, GradeSettings};
use clipshift_core::helpers::geometry::scaled_height;
use clipshift_core::ConversionJob;

use super::{clamp_time, FrameSource};
use crate::error::PipelineResult;

// ── Geometry ──────────────────────────────────────────────────────────────────

/// Pixel geometry a job produces from a `source_w × source_h` input. Shared
/// by the in-process stack and the external filter chain so both paths crop
/// and scale identically.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputGeometry {
    /// `None` when cropping is off or the region covers the whole frame.
    pub crop:   Option<PixelRect>,
    pub width:  u32,
    pub height: u32,
}

impl OutputGeometry {
    pub fn for_job(job: &ConversionJob, source_w: u32, source_h: u32) -> Self {
        let crop = (job.crop_enabled && !job.crop.is_full())
            .then(|| job.crop.to_pixels(source_w, source_h));
        let (cw, ch) = crop.map(|r| (r.width, r.height)).unwrap_or((source_w, source_h));
        // yuv420p needs both sides even.
        let width  = job.width.max(2) & !1;
        let height = scaled_height(cw, ch, width);
        Self { crop, width, height }
    }
}

// ── Stages ────────────────────────────────────────────────────────────────────

/// `[start, end)` of the inner source, re-based to start at 0.
pub struct Trim<S> {
    inner: S,
    start: f64,
    end:   f64,
}

impl<S: FrameSource> Trim<S> {
    pub fn new(inner: S, start: f64, end: f64) -> Self {
        let start = start.max(0.0);
        Self { inner, start, end: end.max(start) }
    }
}

impl<S: FrameSource> FrameSource for Trim<S> {
    fn duration(&self) -> f64 { self.end - self.start }
    fn size(&self) -> (u32, u32) { self.inner.size() }
    fn has_alpha(&self) -> bool { self.inner.has_alpha() }

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        self.inner.frame_at(self.start + clamp_time(t, self.duration()))
    }
}

pub struct Crop<S> {
    inner: S,
    rect:  PixelRect,
}

impl<S: FrameSource> Crop<S> {
    pub fn new(inner: S, rect: PixelRect) -> Self { Self { inner, rect } }
}

impl<S: FrameSource> FrameSource for Crop<S> {
    fn duration(&self) -> f64 { self.inner.duration() }
    fn size(&self) -> (u32, u32) { (self.rect.width, self.rect.height) }
    fn has_alpha(&self) -> bool { self.inner.has_alpha() }

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        let frame = self.inner.frame_at(t)?;
        let r = self.rect;
        Ok(image::imageops::crop_imm(&frame, r.x, r.y, r.width, r.height).to_image())
    }
}

/// Lanczos resize to a fixed output size.
pub struct Resize<S> {
    inner:  S,
    width:  u32,
    height: u32,
}

impl<S: FrameSource> Resize<S> {
    pub fn new(inner: S, width: u32, height: u32) -> Self { Self { inner, width, height } }
}

impl<S: FrameSource> FrameSource for Resize<S> {
    fn duration(&self) -> f64 { self.inner.duration() }
    fn size(&self) -> (u32, u32) { (self.width, self.height) }
    fn has_alpha(&self) -> bool { self.inner.has_alpha() }

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        let frame = self.inner.frame_at(t)?;
        if frame.dimensions() == (self.width, self.height) {
            return Ok(frame);
        }
        Ok(image::imageops::resize(&frame, self.width, self.height, FilterType::Lanczos3))
    }
}

/// Per-frame color grade. Alpha is never touched.
pub struct Grade<S> {
    inner:    S,
    settings: GradeSettings,
}

impl<S: FrameSource> Grade<S> {
    pub fn new(inner: S, settings: GradeSettings) -> Self { Self { inner, settings } }
}

impl<S: FrameSource> FrameSource for Grade<S> {
    fn duration(&self) -> f64 { self.inner.duration() }
    fn size(&self) -> (u32, u32) { self.inner.size() }
    fn has_alpha(&self) -> bool { self.inner.has_alpha() }

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        let mut frame = self.inner.frame_at(t)?;
        apply_grade(&mut frame, &self.settings);
        Ok(frame)
    }
}

// ── Assembly ──────────────────────────────────────────────────────────────────

/// Wrap `source` in the stages `job` asks for. Stages that would be a no-op
/// (full-frame crop, same-size resize, disabled grade) are left out.
pub fn build_stack(source: Arc<dyn FrameSource>, job: &ConversionJob) -> Box<dyn FrameSource> {
    let (start, end) = job.trim_window(source.duration());
    let (sw, sh)     = source.size();
    let geometry     = OutputGeometry::for_job(job, sw, sh);

    let mut stack: Box<dyn FrameSource> = Box::new(Trim::new(source, start, end));
    if let Some(rect) = geometry.crop {
        stack = Box::new(Crop::new(stack, rect));
    }
    if stack.size() != (geometry.width, geometry.height) {
        stack = Box::new(Resize::new(stack, geometry.width, geometry.height));
    }
    if job.grade.is_active() {
        stack = Box::new(Grade::new(stack, job.grade));
    }
    log::debug!(
        "[encode] stack: trim [{start:.3}, {end:.3}) crop {:?} → {}x{} grade={}",
        geometry.crop, geometry.width, geometry.height, job.grade.is_active()
    );
    stack
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipshift_core::{CropRegion, ExportFormat, JobSource};
    use image::Rgba;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// 100×50 source whose red channel encodes `floor(t * 10)` and which
    /// records every time it was asked for.
    struct Probe {
        asked: Mutex<Vec<f64>>,
    }

    impl FrameSource for Probe {
        fn duration(&self) -> f64 { 10.0 }
        fn size(&self) -> (u32, u32) { (100, 50) }
        fn has_alpha(&self) -> bool { true }
        fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
            self.asked.lock().push(t);
            let mut img = RgbaImage::from_pixel(100, 50, Rgba([(t * 10.0) as u8, 100, 100, 77]));
            img.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
            Ok(img)
        }
    }

    fn job() -> ConversionJob {
        ConversionJob::new(JobSource::File { path: PathBuf::from("x.mov") }, ExportFormat::Gif)
    }

    #[test]
    fn trim_rebases_time_and_clamps() {
        let probe = Arc::new(Probe { asked: Mutex::new(Vec::new()) });
        let t = Trim::new(probe.clone(), 2.0, 5.0);
        assert_eq!(t.duration(), 3.0);
        t.frame_at(0.0).unwrap();
        t.frame_at(1.5).unwrap();
        t.frame_at(40.0).unwrap();
        let asked = probe.asked.lock();
        assert_eq!(asked[0], 2.0);
        assert_eq!(asked[1], 3.5);
        assert!(asked[2] < 5.0 && asked[2] > 4.9);
    }

    #[test]
    fn geometry_uses_crop_and_even_height() {
        let mut j = job();
        j.width = 320;
        assert_eq!(OutputGeometry::for_job(&j, 1920, 1080), OutputGeometry { crop: None, width: 320, height: 180 });

        j.crop_enabled = true;
        j.crop = CropRegion::new(0.5, 0.0, 0.0, 1.0);
        let g = OutputGeometry::for_job(&j, 1920, 1080);
        assert_eq!(g.crop, Some(PixelRect { x: 0, y: 0, width: 960, height: 1080 }));
        assert_eq!((g.width, g.height), (320, 360));
    }

    #[test]
    fn crop_flag_off_ignores_region() {
        let mut j = job();
        j.crop = CropRegion::new(0.1, 0.1, 0.2, 0.2);
        assert_eq!(OutputGeometry::for_job(&j, 640, 480).crop, None);
    }

    #[test]
    fn stack_output_matches_advertised_size() {
        let mut j = job();
        j.width        = 40;
        j.start        = 1.0;
        j.end          = Some(4.0);
        j.crop_enabled = true;
        j.crop         = CropRegion::new(0.0, 0.0, 0.5, 1.0);
        j.grade.enabled  = true;
        j.grade.exposure = 50.0;

        let stack = build_stack(Arc::new(Probe { asked: Mutex::new(Vec::new()) }), &j);
        assert_eq!(stack.duration(), 3.0);
        assert_eq!(stack.size(), (40, 40));
        let f = stack.frame_at(0.5).unwrap();
        assert_eq!(f.dimensions(), (40, 40));
        // grade leaves alpha alone; Lanczos over a flat region keeps it flat
        assert_eq!(f.get_pixel(20, 20)[3], 77);
        assert_eq!(f.get_pixel(20, 20)[1], 150);
    }
}
