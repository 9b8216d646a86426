// crates/clipshift-media/src/source/sequence.rs
//
// SequenceSource: an ordered list of still images played back at a synthetic
// frame rate.
//
// Every frame_at call opens its one file and decodes it fresh. There is no
// decoder or cache to go stale, so concurrent reads from several threads are
// independent I/O.
//
// A frame that fails to decode is replaced by an opaque black placeholder of
// the nominal size and counted in `soft_errors()`. Only the first frame has
// to open; it fixes size and alpha for the whole source.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{imageops::FilterType, Rgba, RgbaImage};

use clipshift_core::helpers::sequence::sort_natural;

use super::{clamp_time, FrameSource};
use crate::error::{PipelineError, PipelineResult};

/// Added to `t * fps` before flooring so times computed as `i / fps` land on
/// frame `i` despite float rounding.
const INDEX_EPSILON: f64 = 1e-4;

pub struct SequenceSource {
    paths:       Vec<PathBuf>,
    fps:         f64,
    width:       u32,
    height:      u32,
    has_alpha:   bool,
    soft_errors: AtomicUsize,
}

impl SequenceSource {
    pub fn new(mut paths: Vec<PathBuf>, fps: f64) -> PipelineResult<Self> {
        if paths.is_empty() {
            return Err(PipelineError::Validation("image sequence has no frames".into()));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(PipelineError::Validation(format!("sequence fps must be positive, got {fps}")));
        }
        sort_natural(&mut paths);

        let first = image::open(&paths[0]).map_err(|e| PipelineError::unreadable(&paths[0], e))?;
        let has_alpha = first.color().has_alpha();
        let (width, height) = (first.width(), first.height());
        log::debug!(
            "[seq] {} frames @ {fps}fps {width}x{height} alpha={has_alpha} ← {}",
            paths.len(),
            paths[0].display()
        );

        Ok(Self { paths, fps, width, height, has_alpha, soft_errors: AtomicUsize::new(0) })
    }

    pub fn fps(&self) -> f64 { self.fps }

    pub fn frame_count(&self) -> usize { self.paths.len() }

    pub fn paths(&self) -> &[PathBuf] { &self.paths }

    /// Frames that decoded to a placeholder so far.
    pub fn soft_errors(&self) -> usize { self.soft_errors.load(Ordering::Relaxed) }

    /// `clamp(floor(t * fps + ε), 0, n - 1)`. Monotonic in `t`.
    pub fn frame_index(&self, t: f64) -> usize {
        let t   = if t.is_finite() { t } else { 0.0 };
        let raw = (t * self.fps + INDEX_EPSILON).floor();
        let last = self.paths.len() - 1;
        if raw <= 0.0 { 0 } else { (raw as usize).min(last) }
    }

    fn load(&self, path: &Path) -> PipelineResult<RgbaImage> {
        let mut frame = image::open(path)?.to_rgba8();
        if frame.dimensions() != (self.width, self.height) {
            log::warn!(
                "[seq] {} is {}x{}, expected {}x{}; resizing",
                path.display(), frame.width(), frame.height(), self.width, self.height
            );
            frame = image::imageops::resize(&frame, self.width, self.height, FilterType::Triangle);
        }
        if !self.has_alpha {
            for px in frame.pixels_mut() {
                px[3] = 255;
            }
        }
        Ok(frame)
    }

    fn placeholder(&self) -> RgbaImage {
        RgbaImage::from_pixel(self.width, self.height, Rgba([0, 0, 0, 255]))
    }
}

impl FrameSource for SequenceSource {
    fn duration(&self) -> f64 {
        self.paths.len() as f64 / self.fps
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn has_alpha(&self) -> bool {
        self.has_alpha
    }

    fn frame_at(&self, t: f64) -> PipelineResult<RgbaImage> {
        let idx  = self.frame_index(clamp_time(t, self.duration()));
        let path = &self.paths[idx];
        match self.load(path) {
            Ok(frame) => Ok(frame),
            Err(e) => {
                let n = self.soft_errors.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("[seq] frame {idx} unreadable ({}): {e} [{n} so far]", path.display());
                Ok(self.placeholder())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_frames(dir: &Path, n: usize, alpha: bool) -> Vec<PathBuf> {
        (1..=n)
            .map(|i| {
                let p = dir.join(format!("shot_{i}.png"));
                if alpha {
                    RgbaImage::from_pixel(8, 6, Rgba([i as u8, 0, 0, 128])).save(&p).unwrap();
                } else {
                    RgbImage::from_pixel(8, 6, Rgb([i as u8, 0, 0])).save(&p).unwrap();
                }
                p
            })
            .collect()
    }

    #[test]
    fn frames_are_sorted_naturally_and_indexed_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = write_frames(dir.path(), 12, false);
        paths.reverse();
        let src = SequenceSource::new(paths, 4.0).unwrap();

        assert_eq!(src.duration(), 3.0);
        assert!(src.paths()[1].ends_with("shot_2.png"));
        assert!(src.paths()[9].ends_with("shot_10.png"));
        // red channel carries the frame number
        assert_eq!(src.frame_at(0.0).unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(src.frame_at(2.5).unwrap().get_pixel(0, 0)[0], 11);
        assert_eq!(src.frame_at(99.0).unwrap().get_pixel(0, 0)[0], 12);
    }

    #[test]
    fn index_survives_float_rounding() {
        let dir = tempfile::tempdir().unwrap();
        let src = SequenceSource::new(write_frames(dir.path(), 30, false), 10.0).unwrap();
        for i in 0..30 {
            assert_eq!(src.frame_index(i as f64 / 10.0), i);
        }
        assert_eq!(src.frame_index(0.7), 7);
    }

    #[test]
    fn alpha_comes_from_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let src = SequenceSource::new(write_frames(dir.path(), 2, true), 24.0).unwrap();
        assert!(src.has_alpha());
        assert_eq!(src.frame_at(0.0).unwrap().get_pixel(0, 0)[3], 128);

        let opaque = tempfile::tempdir().unwrap();
        let src = SequenceSource::new(write_frames(opaque.path(), 2, false), 24.0).unwrap();
        assert!(!src.has_alpha());
        assert_eq!(src.frame_at(0.0).unwrap().get_pixel(0, 0)[3], 255);
    }

    #[test]
    fn broken_frame_becomes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_frames(dir.path(), 3, false);
        std::fs::write(&paths[1], b"not a png").unwrap();
        let src = SequenceSource::new(paths, 1.0).unwrap();

        let f = src.frame_at(1.2).unwrap();
        assert_eq!(f.dimensions(), (8, 6));
        assert_eq!(*f.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
        assert_eq!(src.soft_errors(), 1);
    }

    #[test]
    fn unreadable_first_frame_fails_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("a_1.png");
        std::fs::write(&p, b"junk").unwrap();
        let err = SequenceSource::new(vec![p], 24.0).err().unwrap();
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
        assert!(SequenceSource::new(vec![], 24.0).is_err());
    }
}
