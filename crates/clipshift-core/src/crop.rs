// crates/clipshift-core/src/crop.rs
//
// Normalized crop rectangle. Stored exactly as the user dragged it (corners
// in either order), resolved to a min/max rectangle at the point of use.

use serde::{Deserialize, Serialize};

/// Smallest resolved width or height, as a fraction of the source.
pub const MIN_CROP: f64 = 0.01;

/// Two opposite corners in `[0, 1]²`. Serialized as `[x1, y1, x2, y2]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct CropRegion {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A crop resolved against a concrete frame size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x:      u32,
    pub y:      u32,
    pub width:  u32,
    pub height: u32,
}

impl Default for CropRegion {
    fn default() -> Self { Self::full() }
}

impl From<[f64; 4]> for CropRegion {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self { Self { x1, y1, x2, y2 } }
}

impl From<CropRegion> for [f64; 4] {
    fn from(c: CropRegion) -> Self { [c.x1, c.y1, c.x2, c.y2] }
}

impl CropRegion {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// The whole frame.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Ordered, clamped to `[0, 1]`, and at least `MIN_CROP` on each side.
    /// Independent of which corner was given first.
    ///
    /// ```
    /// use clipshift_core::crop::CropRegion;
    /// let a = CropRegion::new(0.8, 0.1, 0.2, 0.9).resolve();
    /// let b = CropRegion::new(0.2, 0.9, 0.8, 0.1).resolve();
    /// assert_eq!(a, b);
    /// assert!(a.x1 < a.x2 && a.y1 < a.y2);
    /// ```
    pub fn resolve(&self) -> Self {
        let (x1, x2) = resolve_axis(self.x1, self.x2);
        let (y1, y2) = resolve_axis(self.y1, self.y2);
        Self { x1, y1, x2, y2 }
    }

    pub fn is_full(&self) -> bool {
        let r = self.resolve();
        r.x1 <= 0.0 && r.y1 <= 0.0 && r.x2 >= 1.0 && r.y2 >= 1.0
    }

    /// Resolve against a `width × height` frame. The result always lies
    /// inside the frame and is at least 1×1.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let r = self.resolve();
        let (x, w) = axis_pixels(r.x1, r.x2, width);
        let (y, h) = axis_pixels(r.y1, r.y2, height);
        PixelRect { x, y, width: w, height: h }
    }
}

fn resolve_axis(a: f64, b: f64) -> (f64, f64) {
    let lo = a.min(b).clamp(0.0, 1.0);
    let hi = a.max(b).clamp(0.0, 1.0);
    if hi - lo >= MIN_CROP {
        return (lo, hi);
    }
    // Grow toward 1.0 first, then back toward 0.0 if we hit the edge.
    let hi = (lo + MIN_CROP).min(1.0);
    (hi - MIN_CROP, hi)
}

fn axis_pixels(lo: f64, hi: f64, extent: u32) -> (u32, u32) {
    if extent == 0 {
        return (0, 0);
    }
    let start = ((lo * extent as f64).round() as u32).min(extent - 1);
    let end   = ((hi * extent as f64).round() as u32).clamp(start + 1, extent);
    (start, end - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapped_corners_resolve_identically() {
        let a = CropRegion::new(0.1, 0.2, 0.6, 0.7);
        let b = CropRegion::new(0.6, 0.7, 0.1, 0.2);
        assert_eq!(a.resolve(), b.resolve());
        assert_eq!(a.to_pixels(1920, 1080), b.to_pixels(1920, 1080));
    }

    #[test]
    fn degenerate_crop_grows_to_minimum() {
        let r = CropRegion::new(0.5, 0.5, 0.5, 0.5).resolve();
        assert!((r.x2 - r.x1 - MIN_CROP).abs() < 1e-9);
        assert!((r.y2 - r.y1 - MIN_CROP).abs() < 1e-9);
    }

    #[test]
    fn degenerate_crop_at_edge_grows_inward() {
        let r = CropRegion::new(1.0, 1.0, 1.0, 1.0).resolve();
        assert_eq!(r.x2, 1.0);
        assert!((r.x1 - (1.0 - MIN_CROP)).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_corners_are_clamped() {
        let r = CropRegion::new(-0.5, -1.0, 2.0, 1.5).resolve();
        assert_eq!(r, CropRegion::full());
        assert!(CropRegion::new(-0.5, -1.0, 2.0, 1.5).is_full());
    }

    #[test]
    fn pixels_stay_inside_frame() {
        let p = CropRegion::new(0.25, 0.5, 0.75, 1.0).to_pixels(640, 480);
        assert_eq!(p, PixelRect { x: 160, y: 240, width: 320, height: 240 });

        let tiny = CropRegion::new(0.999, 0.999, 1.0, 1.0).to_pixels(10, 10);
        assert!(tiny.x + tiny.width <= 10 && tiny.y + tiny.height <= 10);
        assert!(tiny.width >= 1 && tiny.height >= 1);
    }

    #[test]
    fn serializes_as_corner_array() {
        let json = serde_json::to_string(&CropRegion::new(0.0, 0.25, 0.5, 1.0)).unwrap();
        assert_eq!(json, "[0.0,0.25,0.5,1.0]");
        let back: CropRegion = serde_json::from_str("[1,1,0,0]").unwrap();
        assert_eq!(back.resolve(), CropRegion::full());
    }
}
