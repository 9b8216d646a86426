// crates/clipshift-core/src/grade.rs
//
// Color grading: one settings value type and two renderings of it.
//
//   apply_grade()      in-process, on a decoded RGBA buffer. Used by every
//                      frame-by-frame encode path and by thumbnails.
//   to_filter_expr()   an ffmpeg `-vf` fragment for the direct MP4 path,
//                      where frames never enter this process.
//
// The two are visually close, not bit-identical. eq/colorbalance use their own
// curves for brightness and channel balance.
//
// Stage order is fixed (they do not commute):
//   1. brightness   × (1 + exposure/100)
//   2. contrast     around the frame's mean luma, × (1 + contrast/100)
//   3. saturation   around each pixel's luma, × saturation
//   4. temperature  red/blue shift of temperature/300
//   5. tint         green, or red/blue, shift of tint/300
//   6. gamma        255 · (v/255)^(1/gamma)
//
// Every stage truncates toward zero and clamps to [0, 255]. Alpha is never
// read or written. Neutral stages are skipped entirely so an identity grade
// cannot introduce rounding drift.

use serde::{Deserialize, Serialize};

// ── Settings ──────────────────────────────────────────────────────────────────

/// Grading parameters. Embedded by value in every job; never shared.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeSettings {
    #[serde(rename = "color_correction")]
    pub enabled:     bool,
    /// -100..=100
    pub exposure:    f64,
    /// -100..=100
    pub contrast:    f64,
    /// 0.1..=3.0
    pub gamma:       f64,
    /// 0.0..=3.0
    pub saturation:  f64,
    /// -100..=100
    pub tint:        f64,
    /// -100..=100
    pub temperature: f64,
}

impl Default for GradeSettings {
    fn default() -> Self {
        Self {
            enabled:     false,
            exposure:    0.0,
            contrast:    0.0,
            gamma:       1.0,
            saturation:  1.0,
            tint:        0.0,
            temperature: 0.0,
        }
    }
}

impl GradeSettings {
    /// True when every parameter is at its identity value (ignores `enabled`).
    pub fn is_neutral(&self) -> bool {
        self.exposure == 0.0
            && self.contrast == 0.0
            && self.gamma == 1.0
            && self.saturation == 1.0
            && self.tint == 0.0
            && self.temperature == 0.0
    }

    /// True when applying this grade would change pixels.
    pub fn is_active(&self) -> bool {
        self.enabled && !self.is_neutral()
    }

    /// Copy with every parameter forced into its documented range.
    /// Applied when a job is committed so a hand-edited job file cannot
    /// smuggle in a zero gamma.
    pub fn clamped(mut self) -> Self {
        self.exposure    = self.exposure.clamp(-100.0, 100.0);
        self.contrast    = self.contrast.clamp(-100.0, 100.0);
        self.tint        = self.tint.clamp(-100.0, 100.0);
        self.temperature = self.temperature.clamp(-100.0, 100.0);
        self.gamma       = self.gamma.clamp(0.1, 3.0);
        self.saturation  = self.saturation.clamp(0.0, 3.0);
        self
    }

    /// Render as an ffmpeg filter fragment: `eq=…` followed by an optional
    /// `colorbalance=…`. `None` when the grade is disabled or neutral.
    ///
    /// ```
    /// use clipshift_core::grade::GradeSettings;
    /// let g = GradeSettings { enabled: true, contrast: 10.0, ..Default::default() };
    /// assert_eq!(
    ///     g.to_filter_expr().as_deref(),
    ///     Some("eq=brightness=0.000:contrast=1.100:saturation=1.000:gamma=1.000"),
    /// );
    /// ```
    pub fn to_filter_expr(&self) -> Option<String> {
        if !self.is_active() {
            return None;
        }
        let s = self.clamped();

        // eq brightness is additive in [-1, 1]; exposure is multiplicative.
        let brightness = (s.exposure / 200.0).clamp(-1.0, 1.0);
        let mut expr = format!(
            "eq=brightness={brightness:.3}:contrast={:.3}:saturation={:.3}:gamma={:.3}",
            1.0 + s.contrast / 100.0,
            s.saturation,
            s.gamma,
        );

        let (rm, gm, bm) = s.channel_balance();
        if rm != 0.0 || gm != 0.0 || bm != 0.0 {
            expr.push_str(&format!(",colorbalance=rm={rm:.3}:gm={gm:.3}:bm={bm:.3}"));
        }
        Some(expr)
    }

    /// Combined temperature + tint as midtone offsets, each clamped to [-1, 1].
    fn channel_balance(&self) -> (f64, f64, f64) {
        let t = self.temperature / 300.0;
        let mut r = t;
        let mut g = 0.0;
        let mut b = -t;
        if self.tint > 0.0 {
            g += self.tint / 300.0;
        } else if self.tint < 0.0 {
            let a = self.tint.abs() / 300.0;
            r -= a;
            b += a;
        }
        (r.clamp(-1.0, 1.0), g.clamp(-1.0, 1.0), b.clamp(-1.0, 1.0))
    }
}

// ── In-process grading ───────────────────────────────────────────────────────

/// Grade an RGBA8 buffer in place. No-op when `settings.enabled` is false.
///
/// `rgba.len()` must be a multiple of 4; a trailing partial pixel is ignored.
pub fn apply_grade(rgba: &mut [u8], settings: &GradeSettings) {
    if !settings.enabled {
        return;
    }
    let s = settings.clamped();

    if s.exposure != 0.0 {
        let f = 1.0 + s.exposure / 100.0;
        for px in rgba.chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = blend(0.0, *c, f);
            }
        }
    }

    if s.contrast != 0.0 {
        let f    = 1.0 + s.contrast / 100.0;
        let mean = mean_luma(rgba) as f64;
        for px in rgba.chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = blend(mean, *c, f);
            }
        }
    }

    if s.saturation != 1.0 {
        for px in rgba.chunks_exact_mut(4) {
            let l = luma(px[0], px[1], px[2]) as f64;
            for c in &mut px[..3] {
                *c = blend(l, *c, s.saturation);
            }
        }
    }

    if s.temperature != 0.0 {
        let k = s.temperature.abs() / 300.0;
        let (r_lut, b_lut) = if s.temperature > 0.0 {
            (scale_lut(1.0 + k), scale_lut(1.0 - k))
        } else {
            (scale_lut(1.0 - k), scale_lut(1.0 + k))
        };
        for px in rgba.chunks_exact_mut(4) {
            px[0] = r_lut[px[0] as usize];
            px[2] = b_lut[px[2] as usize];
        }
    }

    if s.tint > 0.0 {
        let g_lut = scale_lut(1.0 + s.tint / 300.0);
        for px in rgba.chunks_exact_mut(4) {
            px[1] = g_lut[px[1] as usize];
        }
    } else if s.tint < 0.0 {
        let k     = s.tint.abs() / 300.0;
        let r_lut = scale_lut(1.0 - k);
        let b_lut = scale_lut(1.0 + k);
        for px in rgba.chunks_exact_mut(4) {
            px[0] = r_lut[px[0] as usize];
            px[2] = b_lut[px[2] as usize];
        }
    }

    if s.gamma != 1.0 {
        let lut = gamma_lut(s.gamma);
        for px in rgba.chunks_exact_mut(4) {
            for c in &mut px[..3] {
                *c = lut[*c as usize];
            }
        }
    }
}

/// `degenerate + factor·(v − degenerate)`, truncated and clamped.
#[inline]
fn blend(degenerate: f64, v: u8, factor: f64) -> u8 {
    let out = degenerate + factor * (v as f64 - degenerate);
    (out as i64).clamp(0, 255) as u8
}

/// ITU-R 601-2 luma in 16.16 fixed point.
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16) as u8
}

/// Mean luma over every pixel, rounded half up.
fn mean_luma(rgba: &[u8]) -> u8 {
    let n = rgba.len() / 4;
    if n == 0 {
        return 0;
    }
    let sum: u64 = rgba
        .chunks_exact(4)
        .map(|px| luma(px[0], px[1], px[2]) as u64)
        .sum();
    (sum as f64 / n as f64 + 0.5) as u8
}

fn scale_lut(factor: f64) -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = ((i as f64 * factor) as i64).clamp(0, 255) as u8;
    }
    lut
}

fn gamma_lut(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    let mut lut = [0u8; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = ((255.0 * (i as f64 / 255.0).powf(inv)) as i64).clamp(0, 255) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Vec<u8> {
        (0..64u32)
            .flat_map(|i| {
                let v = (i * 4) as u8;
                [v, 255 - v, v / 2, (i * 3) as u8]
            })
            .collect()
    }

    fn enabled() -> GradeSettings {
        GradeSettings { enabled: true, ..Default::default() }
    }

    #[test]
    fn disabled_grade_is_noop() {
        let mut px = ramp();
        let before = px.clone();
        let g = GradeSettings { enabled: false, exposure: 80.0, gamma: 2.2, ..Default::default() };
        apply_grade(&mut px, &g);
        assert_eq!(px, before);
    }

    #[test]
    fn enabled_identity_leaves_pixels_unchanged() {
        let mut px = ramp();
        let before = px.clone();
        apply_grade(&mut px, &enabled());
        assert_eq!(px, before);
    }

    #[test]
    fn gamma_one_is_identity_lut() {
        let lut = gamma_lut(1.0);
        for (i, v) in lut.iter().enumerate() {
            assert_eq!(*v as usize, i);
        }
    }

    #[test]
    fn exposure_scales_and_clamps() {
        let mut px = vec![100, 200, 10, 77];
        apply_grade(&mut px, &GradeSettings { exposure: 50.0, ..enabled() });
        assert_eq!(px, vec![150, 255, 15, 77]);
    }

    #[test]
    fn alpha_is_never_touched() {
        let mut px = ramp();
        let alphas: Vec<u8> = px.chunks(4).map(|p| p[3]).collect();
        let g = GradeSettings {
            enabled: true, exposure: 30.0, contrast: -20.0, gamma: 0.5,
            saturation: 2.0, tint: -40.0, temperature: 60.0,
        };
        apply_grade(&mut px, &g);
        let after: Vec<u8> = px.chunks(4).map(|p| p[3]).collect();
        assert_eq!(alphas, after);
    }

    #[test]
    fn warm_temperature_boosts_red_and_cuts_blue() {
        let mut px = vec![150, 150, 150, 255];
        apply_grade(&mut px, &GradeSettings { temperature: 30.0, ..enabled() });
        assert_eq!(px, vec![165, 150, 135, 255]);
    }

    #[test]
    fn negative_tint_moves_red_and_blue_only() {
        let mut px = vec![150, 150, 150, 255];
        apply_grade(&mut px, &GradeSettings { tint: -30.0, ..enabled() });
        assert_eq!(px, vec![135, 150, 165, 255]);
    }

    #[test]
    fn zero_saturation_collapses_to_luma() {
        let mut px = vec![255, 0, 0, 255];
        apply_grade(&mut px, &GradeSettings { saturation: 0.0, ..enabled() });
        let l = luma(255, 0, 0);
        assert_eq!(&px[..3], &[l, l, l]);
    }

    #[test]
    fn contrast_pivots_around_mean_luma() {
        // Two grey pixels, mean 100: 50 moves away from the mean, 150 too.
        let mut px = vec![50, 50, 50, 255, 150, 150, 150, 255];
        apply_grade(&mut px, &GradeSettings { contrast: 100.0, ..enabled() });
        assert_eq!(px, vec![0, 0, 0, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn clamped_rejects_out_of_range_values() {
        let g = GradeSettings { gamma: 0.0, saturation: 9.0, exposure: -500.0, ..enabled() }.clamped();
        assert_eq!(g.gamma, 0.1);
        assert_eq!(g.saturation, 3.0);
        assert_eq!(g.exposure, -100.0);
    }

    #[test]
    fn filter_expr_none_when_inactive() {
        assert!(GradeSettings::default().to_filter_expr().is_none());
        assert!(enabled().to_filter_expr().is_none());
        let off = GradeSettings { enabled: false, gamma: 2.0, ..Default::default() };
        assert!(off.to_filter_expr().is_none());
    }

    #[test]
    fn filter_expr_includes_colorbalance_for_temperature_and_tint() {
        let g = GradeSettings { temperature: 100.0, tint: 100.0, ..enabled() };
        let expr = g.to_filter_expr().unwrap();
        assert!(expr.starts_with("eq=brightness=0.000:"));
        assert!(expr.ends_with(",colorbalance=rm=0.333:gm=0.333:bm=-0.333"));
    }

    #[test]
    fn opposing_temperature_and_tint_cancel_in_colorbalance() {
        let g = GradeSettings { temperature: 100.0, tint: -100.0, ..enabled() };
        let expr = g.to_filter_expr().unwrap();
        assert!(!expr.contains("colorbalance"));
    }

    #[test]
    fn settings_deserialize_from_partial_record() {
        let g: GradeSettings = serde_json::from_str(r#"{"color_correction": true, "gamma": 1.8}"#).unwrap();
        assert!(g.enabled);
        assert_eq!(g.gamma, 1.8);
        assert_eq!(g.saturation, 1.0);
    }
}
