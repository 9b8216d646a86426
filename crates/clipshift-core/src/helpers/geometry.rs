// crates/clipshift-core/src/helpers/geometry.rs
//
// Frame-size arithmetic: output sizing, thumbnail bounding boxes, and proxy
// tiers. Every video-bound dimension is even so yuv420p encoders accept it.

/// Smallest proxy height that will be produced.
pub const PROXY_FLOOR: u32 = 360;

/// Height for a `src_w × src_h` frame resized to `target_w` wide, keeping
/// aspect ratio and rounding to the nearest even number (minimum 2).
///
/// ```
/// use clipshift_core::helpers::geometry::scaled_height;
/// assert_eq!(scaled_height(1920, 1080, 1280), 720);
/// assert_eq!(scaled_height(1000, 333, 500), 166);
/// assert_eq!(scaled_height(640, 481, 320), 240);
/// ```
pub fn scaled_height(src_w: u32, src_h: u32, target_w: u32) -> u32 {
    if src_w == 0 {
        return 2;
    }
    let exact = target_w as f64 * src_h as f64 / src_w as f64;
    let even  = ((exact / 2.0).round() as u32) * 2;
    even.max(2)
}

/// Shrink `w × h` to fit inside `max_w × max_h` keeping aspect ratio.
/// Never enlarges; never returns a zero side.
///
/// ```
/// use clipshift_core::helpers::geometry::fit_within;
/// assert_eq!(fit_within(1920, 1080, 160, 90), (160, 90));
/// assert_eq!(fit_within(1080, 1920, 160, 90), (51, 90));
/// assert_eq!(fit_within(100, 50, 160, 90), (100, 50));
/// ```
pub fn fit_within(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if w <= max_w && h <= max_h {
        return (w.max(1), h.max(1));
    }
    let scale = (max_w as f64 / w.max(1) as f64).min(max_h as f64 / h.max(1) as f64);
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    (nw, nh)
}

/// Proxy height for a source `src_h` tall, or `None` below `min_height`.
///
/// | source height | proxy            |
/// |---------------|------------------|
/// | ≥ 4320        | h / 8            |
/// | ≥ 2160        | h / 4            |
/// | otherwise     | h / 2            |
///
/// The result is raised to `PROXY_FLOOR` and floored to even.
///
/// ```
/// use clipshift_core::helpers::geometry::proxy_height;
/// assert_eq!(proxy_height(1080, 720), Some(540));
/// assert_eq!(proxy_height(2160, 720), Some(540));
/// assert_eq!(proxy_height(4320, 720), Some(540));
/// assert_eq!(proxy_height(720,  720), Some(360));
/// assert_eq!(proxy_height(719,  720), None);
/// ```
pub fn proxy_height(src_h: u32, min_height: u32) -> Option<u32> {
    if src_h < min_height {
        return None;
    }
    let tier = if src_h >= 4320 {
        src_h / 8
    } else if src_h >= 2160 {
        src_h / 4
    } else {
        src_h / 2
    };
    Some(tier.max(PROXY_FLOOR) & !1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_height_is_always_even() {
        for h in 1..400u32 {
            assert_eq!(scaled_height(333, h, 200) % 2, 0, "h = {h}");
        }
    }

    #[test]
    fn scaled_height_handles_zero_width_source() {
        assert_eq!(scaled_height(0, 1080, 1280), 2);
    }

    #[test]
    fn proxy_tiers_for_odd_heights() {
        assert_eq!(proxy_height(1441, 720), Some(720));
        assert_eq!(proxy_height(2500, 720), Some(624));
        assert_eq!(proxy_height(8640, 720), Some(1080));
    }

    #[test]
    fn proxy_threshold_is_configurable() {
        assert_eq!(proxy_height(1080, 1440), None);
        assert_eq!(proxy_height(600, 480), Some(360));
    }
}
