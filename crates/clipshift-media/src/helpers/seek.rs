// crates/clipshift-media/src/helpers/seek.rs
//
// Container seek with soft-fail.
//
// Seeks go backwards to the keyframe at or before the target; callers decode
// forward from there and discard pre-roll by pts. A failed seek is logged and
// reported, never fatal: decoding simply starts from the current position.

use ffmpeg_the_third as ffmpeg;

/// Seek `ictx` to `target_secs`. Returns `false` if the demuxer refused.
/// A target of 0 is a no-op; a fresh context is already there and some
/// demuxers reject `max_ts = 0`.
pub fn seek_to_secs(ictx: &mut ffmpeg::format::context::Input, target_secs: f64, label: &str) -> bool {
    if target_secs <= 0.0 {
        return true;
    }
    let seek_ts = (target_secs * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
    match ictx.seek(seek_ts, ..=seek_ts) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("[seek] soft-fail in {label} at {target_secs:.3}s: {e}; decoding from current position");
            false
        }
    }
}
