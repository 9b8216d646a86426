// crates/clipshift-core/src/helpers/time.rs
//
// Human-readable time strings: progress ETA labels and compact durations for
// probe output.

/// ETA label shown next to a progress percentage.
///
/// `fraction` is the current job's completion in `[0, 1]`, `elapsed_secs`
/// the time spent on it so far, and `jobs_after` the number of queued jobs
/// still to run after this one. Below 1 % there is not enough signal and the
/// label says so.
///
/// ```
/// use clipshift_core::helpers::time::eta_text;
/// assert_eq!(eta_text(0.005, 3.0, 0),  "(estimating...)");
/// assert_eq!(eta_text(0.25, 10.0, 0),  "(30s left / 30s total)");
/// assert_eq!(eta_text(0.25, 10.0, 2),  "(30s left / 110s total)");
/// ```
pub fn eta_text(fraction: f64, elapsed_secs: f64, jobs_after: usize) -> String {
    match estimate_remaining(fraction, elapsed_secs, jobs_after) {
        Some((this_job, batch)) => format!("({this_job}s left / {batch}s total)"),
        None                    => "(estimating...)".to_string(),
    }
}

/// `(remaining for this job, remaining for the batch)` in whole seconds, or
/// `None` while `fraction <= 0.01`.
///
/// The batch estimate assumes every later job takes as long as this one.
pub fn estimate_remaining(fraction: f64, elapsed_secs: f64, jobs_after: usize) -> Option<(u64, u64)> {
    if !(fraction > 0.01) {
        return None;
    }
    let per_job   = elapsed_secs / fraction.min(1.0);
    let this_job  = (per_job - elapsed_secs).max(0.0);
    let batch     = this_job + per_job * jobs_after as f64;
    Some((this_job as u64, batch.max(0.0) as u64))
}

/// Compact duration for listings.
///
/// | Range   | Format    | Example   |
/// |---------|-----------|-----------|
/// | ≥ 3600 s| `H:MM:SS` | `1:04:35` |
/// | ≥ 60 s  | `M:SS`    | `3:07`    |
/// | < 60 s  | `S.Xs`    | `4.2s`    |
///
/// ```
/// use clipshift_core::helpers::time::format_duration;
/// assert_eq!(format_duration(4.2),    "4.2s");
/// assert_eq!(format_duration(187.0),  "3:07");
/// assert_eq!(format_duration(3875.0), "1:04:35");
/// ```
pub fn format_duration(secs: f64) -> String {
    let whole = secs.max(0.0) as u64;
    if secs >= 3600.0 {
        format!("{}:{:02}:{:02}", whole / 3600, (whole % 3600) / 60, whole % 60)
    } else if secs >= 60.0 {
        format!("{}:{:02}", whole / 60, whole % 60)
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_is_none_at_exactly_one_percent() {
        assert!(estimate_remaining(0.01, 1.0, 0).is_none());
        assert!(estimate_remaining(f64::NAN, 1.0, 0).is_none());
    }

    #[test]
    fn eta_at_completion_is_zero_for_this_job() {
        let (this_job, batch) = estimate_remaining(1.0, 12.0, 1).unwrap();
        assert_eq!(this_job, 0);
        assert_eq!(batch, 12);
    }
}
