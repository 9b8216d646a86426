// crates/clipshift-core/src/config.rs
//
// Pipeline-wide settings. Every field has a default so a partial TOML file
// (or none at all) is valid; the CLI layers env overrides on top.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_FFMPEG:  &str = "CLIPSHIFT_FFMPEG";
pub const ENV_FFPROBE: &str = "CLIPSHIFT_FFPROBE";

const DEFAULT_PROBE_TIMEOUT_SECS:     f64 = 3.0;
const DEFAULT_THUMBNAIL_TIMEOUT_SECS: f64 = 5.0;

/// Accepted range for the subprocess timeouts, in seconds.
const TIMEOUT_RANGE: (f64, f64) = (0.1, 3600.0);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// External encoder used by the direct MP4 path and proxy generation.
    pub ffmpeg_bin:             PathBuf,
    pub ffprobe_bin:            PathBuf,
    /// Hard limit on one ffprobe run before falling back to the in-library probe.
    pub probe_timeout_secs:     f64,
    /// Hard limit on the external single-frame thumbnail grab.
    pub thumbnail_timeout_secs: f64,
    /// Pool size for folder-scan analysis.
    pub analysis_workers:       usize,
    /// Pool size for job-file import analysis.
    pub import_workers:         usize,
    /// Minimum spacing between progress callbacks.
    pub progress_interval_ms:   u64,
    /// Sleep between checks while paused.
    pub pause_poll_ms:          u64,
    /// Sources shorter than this never get a proxy.
    pub proxy_min_height:       u32,
    pub proxy_dir:              PathBuf,
    /// Target fps given to jobs created by a folder scan.
    pub default_fps:            u32,
    /// Target width given to jobs created by a folder scan.
    pub default_width:          u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin:             PathBuf::from("ffmpeg"),
            ffprobe_bin:            PathBuf::from("ffprobe"),
            probe_timeout_secs:     DEFAULT_PROBE_TIMEOUT_SECS,
            thumbnail_timeout_secs: DEFAULT_THUMBNAIL_TIMEOUT_SECS,
            analysis_workers:       4,
            import_workers:         8,
            progress_interval_ms:   250,
            pause_poll_ms:          100,
            proxy_min_height:       720,
            proxy_dir:              std::env::temp_dir(),
            default_fps:            24,
            default_width:          1280,
        }
    }
}

impl PipelineConfig {
    /// Apply `CLIPSHIFT_FFMPEG` / `CLIPSHIFT_FFPROBE` when set and non-empty.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = std::env::var_os(ENV_FFMPEG).filter(|v| !v.is_empty()) {
            self.ffmpeg_bin = PathBuf::from(v);
        }
        if let Some(v) = std::env::var_os(ENV_FFPROBE).filter(|v| !v.is_empty()) {
            self.ffprobe_bin = PathBuf::from(v);
        }
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        timeout(self.probe_timeout_secs, DEFAULT_PROBE_TIMEOUT_SECS)
    }

    pub fn thumbnail_timeout(&self) -> Duration {
        timeout(self.thumbnail_timeout_secs, DEFAULT_THUMBNAIL_TIMEOUT_SECS)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms.max(1))
    }
}

/// `secs` clamped to TIMEOUT_RANGE; `default` when it is NaN or infinite.
fn timeout(secs: f64, default: f64) -> Duration {
    let secs = if secs.is_finite() { secs } else { default };
    Duration::from_secs_f64(secs.clamp(TIMEOUT_RANGE.0, TIMEOUT_RANGE.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let c: PipelineConfig = serde_json::from_str(r#"{"analysis_workers": 2}"#).unwrap();
        assert_eq!(c.analysis_workers, 2);
        assert_eq!(c.import_workers, 8);
        assert_eq!(c.probe_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn timeouts_survive_non_finite_and_extreme_values() {
        let c = PipelineConfig {
            probe_timeout_secs:     f64::INFINITY,
            thumbnail_timeout_secs: f64::NAN,
            ..Default::default()
        };
        assert_eq!(c.probe_timeout(), Duration::from_secs(3));
        assert_eq!(c.thumbnail_timeout(), Duration::from_secs(5));

        let c = PipelineConfig { probe_timeout_secs: -2.0, thumbnail_timeout_secs: 1e9, ..Default::default() };
        assert_eq!(c.probe_timeout(), Duration::from_millis(100));
        assert_eq!(c.thumbnail_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn pause_poll_never_zero() {
        let c = PipelineConfig { pause_poll_ms: 0, ..Default::default() };
        assert_eq!(c.pause_poll(), Duration::from_millis(1));
    }
}
