// crates/clipshift-core/src/job.rs
//
// ConversionJob: one queued unit of work with its own settings snapshot.
//
// A job owns everything it needs by value (grade, crop, options) so later
// edits to the front-end state can never reach into a queued job. The runner
// borrows a clone for execution and writes back only `status`.
//
// Status state machine:
//
//   Queued ──► Running ──► Completed | Cancelled | Failed(reason)
//     ▲                          │
//     └──────── requeue ─────────┘
//
//   Queued ──► SourceMissing      (import found no file on disk)
//
// Running never returns to Queued. An interrupted job is Cancelled and must
// be re-queued explicitly.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crop::CropRegion;
use crate::grade::GradeSettings;
use crate::helpers::sequence::{sequence_base_name, sequence_display_name};
use crate::media_types::MediaInfo;

/// Failure reasons stored on a job are cut to this many characters.
pub const REASON_MAX_CHARS: usize = 40;

pub const DEFAULT_BITRATE_MBPS: f64 = 2.0;
pub const DEFAULT_LOOP:         u32 = 0;
pub const DEFAULT_FPS:          u32 = 24;
pub const DEFAULT_WIDTH:        u32 = 1280;

// ── Formats ───────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExportFormat {
    #[serde(rename = "GIF")]  Gif,
    #[serde(rename = "MP4")]  Mp4,
    #[serde(rename = "WebM")] WebM,
    #[serde(rename = "WebP")] WebP,
    Sequence,
    Thumbnail,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 6] = [
        Self::Gif, Self::Mp4, Self::WebM, Self::WebP, Self::Sequence, Self::Thumbnail,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gif       => "GIF",
            Self::Mp4       => "MP4",
            Self::WebM      => "WebM",
            Self::WebP      => "WebP",
            Self::Sequence  => "Sequence",
            Self::Thumbnail => "Thumbnail",
        }
    }

    /// File extension (with dot) for single-file outputs. Sequence and
    /// Thumbnail take theirs from the still format.
    pub fn extension(&self, still: StillFormat) -> &'static str {
        match self {
            Self::Gif                         => ".gif",
            Self::Mp4                         => ".mp4",
            Self::WebM                        => ".webm",
            Self::WebP                        => ".webp",
            Self::Sequence | Self::Thumbnail  => still.extension(),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown export format '{s}'"))
    }
}

/// Image format for Sequence frames and Thumbnail output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StillFormat {
    #[default]
    #[serde(rename = "PNG")]  Png,
    #[serde(rename = "JPG")]  Jpg,
    #[serde(rename = "WEBP")] Webp,
    #[serde(rename = "GIF")]  Gif,
}

impl StillFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png  => ".png",
            Self::Jpg  => ".jpg",
            Self::Webp => ".webp",
            Self::Gif  => ".gif",
        }
    }

    /// JPG has no alpha; everything else keeps it when the source has it.
    pub fn supports_alpha(&self) -> bool {
        !matches!(self, Self::Jpg)
    }
}

impl FromStr for StillFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png"          => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "webp"         => Ok(Self::Webp),
            "gif"          => Ok(Self::Gif),
            other          => Err(format!("unknown still format '{other}'")),
        }
    }
}

// ── Format options ────────────────────────────────────────────────────────────

/// Format-specific knobs. Validated when parsed from user text, never at the
/// point of use.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormatOptions {
    /// 0 = loop forever (GIF/WebP).
    pub loop_count:   u32,
    /// Video bitrate in Mbit/s (MP4/WebM).
    pub bitrate_mbps: f64,
    pub still_format: StillFormat,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            loop_count:   DEFAULT_LOOP,
            bitrate_mbps: DEFAULT_BITRATE_MBPS,
            still_format: StillFormat::Png,
        }
    }
}

impl FormatOptions {
    pub fn bitrate_bps(&self) -> usize {
        (self.bitrate_mbps * 1_000_000.0) as usize
    }

    /// Positive bitrate in Mbit/s, or 2.0.
    ///
    /// ```
    /// use clipshift_core::job::FormatOptions;
    /// assert_eq!(FormatOptions::parse_bitrate("8"),   8.0);
    /// assert_eq!(FormatOptions::parse_bitrate("2.5"), 2.5);
    /// assert_eq!(FormatOptions::parse_bitrate("abc"), 2.0);
    /// assert_eq!(FormatOptions::parse_bitrate("-1"),  2.0);
    /// ```
    pub fn parse_bitrate(text: &str) -> f64 {
        parse_or(text, "bitrate", DEFAULT_BITRATE_MBPS, |v: &f64| v.is_finite() && *v > 0.0)
    }

    /// Loop count, or 0 (infinite).
    pub fn parse_loop(text: &str) -> u32 {
        parse_or(text, "loop count", DEFAULT_LOOP, |_| true)
    }

    /// Positive frame rate, or 24.
    pub fn parse_fps(text: &str) -> u32 {
        parse_or(text, "fps", DEFAULT_FPS, |v: &u32| *v > 0)
    }

    /// Positive width, or 1280.
    pub fn parse_width(text: &str) -> u32 {
        parse_or(text, "width", DEFAULT_WIDTH, |v: &u32| *v > 0)
    }
}

fn parse_or<T>(text: &str, what: &str, default: T, valid: impl Fn(&T) -> bool) -> T
where
    T: FromStr + Copy + fmt::Display,
{
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return default;
    }
    match trimmed.parse::<T>() {
        Ok(v) if valid(&v) => v,
        _ => {
            log::warn!("[job] invalid {what} '{trimmed}', using {default}");
            default
        }
    }
}

// ── Source ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum JobSource {
    /// A video or animated image decoded by the media library.
    File { path: PathBuf },
    /// Ordered still images played back at a synthetic frame rate.
    Sequence { paths: Vec<PathBuf>, fps: f64 },
}

impl JobSource {
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence { .. })
    }

    /// Path shown to the user and checked for existence. The first frame for
    /// sequences.
    pub fn primary_path(&self) -> Option<&Path> {
        match self {
            Self::File { path }        => Some(path),
            Self::Sequence { paths, .. } => paths.first().map(PathBuf::as_path),
        }
    }

    pub fn display_name(&self) -> String {
        match self {
            Self::File { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            Self::Sequence { paths, .. } => sequence_display_name(paths),
        }
    }

    /// Stem used to name outputs.
    pub fn base_name(&self) -> String {
        match self {
            Self::File { path } => path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "output".to_string()),
            Self::Sequence { paths, .. } => sequence_base_name(paths),
        }
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed { reason: String },
    SourceMissing,
}

impl JobStatus {
    /// Failed with `reason` cut to `REASON_MAX_CHARS` characters.
    ///
    /// ```
    /// use clipshift_core::job::JobStatus;
    /// let s = JobStatus::failed("x".repeat(100));
    /// assert_eq!(s.label().chars().count(), "Failed: ".len() + 40);
    /// ```
    pub fn failed(reason: impl AsRef<str>) -> Self {
        let reason = reason.as_ref().trim();
        Self::Failed { reason: reason.chars().take(REASON_MAX_CHARS).collect() }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Queued | Running | SourceMissing)              => true,
            (Running, Completed | Cancelled | Failed { .. })        => true,
            (Completed | Cancelled | Failed { .. }, Queued)         => true,
            (SourceMissing, SourceMissing)                          => true,
            _                                                       => false,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Queued             => "Queued".into(),
            Self::Running            => "Running".into(),
            Self::Completed          => "Completed".into(),
            Self::Cancelled          => "Cancelled".into(),
            Self::Failed { reason }  => format!("Failed: {reason}"),
            Self::SourceMissing      => "Source missing".into(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ── Thumbnail ─────────────────────────────────────────────────────────────────

/// Cached preview shown next to a queued job. RGBA8, tightly packed.
#[derive(Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl fmt::Debug for Thumbnail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Thumbnail({}x{})", self.width, self.height)
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct ConversionJob {
    pub id:                Uuid,
    /// Display name: file name, or the sequence label.
    pub name:              String,
    pub source:            JobSource,
    /// Trim in-point, seconds. For Thumbnail jobs, the frame to grab.
    pub start:             f64,
    /// Trim out-point. `None` means "to the end of the source", resolved when
    /// the job runs.
    pub end:               Option<f64>,
    pub width:             u32,
    pub fps:               u32,
    pub format:            ExportFormat,
    pub options:           FormatOptions,
    pub crop:              CropRegion,
    pub crop_enabled:      bool,
    pub keep_transparency: bool,
    pub grade:             GradeSettings,
    pub thumbnail:         Option<Thumbnail>,
    pub status:            JobStatus,
    /// Filled by analysis; `None` until probed.
    pub media:             Option<MediaInfo>,
}

impl ConversionJob {
    /// A job over the whole of `source` with default settings.
    pub fn new(source: JobSource, format: ExportFormat) -> Self {
        Self {
            id:                Uuid::new_v4(),
            name:              source.display_name(),
            source,
            start:             0.0,
            end:               None,
            width:             DEFAULT_WIDTH,
            fps:               DEFAULT_FPS,
            format,
            options:           FormatOptions::default(),
            crop:              CropRegion::full(),
            crop_enabled:      false,
            keep_transparency: true,
            grade:             GradeSettings::default(),
            thumbnail:         None,
            status:            JobStatus::Queued,
            media:             None,
        }
    }

    /// Concrete `[start, end)` for a source `duration` seconds long. `end`
    /// falls back to `duration`, both ends clamp into the source, and the
    /// window is never inverted.
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use clipshift_core::job::{ConversionJob, ExportFormat, JobSource};
    /// let mut job = ConversionJob::new(JobSource::File { path: PathBuf::from("a.mp4") }, ExportFormat::Gif);
    /// job.start = 2.0;
    /// assert_eq!(job.trim_window(10.0), (2.0, 10.0));
    /// job.end = Some(5.0);
    /// assert_eq!(job.trim_window(10.0), (2.0, 5.0));
    /// job.end = Some(50.0);
    /// assert_eq!(job.trim_window(10.0), (2.0, 10.0));
    /// ```
    pub fn trim_window(&self, duration: f64) -> (f64, f64) {
        let duration = duration.max(0.0);
        let start    = if self.start.is_finite() { self.start.clamp(0.0, duration) } else { 0.0 };
        let end      = self.end.filter(|e| e.is_finite()).unwrap_or(duration).clamp(start, duration);
        (start, end)
    }

    /// Output name before uniqueness is applied, as `(stem, extension)`.
    /// The extension is empty for Sequence, whose output is a directory.
    pub fn output_name(&self) -> (String, &'static str) {
        let base  = self.source.base_name();
        let still = self.options.still_format;
        match self.format {
            ExportFormat::Thumbnail => (format!("{base}_thumb"), still.extension()),
            ExportFormat::Sequence  => (base, ""),
            f                       => (base, f.extension(still)),
        }
    }

    pub fn output_file_name(&self) -> String {
        let (stem, ext) = self.output_name();
        format!("{stem}{ext}")
    }

    /// True when transparency should survive into the output: the user
    /// asked for it, the source has alpha, and the format can carry it.
    pub fn wants_alpha(&self, source_has_alpha: bool) -> bool {
        if !(self.keep_transparency && source_has_alpha) {
            return false;
        }
        match self.format {
            ExportFormat::Mp4                             => false,
            ExportFormat::Sequence | ExportFormat::Thumbnail => self.options.still_format.supports_alpha(),
            _                                             => true,
        }
    }
}
