// crates/clipshift-core/src/jobfile.rs
//
// Job-list document: a JSON array of flat job records.
//
// Every ConversionJob field except the thumbnail raster is written. Field
// names and encodings are the contract for files shared between installs:
//
//   path            source file, or "Image Sequence" for sequence jobs
//   sequence_paths  frame list (sequence jobs only)
//   end             -1 means "to the end of the source"
//   bitrate         Mbit/s as text, validated on load
//   status          human-readable label; informational only, import
//                   re-derives it from disk
//
// Unknown fields are ignored and missing ones take defaults, so hand-written
// or older files still load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::crop::CropRegion;
use crate::grade::GradeSettings;
use crate::job::{ConversionJob, ExportFormat, FormatOptions, JobSource, JobStatus, StillFormat};

/// `path` value marking a sequence record.
pub const SEQUENCE_MARKER: &str = "Image Sequence";

/// `end` value meaning "to source end".
pub const END_OF_SOURCE: f64 = -1.0;

#[derive(Debug, Error)]
pub enum JobFileError {
    #[error("job file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record {index}: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    pub id:             Option<Uuid>,
    pub path:           String,
    pub filename:       String,
    pub status:         String,
    pub start:          f64,
    pub end:            f64,
    pub fps:            u32,
    pub video_fps:      f64,
    pub width:          u32,
    #[serde(rename = "loop")]
    pub loop_count:     u32,
    pub crop:           CropRegion,
    pub crop_enabled:   bool,
    pub transparent:    bool,
    pub export_format:  ExportFormat,
    pub seq_format:     StillFormat,
    pub bitrate:        String,
    pub is_sequence:    bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence_paths: Option<Vec<PathBuf>>,
    pub color_settings: GradeSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_width:   Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_height:  Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration:       Option<f64>,
}

impl Default for JobRecord {
    fn default() -> Self {
        Self {
            id:             None,
            path:           String::new(),
            filename:       String::new(),
            status:         JobStatus::Queued.label(),
            start:          0.0,
            end:            END_OF_SOURCE,
            fps:            crate::job::DEFAULT_FPS,
            video_fps:      crate::job::DEFAULT_FPS as f64,
            width:          crate::job::DEFAULT_WIDTH,
            loop_count:     0,
            crop:           CropRegion::full(),
            crop_enabled:   false,
            transparent:    true,
            export_format:  ExportFormat::Gif,
            seq_format:     StillFormat::Png,
            bitrate:        "2".to_string(),
            is_sequence:    false,
            sequence_paths: None,
            color_settings: GradeSettings::default(),
            source_width:   None,
            source_height:  None,
            duration:       None,
        }
    }
}

impl From<&ConversionJob> for JobRecord {
    fn from(job: &ConversionJob) -> Self {
        let (path, is_sequence, sequence_paths, video_fps) = match &job.source {
            JobSource::File { path } => (
                path.to_string_lossy().into_owned(),
                false,
                None,
                job.media.map(|m| m.fps).unwrap_or(job.fps as f64),
            ),
            JobSource::Sequence { paths, fps } => (SEQUENCE_MARKER.to_string(), true, Some(paths.clone()), *fps),
        };
        Self {
            id:             Some(job.id),
            path,
            filename:       job.name.clone(),
            status:         job.status.label(),
            start:          job.start,
            end:            job.end.unwrap_or(END_OF_SOURCE),
            fps:            job.fps,
            video_fps,
            width:          job.width,
            loop_count:     job.options.loop_count,
            crop:           job.crop,
            crop_enabled:   job.crop_enabled,
            transparent:    job.keep_transparency,
            export_format:  job.format,
            seq_format:     job.options.still_format,
            bitrate:        format_bitrate(job.options.bitrate_mbps),
            is_sequence,
            sequence_paths,
            color_settings: job.grade,
            source_width:   job.media.map(|m| m.width),
            source_height:  job.media.map(|m| m.height),
            duration:       job.media.map(|m| m.duration),
        }
    }
}

impl JobRecord {
    /// Build a `Queued` job. Relative paths resolve against `base_dir`.
    /// Analysis results are not trusted from the file; `media` stays `None`
    /// until the importer re-probes.
    pub fn into_job(self, index: usize, base_dir: Option<&Path>) -> Result<ConversionJob, JobFileError> {
        let resolve = |p: &Path| match base_dir {
            Some(dir) if p.is_relative() => dir.join(p),
            _                            => p.to_path_buf(),
        };

        let source = if self.is_sequence || self.path == SEQUENCE_MARKER {
            let paths: Vec<PathBuf> = self
                .sequence_paths
                .unwrap_or_default()
                .iter()
                .map(|p| resolve(p))
                .collect();
            if paths.is_empty() {
                return Err(JobFileError::InvalidRecord { index, reason: "sequence has no frames".into() });
            }
            let fps = if self.video_fps.is_finite() && self.video_fps > 0.0 {
                self.video_fps
            } else {
                crate::job::DEFAULT_FPS as f64
            };
            JobSource::Sequence { paths, fps }
        } else {
            if self.path.trim().is_empty() {
                return Err(JobFileError::InvalidRecord { index, reason: "missing source path".into() });
            }
            JobSource::File { path: resolve(Path::new(&self.path)) }
        };

        let mut job = ConversionJob::new(source, self.export_format);
        if let Some(id) = self.id {
            job.id = id;
        }
        if !self.filename.is_empty() {
            job.name = self.filename;
        }
        job.start             = self.start.max(0.0);
        job.end               = (self.end >= 0.0).then_some(self.end);
        job.fps               = if self.fps > 0 { self.fps } else { crate::job::DEFAULT_FPS };
        job.width             = if self.width > 0 { self.width } else { crate::job::DEFAULT_WIDTH };
        job.options           = FormatOptions {
            loop_count:   self.loop_count,
            bitrate_mbps: FormatOptions::parse_bitrate(&self.bitrate),
            still_format: self.seq_format,
        };
        job.crop              = self.crop;
        job.crop_enabled      = self.crop_enabled;
        job.keep_transparency = self.transparent;
        job.grade             = self.color_settings.clamped();
        Ok(job)
    }
}

fn format_bitrate(mbps: f64) -> String {
    if mbps.fract() == 0.0 { format!("{}", mbps as u64) } else { format!("{mbps}") }
}

/// Serialize `jobs` as a pretty-printed JSON array.
pub fn export_jobs(jobs: &[ConversionJob]) -> Result<String, JobFileError> {
    let records: Vec<JobRecord> = jobs.iter().map(JobRecord::from).collect();
    Ok(serde_json::to_string_pretty(&records)?)
}

/// Parse a job-list document into raw records, without building jobs.
pub fn parse_records(text: &str) -> Result<Vec<JobRecord>, JobFileError> {
    Ok(serde_json::from_str(text)?)
}

/// Parse a job-list document into `Queued` jobs.
pub fn parse_jobs(text: &str, base_dir: Option<&Path>) -> Result<Vec<ConversionJob>, JobFileError> {
    parse_records(text)?
        .into_iter()
        .enumerate()
        .map(|(i, r)| r.into_job(i, base_dir))
        .collect()
}
