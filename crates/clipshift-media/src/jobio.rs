// crates/clipshift-media/src/jobio.rs
//
// Job-list files on disk. The document format lives in clipshift-core
// (jobfile.rs); this side reads and writes files and re-checks every source
// against the disk before a job is admitted to the queue.

use std::fs;
use std::path::Path;

use clipshift_core::job::{ConversionJob, JobSource, JobStatus};
use clipshift_core::jobfile::{export_jobs, parse_jobs};
use clipshift_core::PipelineConfig;

use crate::analyze::analyze_all;
use crate::error::PipelineResult;

/// True when the source can still be read from disk. A sequence counts as
/// present while any of its frames exists; missing frames become
/// placeholders at encode time.
pub fn source_exists(source: &JobSource) -> bool {
    match source {
        JobSource::File { path }        => path.is_file(),
        JobSource::Sequence { paths, .. } => paths.iter().any(|p| p.is_file()),
    }
}

/// Read a job list and re-analyze every job. Jobs whose source is gone are
/// kept with status `SourceMissing`; the rest get fresh media info and
/// thumbnails. Relative paths resolve against the file's directory.
pub fn import_jobs<F>(path: &Path, config: &PipelineConfig, on_progress: F) -> PipelineResult<Vec<ConversionJob>>
where
    F: Fn(usize, usize) + Sync,
{
    let text = fs::read_to_string(path)?;
    let mut jobs = parse_jobs(&text, path.parent())?;

    let mut missing = 0;
    for job in &mut jobs {
        if !source_exists(&job.source) {
            log::warn!("[queue] import: source missing for {}", job.name);
            job.status = JobStatus::SourceMissing;
            missing += 1;
        }
    }
    log::info!("[queue] importing {} jobs ({missing} missing) ← {}", jobs.len(), path.display());

    Ok(analyze_all(jobs, config.import_workers, config, on_progress))
}

/// Write `jobs` as a job list to `path`.
pub fn export_jobs_to(path: &Path, jobs: &[ConversionJob]) -> PipelineResult<()> {
    let text = export_jobs(jobs)?;
    fs::write(path, text)?;
    log::info!("[queue] exported {} jobs → {}", jobs.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use clipshift_core::job::ExportFormat;
    use image::{Rgba, RgbaImage};

    #[test]
    fn export_then_import_keeps_settings_and_order() {
        let dir = tempfile::tempdir().unwrap();
        let frames: Vec<PathBuf> = (1..=4)
            .map(|i| {
                let p = dir.path().join(format!("f_{i}.png"));
                RgbaImage::from_pixel(20, 10, Rgba([0, 0, 255, 255])).save(&p).unwrap();
                p
            })
            .collect();

        let mut seq = ConversionJob::new(JobSource::Sequence { paths: frames, fps: 8.0 }, ExportFormat::WebP);
        seq.width = 10;
        seq.options.loop_count = 3;
        let gone = ConversionJob::new(JobSource::File { path: dir.path().join("gone.mov") }, ExportFormat::Mp4);

        let file = dir.path().join("jobs.json");
        export_jobs_to(&file, &[gone, seq]).unwrap();
        let back = import_jobs(&file, &PipelineConfig::default(), |_, _| {}).unwrap();

        assert_eq!(back.len(), 2);
        assert_eq!(back[0].status, JobStatus::SourceMissing);
        assert!(back[0].media.is_none());

        assert_eq!(back[1].status, JobStatus::Queued);
        assert_eq!(back[1].format, ExportFormat::WebP);
        assert_eq!(back[1].width, 10);
        assert_eq!(back[1].options.loop_count, 3);
        let media = back[1].media.unwrap();
        assert_eq!((media.width, media.height), (20, 10));
        assert!((media.duration - 0.5).abs() < 1e-9);
        assert!(back[1].thumbnail.is_some());
    }

    #[test]
    fn malformed_document_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("jobs.json");
        fs::write(&file, "{ not a list").unwrap();
        assert!(import_jobs(&file, &PipelineConfig::default(), |_, _| {}).is_err());
    }
}
