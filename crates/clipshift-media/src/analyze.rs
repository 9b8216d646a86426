// crates/clipshift-media/src/analyze.rs
//
// Analysis of candidate jobs: source size, frame rate, duration, alpha and a
// preview thumbnail.
//
// Batches run on a private rayon pool sized from config (scan and import use
// different sizes), never the global pool, so a folder of hundreds of files
// fans out to a fixed number of threads. Results keep input order.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use clipshift_core::grade::GradeSettings;
use clipshift_core::job::{ConversionJob, JobSource, JobStatus, Thumbnail};
use clipshift_core::media_types::MediaInfo;
use clipshift_core::PipelineConfig;

use crate::error::PipelineResult;
use crate::probe;
use crate::source::{describe, FrameSource, SequenceSource};
use crate::thumbnail::{self, make_thumbnail, ANALYSIS_TIME};

/// Status given to a job whose source exists but cannot be analyzed.
pub const ANALYSIS_FAILED: &str = "analysis failed";

/// Media info and thumbnail for `source`. A thumbnail failure on a file
/// source is logged and leaves the thumbnail empty; a probe failure is an
/// error.
pub fn analyze_source(
    source: &JobSource,
    grade:  &GradeSettings,
    config: &PipelineConfig,
) -> PipelineResult<(MediaInfo, Option<Thumbnail>)> {
    match source {
        JobSource::Sequence { paths, fps } => {
            let seq   = SequenceSource::new(paths.clone(), *fps)?;
            let media = describe(&seq, *fps);
            let thumb = make_thumbnail(&seq.frame_at(0.0)?, grade);
            Ok((media, Some(thumb)))
        }
        JobSource::File { path } => {
            let media = probe::probe(path, config)?;
            let thumb = match thumbnail::capture(source, ANALYSIS_TIME, grade, Some(media), config) {
                Ok(t)  => Some(t),
                Err(e) => {
                    log::warn!("[probe] no thumbnail for {}: {e}", path.display());
                    None
                }
            };
            Ok((media, thumb))
        }
    }
}

/// Analyze one job in place. Source-missing jobs are left alone; a failed
/// analysis marks the job `Failed`.
pub fn analyze_job(job: &mut ConversionJob, config: &PipelineConfig) {
    if job.status == JobStatus::SourceMissing {
        return;
    }
    match analyze_source(&job.source, &job.grade, config) {
        Ok((media, thumb)) => {
            job.media = Some(media);
            if thumb.is_some() {
                job.thumbnail = thumb;
            }
        }
        Err(e) => {
            log::warn!("[probe] analysis of {} failed: {e}", job.name);
            job.status = JobStatus::failed(ANALYSIS_FAILED);
        }
    }
}

/// Analyze `jobs` on a pool of `workers` threads. `on_progress(done, total)`
/// is called once per finished job, from whichever pool thread finished it.
pub fn analyze_all<F>(
    mut jobs:    Vec<ConversionJob>,
    workers:     usize,
    config:      &PipelineConfig,
    on_progress: F,
) -> Vec<ConversionJob>
where
    F: Fn(usize, usize) + Sync,
{
    let total = jobs.len();
    let done  = AtomicUsize::new(0);
    let step  = |job: &mut ConversionJob| {
        analyze_job(job, config);
        on_progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
    };

    match ThreadPoolBuilder::new().num_threads(workers.max(1)).build() {
        Ok(pool) => pool.install(|| jobs.par_iter_mut().for_each(step)),
        Err(e) => {
            log::warn!("[probe] analysis pool unavailable ({e}); analyzing serially");
            jobs.iter_mut().for_each(step);
        }
    }
    log::info!("[probe] analyzed {total} jobs");
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use clipshift_core::job::ExportFormat;
    use image::{Rgba, RgbaImage};

    fn frames(dir: &std::path::Path, n: u8) -> Vec<PathBuf> {
        (0..n)
            .map(|i| {
                let p = dir.join(format!("img_{i:02}.png"));
                RgbaImage::from_pixel(64, 36, Rgba([i, i, i, 128])).save(&p).unwrap();
                p
            })
            .collect()
    }

    #[test]
    fn sequence_media_comes_from_its_frames() {
        let dir = tempfile::tempdir().unwrap();
        let source = JobSource::Sequence { paths: frames(dir.path(), 12), fps: 6.0 };
        let (media, thumb) = analyze_source(&source, &GradeSettings::default(), &PipelineConfig::default()).unwrap();
        assert_eq!((media.width, media.height), (64, 36));
        assert!((media.duration - 2.0).abs() < 1e-9);
        assert!(media.has_alpha);
        let thumb = thumb.unwrap();
        assert_eq!((thumb.width, thumb.height), (64, 36));
    }

    #[test]
    fn unreadable_file_fails_the_job_only() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("clip.mp4");
        std::fs::write(&bogus, b"definitely not a video").unwrap();

        let config = PipelineConfig {
            ffprobe_bin: PathBuf::from("/nonexistent/ffprobe"),
            ffmpeg_bin:  PathBuf::from("/nonexistent/ffmpeg"),
            ..Default::default()
        };
        let good = ConversionJob::new(
            JobSource::Sequence { paths: frames(dir.path(), 3), fps: 24.0 },
            ExportFormat::Gif,
        );
        let bad = ConversionJob::new(JobSource::File { path: bogus }, ExportFormat::Gif);

        let ticks = Mutex::new(Vec::new());
        let out = analyze_all(vec![bad, good], 2, &config, |done, total| ticks.lock().unwrap().push((done, total)));

        assert_eq!(out[0].status, JobStatus::failed(ANALYSIS_FAILED));
        assert!(out[0].media.is_none());
        assert_eq!(out[1].status, JobStatus::Queued);
        assert!(out[1].media.is_some());

        let mut ticks = ticks.into_inner().unwrap();
        ticks.sort();
        assert_eq!(ticks, vec![(1, 2), (2, 2)]);
    }
}
