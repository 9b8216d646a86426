// crates/clipshift-core/src/queue.rs
//
// Ordered job queue with a single edit lock.
//
// Insertion order is display order and execution order. At most one job is
// "open for edit" at a time (`editing`); committing the front-end state while
// a job is open merges into that job instead of appending.
//
// The queue is plain data. clipshift-media wraps it in a Mutex and the
// runner only ever touches `status` through `set_status`, which enforces the
// JobStatus transition table.

use thiserror::Error;

use crate::crop::CropRegion;
use crate::grade::GradeSettings;
use crate::job::{ConversionJob, ExportFormat, FormatOptions, JobSource, JobStatus, StillFormat, Thumbnail};
use crate::media_types::MediaInfo;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("no job at index {index} (queue has {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("job {0} is running and cannot be modified")]
    JobRunning(usize),
    #[error("job {0} has no source file on disk")]
    SourceMissing(usize),
    #[error("illegal status change {from} -> {to}")]
    IllegalTransition { from: String, to: String },
}

// ── Edit state ────────────────────────────────────────────────────────────────

/// The front-end's current settings, committed to the queue by
/// `add_or_update`. Also what `begin_edit` hands back so the front-end can
/// load a job.
#[derive(Clone, Debug, PartialEq)]
pub struct EditState {
    pub source:            JobSource,
    pub start:             f64,
    pub end:               Option<f64>,
    /// Seconds; the grab point for Thumbnail jobs.
    pub playhead:          f64,
    pub width:             u32,
    pub fps:               u32,
    pub format:            ExportFormat,
    pub options:           FormatOptions,
    pub crop:              CropRegion,
    pub crop_enabled:      bool,
    pub keep_transparency: bool,
    pub grade:             GradeSettings,
    pub media:             Option<MediaInfo>,
}

impl EditState {
    pub fn from_job(job: &ConversionJob) -> Self {
        Self {
            source:            job.source.clone(),
            start:             job.start,
            end:               job.end,
            playhead:          job.start,
            width:             job.width,
            fps:               job.fps,
            format:            job.format,
            options:           job.options,
            crop:              job.crop,
            crop_enabled:      job.crop_enabled,
            keep_transparency: job.keep_transparency,
            grade:             job.grade,
            media:             job.media,
        }
    }

    /// Where the job's cached thumbnail (and a Thumbnail job's output frame)
    /// is taken from.
    pub fn capture_time(&self) -> f64 {
        if self.format == ExportFormat::Thumbnail { self.playhead } else { self.start }
    }

    /// Copy every setting onto `job`. The source and the job's identity stay.
    fn merge_into(&self, job: &mut ConversionJob) {
        job.start             = self.capture_time();
        job.end               = self.end;
        job.width             = self.width;
        job.fps               = self.fps;
        job.format            = self.format;
        job.options           = self.options;
        job.crop              = self.crop;
        job.crop_enabled      = self.crop_enabled;
        job.keep_transparency = self.keep_transparency;
        job.grade             = self.grade.clamped();
        if self.media.is_some() {
            job.media = self.media;
        }
    }
}

/// Partial settings applied to many jobs at once. Trim, crop and grade are
/// deliberately absent: bulk edits never touch them.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BulkSettings {
    pub width:             Option<u32>,
    pub fps:               Option<u32>,
    pub format:            Option<ExportFormat>,
    pub loop_count:        Option<u32>,
    pub bitrate_mbps:      Option<f64>,
    pub still_format:      Option<StillFormat>,
    pub keep_transparency: Option<bool>,
}

impl BulkSettings {
    fn apply(&self, job: &mut ConversionJob) {
        if let Some(v) = self.width             { job.width = v; }
        if let Some(v) = self.fps               { job.fps = v; }
        if let Some(v) = self.format            { job.format = v; }
        if let Some(v) = self.loop_count        { job.options.loop_count = v; }
        if let Some(v) = self.bitrate_mbps      { job.options.bitrate_mbps = v; }
        if let Some(v) = self.still_format      { job.options.still_format = v; }
        if let Some(v) = self.keep_transparency { job.keep_transparency = v; }
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Queue {
    jobs:    Vec<ConversionJob>,
    editing: Option<usize>,
}

impl Queue {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.jobs.len() }

    pub fn is_empty(&self) -> bool { self.jobs.is_empty() }

    pub fn jobs(&self) -> &[ConversionJob] { &self.jobs }

    pub fn get(&self, index: usize) -> Result<&ConversionJob, QueueError> {
        self.jobs.get(index).ok_or(QueueError::IndexOutOfRange { index, len: self.jobs.len() })
    }

    pub fn editing_index(&self) -> Option<usize> { self.editing }

    pub fn is_running(&self) -> bool {
        self.jobs.iter().any(|j| j.status.is_running())
    }

    /// Append already-built jobs (folder scan, import). Returns the index of
    /// the first appended job.
    pub fn extend(&mut self, jobs: impl IntoIterator<Item = ConversionJob>) -> usize {
        let first = self.jobs.len();
        self.jobs.extend(jobs);
        first
    }

    /// Commit the front-end state.
    ///
    /// With a job open for edit, merge `edit` into it, re-capture its
    /// thumbnail from the job's start time, reset it to `Queued`, and close
    /// edit mode. Otherwise append a fresh snapshot with a thumbnail taken at
    /// the playhead (Thumbnail jobs) or the trim-in point.
    ///
    /// `thumbnail(t, grade)` renders the graded preview; `None` leaves the job
    /// without one.
    pub fn add_or_update<F>(&mut self, edit: &EditState, thumbnail: F) -> Result<usize, QueueError>
    where
        F: FnOnce(f64, &GradeSettings) -> Option<Thumbnail>,
    {
        if let Some(index) = self.editing {
            let len = self.jobs.len();
            let job = self.jobs.get_mut(index).ok_or(QueueError::IndexOutOfRange { index, len })?;
            if job.status.is_running() {
                return Err(QueueError::JobRunning(index));
            }
            edit.merge_into(job);
            if let Some(t) = thumbnail(job.start, &job.grade) {
                job.thumbnail = Some(t);
            }
            if job.status != JobStatus::SourceMissing {
                job.status = JobStatus::Queued;
            }
            self.editing = None;
            log::info!("[queue] updated job {index}: {}", job.name);
            return Ok(index);
        }

        let mut job = ConversionJob::new(edit.source.clone(), edit.format);
        job.media = edit.media;
        edit.merge_into(&mut job);
        job.thumbnail = thumbnail(job.start, &job.grade);
        log::info!("[queue] added {} ({})", job.name, job.format);
        self.jobs.push(job);
        Ok(self.jobs.len() - 1)
    }

    /// Open job `index` for editing and return its settings.
    pub fn begin_edit(&mut self, index: usize) -> Result<EditState, QueueError> {
        let job = self.get(index)?;
        match job.status {
            JobStatus::Running       => return Err(QueueError::JobRunning(index)),
            JobStatus::SourceMissing => return Err(QueueError::SourceMissing(index)),
            _ => {}
        }
        let state = EditState::from_job(job);
        self.editing = Some(index);
        Ok(state)
    }

    /// Leave edit mode without changes. Returns the job's stored settings so
    /// the front-end can restore them.
    pub fn cancel_edit(&mut self) -> Option<EditState> {
        let index = self.editing.take()?;
        self.jobs.get(index).map(EditState::from_job)
    }

    /// Remove job `index`. Removing before the open job shifts the edit lock
    /// down by one; removing the open job closes edit mode.
    pub fn remove(&mut self, index: usize) -> Result<ConversionJob, QueueError> {
        if self.get(index)?.status.is_running() {
            return Err(QueueError::JobRunning(index));
        }
        let job = self.jobs.remove(index);
        self.editing = match self.editing {
            Some(e) if e == index => None,
            Some(e) if e > index  => Some(e - 1),
            other                 => other,
        };
        Ok(job)
    }

    /// Apply `settings` to each listed job and reset it to `Queued`.
    /// Running and source-missing jobs are skipped. Returns how many changed.
    pub fn bulk_update(&mut self, indices: &[usize], settings: &BulkSettings) -> usize {
        let mut changed = 0;
        for &i in indices {
            let Some(job) = self.jobs.get_mut(i) else { continue };
            if job.status.is_running() || job.status == JobStatus::SourceMissing {
                continue;
            }
            settings.apply(job);
            job.status = JobStatus::Queued;
            changed += 1;
        }
        log::info!("[queue] bulk update applied to {changed}/{} jobs", indices.len());
        changed
    }

    /// Put finished jobs back to `Queued` so they run again.
    pub fn requeue(&mut self, indices: &[usize]) -> usize {
        let mut changed = 0;
        for &i in indices {
            if let Some(job) = self.jobs.get_mut(i) {
                if job.status.is_terminal() {
                    job.status = JobStatus::Queued;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Empty the queue and close edit mode. Refused while a job runs.
    pub fn clear(&mut self) -> Result<(), QueueError> {
        if let Some(i) = self.jobs.iter().position(|j| j.status.is_running()) {
            return Err(QueueError::JobRunning(i));
        }
        self.jobs.clear();
        self.editing = None;
        Ok(())
    }

    /// Drop every `Completed` job, keeping the edit lock on the same job.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.jobs.len();
        let editing_id = self.editing.and_then(|i| self.jobs.get(i)).map(|j| j.id);
        self.jobs.retain(|j| j.status != JobStatus::Completed);
        self.editing = editing_id.and_then(|id| self.jobs.iter().position(|j| j.id == id));
        before - self.jobs.len()
    }

    /// Change one job's status, enforcing the transition table.
    pub fn set_status(&mut self, index: usize, status: JobStatus) -> Result<(), QueueError> {
        let len = self.jobs.len();
        let job = self.jobs.get_mut(index).ok_or(QueueError::IndexOutOfRange { index, len })?;
        if !job.status.can_transition_to(&status) {
            return Err(QueueError::IllegalTransition {
                from: job.status.label(),
                to:   status.label(),
            });
        }
        job.status = status;
        Ok(())
    }

    /// Indices of every `Queued` job, in order.
    pub fn queued_indices(&self) -> Vec<usize> {
        self.jobs
            .iter()
            .enumerate()
            .filter(|(_, j)| j.status == JobStatus::Queued)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn edit(name: &str) -> EditState {
        EditState {
            source:            JobSource::File { path: PathBuf::from(format!("/v/{name}.mp4")) },
            start:             1.0,
            end:               Some(4.0),
            playhead:          2.5,
            width:             640,
            fps:               12,
            format:            ExportFormat::Gif,
            options:           FormatOptions::default(),
            crop:              CropRegion::full(),
            crop_enabled:      false,
            keep_transparency: true,
            grade:             GradeSettings::default(),
            media:             None,
        }
    }

    fn thumb() -> Option<Thumbnail> {
        Some(Thumbnail { width: 1, height: 1, data: vec![0, 0, 0, 255] })
    }

    fn queue_of(n: usize) -> Queue {
        let mut q = Queue::new();
        for i in 0..n {
            q.add_or_update(&edit(&format!("c{i}")), |_, _| None).unwrap();
        }
        q
    }

    #[test]
    fn thumbnail_time_is_trim_in_or_playhead() {
        let mut q = Queue::new();
        let mut seen = Vec::new();
        q.add_or_update(&edit("a"), |t, _| { seen.push(t); thumb() }).unwrap();

        let mut t = edit("b");
        t.format = ExportFormat::Thumbnail;
        q.add_or_update(&t, |t, _| { seen.push(t); thumb() }).unwrap();

        assert_eq!(seen, vec![1.0, 2.5]);
        assert_eq!(q.get(1).unwrap().start, 2.5);
        assert!(q.get(0).unwrap().thumbnail.is_some());
    }

    #[test]
    fn queued_job_does_not_alias_edit_state() {
        let mut q = Queue::new();
        let mut e = edit("a");
        e.grade.enabled = true;
        e.grade.exposure = 10.0;
        q.add_or_update(&e, |_, _| None).unwrap();
        e.grade.exposure = 90.0;
        assert_eq!(q.get(0).unwrap().grade.exposure, 10.0);
    }

    #[test]
    fn update_merges_into_open_job_and_requeues() {
        let mut q = queue_of(2);
        q.set_status(1, JobStatus::Running).unwrap();
        q.set_status(1, JobStatus::failed("boom")).unwrap();

        let mut state = q.begin_edit(1).unwrap();
        assert_eq!(q.editing_index(), Some(1));
        state.width = 320;
        state.grade.enabled = true;

        let mut graded = false;
        let idx = q.add_or_update(&state, |t, g| { graded = g.enabled && t == 1.0; thumb() }).unwrap();
        assert_eq!(idx, 1);
        assert!(graded);
        assert_eq!(q.len(), 2);
        assert_eq!(q.get(1).unwrap().width, 320);
        assert_eq!(q.get(1).unwrap().status, JobStatus::Queued);
        assert_eq!(q.editing_index(), None);
    }

    #[test]
    fn begin_edit_rejects_running_and_missing() {
        let mut q = queue_of(2);
        q.set_status(0, JobStatus::Running).unwrap();
        q.set_status(1, JobStatus::SourceMissing).unwrap();
        assert_eq!(q.begin_edit(0), Err(QueueError::JobRunning(0)));
        assert_eq!(q.begin_edit(1), Err(QueueError::SourceMissing(1)));
        assert_eq!(q.begin_edit(7).unwrap_err(), QueueError::IndexOutOfRange { index: 7, len: 2 });
    }

    #[test]
    fn remove_before_open_job_shifts_lock() {
        let mut q = queue_of(4);
        q.begin_edit(2).unwrap();
        q.remove(0).unwrap();
        assert_eq!(q.editing_index(), Some(1));
        q.remove(2).unwrap();
        assert_eq!(q.editing_index(), Some(1));
    }

    #[test]
    fn remove_open_job_clears_edit_mode() {
        let mut q = queue_of(3);
        q.begin_edit(1).unwrap();
        q.remove(1).unwrap();
        assert_eq!(q.editing_index(), None);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn remove_running_job_is_refused() {
        let mut q = queue_of(1);
        q.set_status(0, JobStatus::Running).unwrap();
        assert_eq!(q.remove(0).unwrap_err(), QueueError::JobRunning(0));
    }

    #[test]
    fn bulk_update_leaves_trim_crop_grade_alone() {
        let mut q = queue_of(3);
        q.set_status(2, JobStatus::Running).unwrap();
        q.set_status(2, JobStatus::Completed).unwrap();
        let before = q.get(0).unwrap().clone();

        let s = BulkSettings { width: Some(800), format: Some(ExportFormat::WebP), ..Default::default() };
        assert_eq!(q.bulk_update(&[0, 2, 9], &s), 2);

        let after = q.get(0).unwrap();
        assert_eq!(after.width, 800);
        assert_eq!(after.format, ExportFormat::WebP);
        assert_eq!((after.start, after.end), (before.start, before.end));
        assert_eq!(after.crop, before.crop);
        assert_eq!(after.grade, before.grade);
        assert_eq!(q.get(2).unwrap().status, JobStatus::Queued);
        assert_eq!(q.get(1).unwrap().width, 640);
    }

    #[test]
    fn running_to_queued_is_illegal() {
        let mut q = queue_of(1);
        q.set_status(0, JobStatus::Running).unwrap();
        assert!(matches!(
            q.set_status(0, JobStatus::Queued),
            Err(QueueError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn clear_finished_keeps_lock_on_same_job() {
        let mut q = queue_of(3);
        q.set_status(0, JobStatus::Running).unwrap();
        q.set_status(0, JobStatus::Completed).unwrap();
        let id = q.get(2).unwrap().id;
        q.begin_edit(2).unwrap();
        assert_eq!(q.clear_finished(), 1);
        assert_eq!(q.editing_index(), Some(1));
        assert_eq!(q.get(1).unwrap().id, id);
    }

    #[test]
    fn clear_refused_while_running() {
        let mut q = queue_of(2);
        q.set_status(1, JobStatus::Running).unwrap();
        assert_eq!(q.clear(), Err(QueueError::JobRunning(1)));
        q.set_status(1, JobStatus::Cancelled).unwrap();
        q.begin_edit(0).unwrap();
        q.clear().unwrap();
        assert!(q.is_empty());
        assert_eq!(q.editing_index(), None);
    }

    #[test]
    fn cancel_edit_returns_stored_settings() {
        let mut q = queue_of(1);
        let mut s = q.begin_edit(0).unwrap();
        s.width = 99;
        let restored = q.cancel_edit().unwrap();
        assert_eq!(restored.width, 640);
        assert!(q.cancel_edit().is_none());
    }

    #[test]
    fn requeue_only_touches_finished_jobs() {
        let mut q = queue_of(2);
        q.set_status(0, JobStatus::Running).unwrap();
        q.set_status(0, JobStatus::Cancelled).unwrap();
        assert_eq!(q.requeue(&[0, 1]), 1);
        assert_eq!(q.queued_indices(), vec![0, 1]);
    }
}
