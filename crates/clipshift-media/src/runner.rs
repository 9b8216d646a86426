// crates/clipshift-media/src/runner.rs
//
// JobRunner: executes queued jobs one at a time and writes their outcome back
// to the queue.
//
// States:
//   Idle ──run_batch / convert_now──▶ Running { paused } ──done / cancel──▶ Idle
//
// Pause toggles inside Running. A run owns a fresh CancelToken and
// PauseToken, so a cancel aimed at one run never leaks into the next.
//
// Per-job outcome in a batch:
//   Ok              → Completed, next job
//   Err(Cancelled)  → Cancelled, batch stops; later jobs stay Queued
//   Err(other)      → Failed(short reason), next job
//   panic           → Failed("internal error: …"), next job
//
// BatchFinished is sent exactly once per batch, however it ended.
//
// The queue lock is only held to read a job or write its status, never
// across an encode.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use uuid::Uuid;

use clipshift_core::job::{ConversionJob, JobStatus};
use clipshift_core::media_types::{BatchSummary, MediaResult};
use clipshift_core::{PipelineConfig, Queue};

use crate::encode::run_job;
use crate::error::{PipelineError, PipelineResult};
use crate::exec::{CancelToken, ChannelSink, ExecContext, PauseToken, ProgressSink};

// ── Executor seam ─────────────────────────────────────────────────────────────

/// Runs one job. The pipeline implementation encodes to disk; tests swap in
/// fakes.
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &ConversionJob, ctx: &ExecContext) -> PipelineResult<PathBuf>;
}

/// Encodes into `out_dir` with the real pipeline.
pub struct PipelineExecutor {
    out_dir: PathBuf,
    config:  PipelineConfig,
}

impl PipelineExecutor {
    pub fn new(out_dir: impl Into<PathBuf>, config: PipelineConfig) -> Self {
        Self { out_dir: out_dir.into(), config }
    }

    pub fn out_dir(&self) -> &Path { &self.out_dir }
}

impl JobExecutor for PipelineExecutor {
    fn execute(&self, job: &ConversionJob, ctx: &ExecContext) -> PipelineResult<PathBuf> {
        run_job(job, &self.out_dir, ctx, &self.config)
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running { paused: bool },
}

#[derive(Clone)]
struct RunControl {
    cancel: CancelToken,
    pause:  PauseToken,
}

pub struct JobRunner {
    queue:  Arc<Mutex<Queue>>,
    events: Sender<MediaResult>,
    sink:   Arc<dyn ProgressSink>,
    config: PipelineConfig,
    active: Mutex<Option<RunControl>>,
}

/// Clears the active run on every exit path, panics included.
struct ActiveGuard<'a>(&'a Mutex<Option<RunControl>>);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}

impl JobRunner {
    /// Progress and job events go to `events`.
    pub fn new(queue: Arc<Mutex<Queue>>, events: Sender<MediaResult>, config: PipelineConfig) -> Self {
        let sink = Arc::new(ChannelSink::new(events.clone()));
        Self { queue, events, sink, config, active: Mutex::new(None) }
    }

    pub fn queue(&self) -> &Arc<Mutex<Queue>> { &self.queue }

    pub fn state(&self) -> RunnerState {
        match &*self.active.lock() {
            None    => RunnerState::Idle,
            Some(c) => RunnerState::Running { paused: c.pause.is_paused() },
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Request a stop. The running job unwinds at its next suspension point.
    pub fn cancel(&self) {
        if let Some(c) = &*self.active.lock() {
            log::info!("[runner] cancel requested");
            c.cancel.cancel();
        }
    }

    pub fn pause(&self) {
        if let Some(c) = &*self.active.lock() {
            c.pause.pause();
        }
    }

    pub fn resume(&self) {
        if let Some(c) = &*self.active.lock() {
            c.pause.resume();
        }
    }

    /// Flip pause. `None` when idle, else the new paused state.
    pub fn toggle_pause(&self) -> Option<bool> {
        self.active.lock().as_ref().map(|c| c.pause.toggle())
    }

    fn begin(&self) -> PipelineResult<(RunControl, ActiveGuard<'_>)> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(PipelineError::Validation("a conversion is already running".into()));
        }
        let control = RunControl { cancel: CancelToken::new(), pause: PauseToken::new() };
        *active = Some(control.clone());
        Ok((control, ActiveGuard(&self.active)))
    }

    fn context(&self, control: &RunControl) -> ExecContext {
        ExecContext::new(control.cancel.clone(), control.pause.clone(), Arc::clone(&self.sink))
            .with_timing(&self.config)
    }

    fn send(&self, msg: MediaResult) {
        let _ = self.events.send(msg);
    }

    /// Run the jobs at `indices` in order, skipping any that are not
    /// `Queued`. Blocks until the batch ends.
    pub fn run_batch(&self, indices: &[usize], executor: &dyn JobExecutor) -> PipelineResult<BatchSummary> {
        let (control, _guard) = self.begin()?;

        // Jobs are tracked by id; indices may shift if the queue is edited
        // between jobs.
        let ids: Vec<Uuid> = {
            let queue = self.queue.lock();
            indices.iter().filter_map(|&i| queue.get(i).ok().map(|j| j.id)).collect()
        };
        let total = ids.len();
        let mut summary = BatchSummary::default();
        log::info!("[runner] batch of {total} jobs");

        for (pos, id) in ids.iter().enumerate() {
            if control.cancel.is_cancelled() {
                break;
            }

            let claimed = {
                let mut queue = self.queue.lock();
                let found = queue.jobs().iter().position(|j| j.id == *id);
                match found {
                    Some(index) if queue.jobs()[index].status == JobStatus::Queued => {
                        let job = queue.jobs()[index].clone();
                        queue.set_status(index, JobStatus::Running).ok().map(|_| (index, job))
                    }
                    _ => None,
                }
            };
            let Some((index, job)) = claimed else {
                summary.skipped += 1;
                continue;
            };

            self.send(MediaResult::JobStarted { index: Some(index), name: job.name.clone() });
            let label = format!("({}/{}) {}", pos + 1, total, job.name);
            let ctx = self.context(&control).with_job(Some(index), label, total - pos - 1);

            let (status, output) = outcome(&job, execute_guarded(executor, &job, &ctx));
            match status {
                JobStatus::Completed      => summary.completed += 1,
                JobStatus::Cancelled      => summary.cancelled += 1,
                _                         => summary.failed += 1,
            }
            let index = self.write_back(*id, status.clone()).unwrap_or(index);
            self.send(MediaResult::JobFinished { index: Some(index), status: status.clone(), output });

            if status == JobStatus::Cancelled {
                break;
            }
        }

        log::info!(
            "[runner] batch finished: {} completed, {} failed, {} cancelled, {} skipped",
            summary.completed, summary.failed, summary.cancelled, summary.skipped
        );
        self.send(MediaResult::BatchFinished(summary));
        Ok(summary)
    }

    /// Every `Queued` job in queue order.
    pub fn run_queued(&self, executor: &dyn JobExecutor) -> PipelineResult<BatchSummary> {
        let indices = self.queue.lock().queued_indices();
        self.run_batch(&indices, executor)
    }

    /// Run `job` outside the queue. Progress carries `job_index: None`.
    pub fn convert_now(&self, job: &ConversionJob, executor: &dyn JobExecutor) -> PipelineResult<PathBuf> {
        let (control, _guard) = self.begin()?;
        self.send(MediaResult::JobStarted { index: None, name: job.name.clone() });
        let ctx = self.context(&control).with_job(None, job.name.clone(), 0);

        let result = execute_guarded(executor, job, &ctx);
        let (status, output) = match &result {
            Ok(path)                    => (JobStatus::Completed, Some(path.clone())),
            Err(e) if e.is_cancelled()  => (JobStatus::Cancelled, None),
            Err(e)                      => {
                log::warn!("[runner] {} failed: {e}", job.name);
                (JobStatus::failed(e.job_reason()), None)
            }
        };
        self.send(MediaResult::JobFinished { index: None, status, output });
        result
    }

    /// Store the final status; returns the job's current index.
    fn write_back(&self, id: Uuid, status: JobStatus) -> Option<usize> {
        let mut queue = self.queue.lock();
        let index = queue.jobs().iter().position(|j| j.id == id)?;
        if let Err(e) = queue.set_status(index, status) {
            log::warn!("[runner] could not record outcome of job {index}: {e}");
        }
        Some(index)
    }
}

/// Run one job. A panicking executor fails the job instead of unwinding
/// through the runner, so the status write-back and `BatchFinished` still
/// happen.
fn execute_guarded(executor: &dyn JobExecutor, job: &ConversionJob, ctx: &ExecContext) -> PipelineResult<PathBuf> {
    panic::catch_unwind(AssertUnwindSafe(|| executor.execute(job, ctx))).unwrap_or_else(|payload| {
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into());
        log::error!("[runner] {} panicked: {detail}", job.name);
        Err(PipelineError::Encode(format!("internal error: {detail}")))
    })
}

fn outcome(job: &ConversionJob, result: PipelineResult<PathBuf>) -> (JobStatus, Option<PathBuf>) {
    match result {
        Ok(path) => {
            log::info!("[runner] {} → {}", job.name, path.display());
            (JobStatus::Completed, Some(path))
        }
        Err(e) if e.is_cancelled() => {
            log::info!("[runner] {} stopped by user", job.name);
            (JobStatus::Cancelled, None)
        }
        Err(e) => {
            log::warn!("[runner] {} failed: {e}", job.name);
            (JobStatus::failed(e.job_reason()), None)
        }
    }
}
