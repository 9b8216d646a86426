// crates/clipshift-media/src/exec.rs
//
// Per-run execution context handed to every encode call.
//
// Holds the three things a long loop needs from the outside world:
//   CancelToken   polled at every frame / every encoder output line
//   PauseToken    blocks the loop in a sleep-poll while set
//   ProgressSink  receives throttled progress ticks
//
// Nothing here is global. Each run (single conversion, batch job, proxy
// build) gets its own context, so cancelling one never reaches another.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use clipshift_core::helpers::time::eta_text;
use clipshift_core::media_types::{MediaResult, ProgressUpdate};
use clipshift_core::PipelineConfig;

use crate::error::{PipelineError, PipelineResult};

// ── Tokens ────────────────────────────────────────────────────────────────────

/// Cooperative cancellation flag. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self { Self::default() }

    pub fn cancel(&self) { self.0.store(true, Ordering::Relaxed); }

    pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::Relaxed) }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> PipelineResult<()> {
        if self.is_cancelled() { Err(PipelineError::Cancelled) } else { Ok(()) }
    }
}

/// Pause flag. A paused loop keeps all of its state and resumes on the same
/// frame.
///
/// In-process encodes stop at their next frame. The direct ffmpeg path stops
/// reading the encoder's output, so the child only blocks once its stderr
/// backlog fills and may finish a few more seconds of output first.
#[derive(Clone, Debug, Default)]
pub struct PauseToken(Arc<AtomicBool>);

impl PauseToken {
    pub fn new() -> Self { Self::default() }

    pub fn pause(&self) { self.0.store(true, Ordering::Relaxed); }

    pub fn resume(&self) { self.0.store(false, Ordering::Relaxed); }

    /// Flip and return the new state (`true` = now paused).
    pub fn toggle(&self) -> bool { !self.0.fetch_xor(true, Ordering::Relaxed) }

    pub fn is_paused(&self) -> bool { self.0.load(Ordering::Relaxed) }
}

// ── Progress sink ─────────────────────────────────────────────────────────────

/// Where progress goes. One method so any front-end can implement it.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// Forwards progress onto the worker result channel.
pub struct ChannelSink {
    tx: Sender<MediaResult>,
}

impl ChannelSink {
    pub fn new(tx: Sender<MediaResult>) -> Self { Self { tx } }
}

impl ProgressSink for ChannelSink {
    fn report(&self, update: ProgressUpdate) {
        let _ = self.tx.send(MediaResult::Progress(update));
    }
}

/// Discards everything.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&self, _update: ProgressUpdate) {}
}

// ── Context ───────────────────────────────────────────────────────────────────

pub struct ExecContext {
    cancel:      CancelToken,
    pause:       PauseToken,
    sink:        Arc<dyn ProgressSink>,
    job_index:   Option<usize>,
    label:       String,
    jobs_after:  usize,
    interval:    Duration,
    poll:        Duration,
    started:     Instant,
    paused_for:  Cell<Duration>,
    last_report: Cell<Option<Instant>>,
}

impl ExecContext {
    pub fn new(cancel: CancelToken, pause: PauseToken, sink: Arc<dyn ProgressSink>) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            cancel,
            pause,
            sink,
            job_index:   None,
            label:       String::new(),
            jobs_after:  0,
            interval:    defaults.progress_interval(),
            poll:        defaults.pause_poll(),
            started:     Instant::now(),
            paused_for:  Cell::new(Duration::ZERO),
            last_report: Cell::new(None),
        }
    }

    /// Context that can only be cancelled through the returned token; no
    /// pause, no progress. Used by tests and one-shot helpers.
    pub fn detached() -> (Self, CancelToken) {
        let cancel = CancelToken::new();
        (Self::new(cancel.clone(), PauseToken::new(), Arc::new(NullSink)), cancel)
    }

    /// Tag progress with a queue position. `jobs_after` feeds the batch ETA.
    pub fn with_job(mut self, job_index: Option<usize>, label: impl Into<String>, jobs_after: usize) -> Self {
        self.job_index  = job_index;
        self.label      = label.into();
        self.jobs_after = jobs_after;
        self
    }

    pub fn with_timing(mut self, config: &PipelineConfig) -> Self {
        self.interval = config.progress_interval();
        self.poll     = config.pause_poll();
        self
    }

    pub fn cancel_token(&self) -> &CancelToken { &self.cancel }

    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    /// Suspension point. Returns `Err(Cancelled)` if cancelled; blocks in a
    /// sleep-poll while paused, still honoring cancel.
    pub fn checkpoint(&self) -> PipelineResult<()> {
        self.cancel.check()?;
        if !self.pause.is_paused() {
            return Ok(());
        }
        let since = Instant::now();
        log::debug!("[exec] paused");
        while self.pause.is_paused() {
            if self.cancel.is_cancelled() {
                self.paused_for.set(self.paused_for.get() + since.elapsed());
                return Err(PipelineError::Cancelled);
            }
            thread::sleep(self.poll);
        }
        self.paused_for.set(self.paused_for.get() + since.elapsed());
        log::debug!("[exec] resumed");
        self.cancel.check()
    }

    /// Working time so far, excluding time spent paused.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed().saturating_sub(self.paused_for.get())
    }

    /// Report `fraction` complete. Rate-limited to one tick per interval;
    /// the first tick and completion always go through.
    pub fn report(&self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        let now = Instant::now();
        let due = match self.last_report.get() {
            None       => true,
            Some(last) => fraction >= 1.0 || now.duration_since(last) >= self.interval,
        };
        if !due {
            return;
        }
        self.last_report.set(Some(now));
        self.sink.report(ProgressUpdate {
            job_index: self.job_index,
            fraction,
            label:     self.label.clone(),
            eta:       eta_text(fraction, self.elapsed().as_secs_f64(), self.jobs_after),
        });
    }

    /// Report `done / total` frames.
    pub fn report_frames(&self, done: usize, total: usize) {
        if total > 0 {
            self.report(done as f64 / total as f64);
        }
    }
}
