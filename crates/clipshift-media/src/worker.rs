// crates/clipshift-media/src/worker.rs
//
// MediaWorker: the one handle a front-end holds. Owns the queue, the job
// runner and the proxy manager, spawns a thread per long operation, and
// reports everything on one result channel (`rx`).
//
// None of the spawning methods block. Control calls (pause, cancel) go
// straight to the runner's tokens and take effect at the running job's next
// suspension point.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use uuid::Uuid;

use clipshift_core::grade::GradeSettings;
use clipshift_core::job::{ConversionJob, JobSource};
use clipshift_core::media_types::{MediaInfo, MediaResult};
use clipshift_core::{EditState, PipelineConfig, Queue, QueueError, Thumbnail};

use crate::analyze::analyze_all;
use crate::error::PipelineResult;
use crate::jobio;
use crate::proxy::ProxyManager;
use crate::runner::{JobRunner, PipelineExecutor, RunnerState};
use crate::scan::{self, ScanOptions};
use crate::thumbnail;

/// Result channel depth. Progress is throttled, so this only fills when the
/// front-end stops draining.
const RESULT_BACKLOG: usize = 512;

pub struct MediaWorker {
    /// Every result: progress, job outcomes, scans, imports, thumbnails,
    /// proxy events.
    pub rx:   Receiver<MediaResult>,
    tx:       Sender<MediaResult>,
    config:   PipelineConfig,
    queue:    Arc<Mutex<Queue>>,
    runner:   Arc<JobRunner>,
    proxy:    ProxyManager,
    shutdown: Arc<AtomicBool>,
}

impl MediaWorker {
    pub fn new(config: PipelineConfig) -> Self {
        let (tx, rx) = bounded(RESULT_BACKLOG);
        let queue    = Arc::new(Mutex::new(Queue::new()));
        let runner   = Arc::new(JobRunner::new(Arc::clone(&queue), tx.clone(), config.clone()));
        let proxy    = ProxyManager::new(&config, tx.clone());
        Self {
            rx,
            tx,
            config,
            queue,
            runner,
            proxy,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &PipelineConfig { &self.config }

    /// The queue. Lock briefly; the runner takes the same lock between jobs.
    pub fn queue(&self) -> &Arc<Mutex<Queue>> { &self.queue }

    pub fn runner_state(&self) -> RunnerState { self.runner.state() }

    pub fn proxy(&self) -> &ProxyManager { &self.proxy }

    fn error(&self, msg: impl Into<String>) {
        let _ = self.tx.send(MediaResult::Error { msg: msg.into() });
    }

    // ── Queue edits ───────────────────────────────────────────────────────────

    /// Commit the front-end state to the queue, capturing a graded thumbnail.
    /// Blocks for the thumbnail grab; the queue stays unlocked meanwhile.
    pub fn commit_edit(&self, edit: &EditState) -> Result<usize, QueueError> {
        let config = &self.config;
        commit_with(&self.queue, edit, |at, grade| {
            thumbnail::capture(&edit.source, at, grade, edit.media, config)
                .map_err(|e| log::warn!("[queue] thumbnail failed: {e}"))
                .ok()
        })
    }

    // ── Conversion ────────────────────────────────────────────────────────────

    /// Run the jobs at `indices` (every `Queued` job when `None`) into
    /// `out_dir` on a background thread.
    pub fn start_batch(&self, out_dir: PathBuf, indices: Option<Vec<usize>>) {
        if self.runner.is_running() {
            self.error("a conversion is already running");
            return;
        }
        let runner   = Arc::clone(&self.runner);
        let executor = PipelineExecutor::new(out_dir, self.config.clone());
        let sd       = Arc::clone(&self.shutdown);
        let tx       = self.tx.clone();
        thread::spawn(move || {
            if sd.load(Ordering::Relaxed) {
                return;
            }
            let result = match indices {
                Some(indices) => runner.run_batch(&indices, &executor),
                None          => runner.run_queued(&executor),
            };
            if let Err(e) = result {
                let _ = tx.send(MediaResult::Error { msg: e.to_string() });
            }
        });
    }

    /// Convert `job` immediately, outside the queue.
    pub fn convert_now(&self, job: ConversionJob, out_dir: PathBuf) {
        let runner   = Arc::clone(&self.runner);
        let executor = PipelineExecutor::new(out_dir, self.config.clone());
        let tx       = self.tx.clone();
        thread::spawn(move || {
            if let Err(e) = runner.convert_now(&job, &executor) {
                if !e.is_cancelled() {
                    let _ = tx.send(MediaResult::Error { msg: e.to_string() });
                }
            }
        });
    }

    pub fn pause(&self) { self.runner.pause(); }

    pub fn resume(&self) { self.runner.resume(); }

    pub fn toggle_pause(&self) -> Option<bool> { self.runner.toggle_pause() }

    pub fn cancel(&self) { self.runner.cancel(); }

    // ── Discovery ─────────────────────────────────────────────────────────────

    /// Scan `root`, analyze what it finds and append the jobs to the queue.
    pub fn scan_folder(&self, root: PathBuf, options: ScanOptions) {
        let tx     = self.tx.clone();
        let queue  = Arc::clone(&self.queue);
        let config = self.config.clone();
        let sd     = Arc::clone(&self.shutdown);
        thread::spawn(move || {
            let found = scan::discover(&root, &options);
            if sd.load(Ordering::Relaxed) {
                return;
            }
            let progress = tx.clone();
            let jobs = analyze_all(found, config.analysis_workers, &config, move |done, total| {
                let _ = progress.send(MediaResult::Analyzing { done, total });
            });
            if sd.load(Ordering::Relaxed) {
                return;
            }
            queue.lock().extend(jobs.iter().cloned());
            let _ = tx.send(MediaResult::ScanFinished { jobs });
        });
    }

    /// Import a job list, re-analyze it and append it to the queue.
    pub fn import_jobs(&self, path: PathBuf) {
        let tx     = self.tx.clone();
        let queue  = Arc::clone(&self.queue);
        let config = self.config.clone();
        thread::spawn(move || {
            let progress = tx.clone();
            let on_progress = move |done, total| {
                let _ = progress.send(MediaResult::Analyzing { done, total });
            };
            match jobio::import_jobs(&path, &config, on_progress) {
                Ok(jobs) => {
                    queue.lock().extend(jobs.iter().cloned());
                    let _ = tx.send(MediaResult::ImportFinished { jobs });
                }
                Err(e) => {
                    log::warn!("[queue] import of {} failed: {e}", path.display());
                    let _ = tx.send(MediaResult::Error { msg: format!("import failed: {e}") });
                }
            }
        });
    }

    /// Write the whole queue to `path`.
    pub fn export_jobs(&self, path: &Path) -> PipelineResult<()> {
        let jobs = self.queue.lock().jobs().to_vec();
        jobio::export_jobs_to(path, &jobs)
    }

    /// Grab a thumbnail for job `id` in the background.
    pub fn request_thumbnail(&self, id: Uuid, source: JobSource, at: f64, grade: GradeSettings, media: Option<MediaInfo>) {
        let tx     = self.tx.clone();
        let config = self.config.clone();
        thread::spawn(move || match thumbnail::capture(&source, at, &grade, media, &config) {
            Ok(thumb) => {
                let _ = tx.send(MediaResult::Thumbnail { id, thumb });
            }
            Err(e) => log::warn!("[probe] thumbnail for {id} failed: {e}"),
        });
    }

    // ── Proxy ─────────────────────────────────────────────────────────────────

    /// A source was loaded for preview. Starts a proxy build when it is
    /// large enough; returns the load generation.
    pub fn load_source(&self, source: &JobSource, media: &MediaInfo) -> u64 {
        let generation = self.proxy.begin_load();
        self.proxy.request(generation, source, media);
        generation
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Stop the running conversion and any proxy build, and delete proxy
    /// files. A scan already running finishes its analysis but adds nothing
    /// to the queue.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.runner.cancel();
        self.proxy.cleanup();
    }
}

/// Render the thumbnail `add_or_update` would ask for, then take the queue
/// lock only to store the result. The grab time and grade depend on `edit`
/// alone.
fn commit_with<F>(queue: &Mutex<Queue>, edit: &EditState, grab: F) -> Result<usize, QueueError>
where
    F: FnOnce(f64, &GradeSettings) -> Option<Thumbnail>,
{
    let thumb = grab(edit.capture_time(), &edit.grade.clamped());
    queue.lock().add_or_update(edit, move |_, _| thumb)
}
