// crates/clipshift-core/src/media_types.rs
//
// Types that flow across the channel between clipshift-media and the
// front-end. No ffmpeg, no image buffers beyond plain Vec<u8>.

use std::path::PathBuf;

use uuid::Uuid;

use crate::job::{ConversionJob, JobStatus, Thumbnail};

/// What analysis learned about a source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MediaInfo {
    pub width:     u32,
    pub height:    u32,
    pub fps:       f64,
    pub duration:  f64,
    pub has_alpha: bool,
}

/// One throttled progress tick.
///
/// `job_index` is the queue index during a batch and `None` for a single
/// conversion run outside the queue.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressUpdate {
    pub job_index: Option<usize>,
    /// `[0, 1]`
    pub fraction:  f64,
    pub label:     String,
    pub eta:       String,
}

/// Outcome counts reported once when a batch ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed:    usize,
    pub cancelled: usize,
    /// Selected jobs that were not `Queued` and so did not run.
    pub skipped:   usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.completed + self.failed + self.cancelled + self.skipped
    }
}

/// Proxy generation lifecycle. `generation` is the load counter value the
/// request was made under.
#[derive(Clone, Debug, PartialEq)]
pub enum ProxyEvent {
    Started  { generation: u64, height: u32 },
    Progress { generation: u64, fraction: f64 },
    Ready    { generation: u64, path: PathBuf },
    Stopped  { generation: u64 },
    Failed   { generation: u64, msg: String },
    /// Finished after a newer load began; the file was discarded.
    Stale    { generation: u64 },
}

/// Results sent from MediaWorker background threads to the front-end.
#[derive(Debug)]
pub enum MediaResult {
    Progress      (ProgressUpdate),
    JobStarted    { index: Option<usize>, name: String },
    JobFinished   { index: Option<usize>, status: JobStatus, output: Option<PathBuf> },
    BatchFinished (BatchSummary),
    /// `done` of `total` candidates analyzed so far (scan or import).
    Analyzing     { done: usize, total: usize },
    ScanFinished  { jobs: Vec<ConversionJob> },
    ImportFinished{ jobs: Vec<ConversionJob> },
    Thumbnail     { id: Uuid, thumb: Thumbnail },
    Proxy         (ProxyEvent),
    Error         { msg: String },
}
