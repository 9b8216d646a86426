// crates/clipshift-media/src/lib.rs
//
// Everything that touches files, decoders and processes. The front-end
// talks to MediaWorker and reads MediaResult off its channel; the modules
// below are public for headless use and tests.
//
// Bottom-up:
//   source/   FrameSource, SequenceSource, VideoDecoderSource, transform stack
//   exec      cancel / pause / progress context
//   encode/   one strategy per output format
//   probe, thumbnail, scan, analyze, jobio
//   runner, proxy, worker

pub mod analyze;
pub mod encode;
pub mod error;
pub mod exec;
pub mod helpers;
pub mod jobio;
pub mod probe;
pub mod process;
pub mod proxy;
pub mod runner;
pub mod scan;
pub mod source;
pub mod thumbnail;
pub mod worker;

pub use error::{PipelineError, PipelineResult};
pub use exec::{CancelToken, ExecContext, PauseToken, ProgressSink};
pub use runner::{JobExecutor, JobRunner, PipelineExecutor, RunnerState};
pub use worker::MediaWorker;
pub use clipshift_core::media_types::{MediaResult, ProgressUpdate};

/// Initialize the in-process ffmpeg libraries. Call once at startup.
pub fn init() -> PipelineResult<()> {
    ffmpeg_the_third::init()?;
    Ok(())
}
