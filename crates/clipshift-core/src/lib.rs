// crates/clipshift-core/src/lib.rs
//
// Pure data for the conversion pipeline: grading math, crop geometry, jobs,
// the queue and its edit lock, the job-file contract, and the message types
// that cross the channel between clipshift-media and whatever front-end is
// driving it. No ffmpeg, no decoders, no threads.

pub mod config;
pub mod crop;
pub mod grade;
pub mod helpers;
pub mod job;
pub mod jobfile;
pub mod media_types;
pub mod queue;

pub use config::PipelineConfig;
pub use crop::CropRegion;
pub use grade::GradeSettings;
pub use job::{ConversionJob, ExportFormat, FormatOptions, JobSource, JobStatus, StillFormat, Thumbnail};
pub use queue::{BulkSettings, EditState, Queue, QueueError};
