// crates/clipshift-media/src/error.rs
//
// Pipeline error taxonomy.
//
// `Cancelled` is a clean abort, never a failure: the runner maps it to the
// job's Cancelled status and stops the batch. Everything else fails only the
// job it happened in.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("cancelled")]
    Cancelled,

    #[error("cannot read {}: {reason}", path.display())]
    SourceUnreadable { path: PathBuf, reason: String },

    #[error("encoder exited with code {code:?}: {detail}")]
    EncoderProcess { code: Option<i32>, detail: String },

    #[error("invalid setting: {0}")]
    Validation(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("job file: {0}")]
    JobFile(#[from] clipshift_core::jobfile::JobFileError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_the_third::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::SourceUnreadable { path: path.into(), reason: reason.to_string() }
    }

    /// Short text for the job record. The exit code leads for process
    /// failures so it survives truncation.
    pub fn job_reason(&self) -> String {
        match self {
            Self::EncoderProcess { code: Some(c), detail } => format!("exit {c}: {detail}"),
            Self::EncoderProcess { code: None, detail }    => format!("killed: {detail}"),
            Self::SourceUnreadable { reason, .. }          => format!("unreadable: {reason}"),
            other                                          => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_cancelled_is_cancelled() {
        assert!(PipelineError::Cancelled.is_cancelled());
        assert!(!PipelineError::Encode("x".into()).is_cancelled());
    }

    #[test]
    fn job_reason_leads_with_exit_code() {
        let e = PipelineError::EncoderProcess { code: Some(183), detail: "Invalid argument".into() };
        assert_eq!(e.job_reason(), "exit 183: Invalid argument");
    }
}
