//! Transcription Pipeline Module
//!
//! Gates speech-to-text jobs behind the admission controller. A job is
//! rejected early when its media is too large, fetched into the cache
//! directory, admitted (or refused) by the per-user quota, then handed to
//! the transcription provider.

pub mod job;
pub mod source;
pub mod transcriber;

use thiserror::Error;

pub use job::{JobOutcome, JobPipeline};
pub use source::{LocalFileSource, MediaInfo, MediaSource};
pub use transcriber::{HttpTranscriber, Transcriber};

/// Errors raised while fetching or transcribing media
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Invalid media: {0}")]
    InvalidMedia(String),
}
