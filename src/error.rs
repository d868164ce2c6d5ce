//! Error taxonomy for the coding engine.
//!
//! Only conditions that cannot be recovered locally live here. Parse failures of
//! a model response, coverage gaps and classification misses are handled inside
//! the pipeline and never become a `CoderError`.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a failure, used by callers to decide what to tell the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing credentials or unreadable configuration; fatal, never retried
    Configuration,
    /// The completion service rejected the credentials
    Authentication,
    /// The account behind the credentials has no quota left
    Quota,
    /// Too many requests; the caller may try again later
    RateLimit,
    /// Any other failure talking to the completion service
    Service,
    /// Malformed caller input (batch file, answers)
    Input,
    /// Local filesystem failure
    Io,
}

#[derive(Error, Debug)]
pub enum CoderError {
    #[error("API key not found: set the {0} environment variable")]
    MissingCredentials(String),

    #[error("Failed to read config from {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    #[error("Completion service rejected the credentials ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Completion service quota exhausted: {0}")]
    QuotaExceeded(String),

    #[error("Completion service rate limit reached: {0}")]
    RateLimited(String),

    #[error("Completion service returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Completion service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Completion service response had no message content")]
    EmptyCompletion,

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoderError::MissingCredentials(_)
            | CoderError::ConfigRead { .. }
            | CoderError::ConfigParse { .. } => ErrorKind::Configuration,
            CoderError::Authentication { .. } => ErrorKind::Authentication,
            CoderError::QuotaExceeded(_) => ErrorKind::Quota,
            CoderError::RateLimited(_) => ErrorKind::RateLimit,
            CoderError::Service { .. } | CoderError::Transport(_) | CoderError::EmptyCompletion => {
                ErrorKind::Service
            }
            CoderError::Input(_) | CoderError::Json(_) => ErrorKind::Input,
            CoderError::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether the pipeline should stop immediately instead of moving on to
    /// the next question of a batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Configuration | ErrorKind::Authentication | ErrorKind::Quota
        )
    }
}

pub type Result<T> = std::result::Result<T, CoderError>;
