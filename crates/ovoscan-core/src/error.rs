//! Error types for ovoscan core

use thiserror::Error;

/// Result type alias using ovoscan Error
pub type Result<T> = std::result::Result<T, Error>;

/// ovoscan error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session {id} is not ready (status: {phase})")]
    NotReady { id: String, phase: String },

    #[error("Detection job failed: {0}")]
    JobFailed(String),

    #[error("Session store consistency fault: {0}")]
    Consistency(String),

    #[error("Session store is at capacity ({0} sessions)")]
    Capacity(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Gave up waiting for session {id} after {attempts} polls")]
    PollTimeout { id: String, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

/// Detector-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectionError {
    /// The detector rejected this one image; the batch continues.
    #[error("Detection failed: {0}")]
    Image(String),

    /// The detector cannot serve any further requests.
    #[error("Detector unavailable: {0}")]
    Unavailable(String),
}

impl DetectionError {
    /// Whether this failure should abort the whole job
    pub fn is_fatal(&self) -> bool {
        matches!(self, DetectionError::Unavailable(_))
    }

    /// The detector's own description of what went wrong
    pub fn cause(&self) -> &str {
        match self {
            DetectionError::Image(cause) | DetectionError::Unavailable(cause) => cause,
        }
    }
}
