//! Error types for the job engine.
//!
//! One enum covers every failure surface the engine exposes to callers.
//! Transient collaborator failures (object storage, cloud API) are mapped
//! to `Network` after their local retries are exhausted; everything else
//! is raised synchronously by the offending operation.

use std::fmt;

// ---------------------------------------------------------------------------
// JobError
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum JobError {
    /// The job description is malformed (empty command, unresolvable
    /// working directory, bad payload).
    Validation(String),
    /// No job with the given identifier exists.
    NotFound(String),
    /// The operation is invalid for the job's current status
    /// (e.g. `remove` on a running job).
    Conflict(String),
    /// A kill was confirmed to have failed after the bounded poll.
    Fatal(String),
    /// A collaborator API or transport failed (non-success response,
    /// transport exception, retries exhausted).
    Network(String),
    /// A storage locator uses a scheme this build does not support.
    Unsupported(String),
    /// Filesystem I/O error.
    Io(std::io::Error),
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::Validation(msg) => write!(f, "invalid job: {}", msg),
            JobError::NotFound(id) => write!(f, "job not found: {}", id),
            JobError::Conflict(msg) => write!(f, "conflict: {}", msg),
            JobError::Fatal(msg) => write!(f, "fatal: {}", msg),
            JobError::Network(msg) => write!(f, "network error: {}", msg),
            JobError::Unsupported(what) => write!(f, "unsupported: {}", what),
            JobError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for JobError {}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, JobError>;
