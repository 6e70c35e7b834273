//! Execution backends behind the common `JobEngine` contract.
//!
//! Two interchangeable implementations: `LocalJobEngine` supervises a
//! detached worker process on this host, `RemoteJobEngine` maps each job
//! onto a cloud deployment. Callers pick one by configuration and
//! program against the trait.

pub mod local;
pub mod remote;
pub mod remote_worker;
pub mod worker;

use crate::error::Result;
use crate::job::{JobDescription, JobStatus, JobSummary};

/// The six lifecycle operations every backend provides.
pub trait JobEngine {
    /// Allocate an identifier, persist the initial record, start
    /// asynchronous execution, and return immediately.
    fn run(&self, job: JobDescription) -> Result<String>;

    /// Request termination of a running or post-processing job.
    /// Idempotent on already-terminal jobs.
    fn stop(&self, job_id: &str) -> Result<()>;

    /// Current status, always re-read from the durable record or the
    /// backend API.
    fn status(&self, job_id: &str) -> Result<JobStatus>;

    /// Job summaries, most-recently-created first.
    fn list(&self) -> Result<Vec<JobSummary>>;

    /// Delete artifacts of a terminal job.
    fn remove(&self, job_id: &str) -> Result<()>;

    /// Captured log text; a descriptive placeholder (never an error)
    /// when the job or its log is not available yet.
    fn log(&self, job_id: &str) -> Result<String>;
}
