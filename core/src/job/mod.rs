//! Job model — description, status state machine, and summaries.
//!
//! `JobDescription` is the launch spec a caller submits plus the runtime
//! fields the owning engine fills in. After submission the caller's copy
//! is advisory only; the durable record in the `StatusStore` is
//! authoritative.

pub mod env;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
///
/// Valid paths are `Pending → Running → Postprocessing → {Completed |
/// Failed}`, with `Stopped` reachable from `Running` or `Postprocessing`
/// via an explicit stop request. Terminal states admit no further
/// transitions; a job killed out-of-band simply stays in its last
/// observed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record created, worker not yet started the command.
    Pending,
    /// The user command is executing.
    Running,
    /// The user command exited; output staging is in progress.
    Postprocessing,
    /// Exit code 0 and staging finished.
    Completed,
    /// Non-zero exit code (staging was still attempted).
    Failed,
    /// Terminated by an explicit stop request.
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Postprocessing => "postprocessing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "postprocessing" => Some(JobStatus::Postprocessing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "stopped" => Some(JobStatus::Stopped),
            _ => None,
        }
    }

    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }

    /// Whether the job is still executing or staging output. `stop` is
    /// only valid in these states.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Postprocessing)
    }

    /// Whether moving from `self` to `next` is a valid transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Postprocessing)
                | (Postprocessing, Completed)
                | (Postprocessing, Failed)
                | (Running, Stopped)
                | (Postprocessing, Stopped)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobDescription
// ---------------------------------------------------------------------------

/// The job's immutable launch spec plus engine-owned runtime fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    /// The command to execute.
    pub command: String,
    /// Ordered command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory; resolved to an absolute path before any worker
    /// reads it.
    #[serde(default)]
    pub working_dir: String,
    /// Output directory, relative to `working_dir` unless absolute. Its
    /// contents are the authoritative job output.
    #[serde(default)]
    pub output_dir: String,
    /// Extra environment for the child, merged over the worker's own.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Advisory priority; unused by scheduling in the current scope.
    #[serde(default)]
    pub priority: i64,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Remote source locators staged into `working_dir` before execution.
    #[serde(default)]
    pub input_paths: Vec<String>,
    /// GPUs requested (remote backend).
    #[serde(default)]
    pub gpu_num: i64,
    /// Backend-specific execution image reference (remote backend).
    #[serde(default)]
    pub image: String,

    // -- Runtime fields, owned by the engine --
    /// Backend-assigned identifier: decimal integer for local jobs,
    /// opaque deployment uuid for remote jobs. Empty until `run`.
    #[serde(default)]
    pub job_id: String,
    /// ISO-8601 start timestamp, or empty.
    #[serde(default)]
    pub start_time: String,
    /// ISO-8601 end timestamp, or empty.
    #[serde(default)]
    pub end_time: String,
    #[serde(default = "default_status")]
    pub status: JobStatus,
    /// Meaningful only in terminal states.
    #[serde(default)]
    pub exit_code: i64,
    /// OS process id of the user command (local backend only).
    #[serde(default = "default_pid")]
    pub pid: i64,
    #[serde(default)]
    pub error_message: String,
}

fn default_status() -> JobStatus {
    JobStatus::Pending
}

fn default_pid() -> i64 {
    -1
}

impl JobDescription {
    /// Create a description with runtime fields at their defaults.
    pub fn new(command: &str) -> Self {
        JobDescription {
            command: command.to_string(),
            args: Vec::new(),
            working_dir: String::new(),
            output_dir: String::new(),
            env: BTreeMap::new(),
            priority: 0,
            description: String::new(),
            input_paths: Vec::new(),
            gpu_num: 0,
            image: String::new(),
            job_id: String::new(),
            start_time: String::new(),
            end_time: String::new(),
            status: JobStatus::Pending,
            exit_code: 0,
            pid: -1,
            error_message: String::new(),
        }
    }

    /// Validate the launch fields. Called by every engine's `run`.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.command.trim().is_empty() {
            return Err(crate::error::JobError::Validation(
                "command is empty".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JobSummary
// ---------------------------------------------------------------------------

/// One row of `JobEngine::list()`, most-recently-created first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub command: String,
    pub args: Vec<String>,
    pub description: String,
    pub status: JobStatus,
    pub priority: i64,
    pub working_dir: String,
    pub output_dir: String,
    pub start_time: String,
    pub end_time: String,
    pub exit_code: i64,
    pub pid: i64,
    pub error_message: String,
}

impl JobSummary {
    pub fn from_description(id: &str, job: &JobDescription) -> Self {
        JobSummary {
            id: id.to_string(),
            command: job.command.clone(),
            args: job.args.clone(),
            description: job.description.clone(),
            status: job.status,
            priority: job.priority,
            working_dir: job.working_dir.clone(),
            output_dir: job.output_dir.clone(),
            start_time: job.start_time.clone(),
            end_time: job.end_time.clone(),
            exit_code: job.exit_code,
            pid: job.pid,
            error_message: job.error_message.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current time as an ISO-8601 string, the format stored in the status
/// record and printed in log trailers.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
