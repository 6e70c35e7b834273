//! Remote worker entry — runs inside a cloud container.
//!
//! The remote engine serializes the job description, base64-encodes it,
//! and passes it as the sole argument of the deployment's launch
//! command. This entry decodes it, stages `input_paths` from object
//! storage, executes the command exactly like the local worker (merged
//! stdout/stderr, line-streamed log), then uploads the staged output to
//! a location keyed by the container's own identity. There is no status
//! store in the container; lifecycle is observed through the cloud API.

use std::fs;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::warn;

use crate::engine::worker::{copy_tree, execute_streaming, resolve_output_dir, LogWriter};
use crate::error::{JobError, Result};
use crate::infrastructure::runner::CommandRunner;
use crate::job::{now_iso, JobDescription};
use crate::storage;

/// Where the user command's pid is recorded so `stop` can signal the
/// process group over SSH.
pub const REMOTE_PID_PATH: &str = "/tmp/jobrig_job.pid";
/// The in-container log file; also mirrored to stdout for the
/// provider's own log capture.
pub const REMOTE_LOG_PATH: &str = "/tmp/jobrig_job.log";
/// Where the resolved output tree is staged before upload, and where
/// live-container downloads read from.
pub const REMOTE_STAGING_DIR: &str = "/tmp/jobrig_output";
/// Container identity injected by the provider into every container.
pub const CONTAINER_UUID_ENV: &str = "AutoDLContainerUUID";
/// Storage prefix handed down by the engine through the deployment
/// environment.
pub const STORAGE_PREFIX_ENV: &str = "JOBRIG_STORAGE_PREFIX";

pub const DEFAULT_STORAGE_PREFIX: &str = "cos://jobrig";

/// Object-storage locator where a container's staged output lands.
pub fn output_locator(prefix: &str, container_uuid: &str) -> String {
    format!("{}/{}/output", prefix.trim_end_matches('/'), container_uuid)
}

// ---------------------------------------------------------------------------
// Payload codec
// ---------------------------------------------------------------------------

pub fn encode_payload(job: &JobDescription) -> Result<String> {
    let bytes = serde_json::to_vec(job)
        .map_err(|e| JobError::Validation(format!("cannot serialize job: {}", e)))?;
    Ok(BASE64.encode(bytes))
}

pub fn decode_payload(payload: &str) -> Result<JobDescription> {
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|e| JobError::Validation(format!("bad worker payload: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| JobError::Validation(format!("bad worker payload: {}", e)))
}

// ---------------------------------------------------------------------------
// Worker context
// ---------------------------------------------------------------------------

/// Everything the remote worker needs besides the payload. Production
/// uses `from_env`; tests substitute paths and a mock runner.
pub struct RemoteWorkerContext<'a> {
    pub runner: &'a dyn CommandRunner,
    pub pid_path: PathBuf,
    pub log_path: PathBuf,
    pub staging_dir: PathBuf,
    pub container_uuid: Option<String>,
    pub storage_prefix: String,
}

impl<'a> RemoteWorkerContext<'a> {
    pub fn from_env(runner: &'a dyn CommandRunner) -> RemoteWorkerContext<'a> {
        RemoteWorkerContext {
            runner,
            pid_path: PathBuf::from(REMOTE_PID_PATH),
            log_path: PathBuf::from(REMOTE_LOG_PATH),
            staging_dir: PathBuf::from(REMOTE_STAGING_DIR),
            container_uuid: std::env::var(CONTAINER_UUID_ENV).ok(),
            storage_prefix: std::env::var(STORAGE_PREFIX_ENV)
                .unwrap_or_else(|_| DEFAULT_STORAGE_PREFIX.to_string()),
        }
    }
}

/// Local path a staged input lands under: the locator's last path
/// segment inside the working directory.
fn input_target(working_dir: &Path, locator: &str) -> PathBuf {
    let name = locator
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("input");
    working_dir.join(name)
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// Decode and execute one job; returns the user command's exit code.
pub fn run_remote_worker(payload: &str, ctx: &RemoteWorkerContext) -> Result<i64> {
    let job = decode_payload(payload)?;
    job.validate()?;

    let working_dir = if job.working_dir.is_empty() {
        std::env::current_dir()?
    } else {
        PathBuf::from(&job.working_dir)
    };
    fs::create_dir_all(&working_dir)?;

    let mut log = LogWriter::open(&ctx.log_path, true)?;
    log.line(&format!("=== remote job started at {} ===", now_iso()))?;
    log.line(&format!("$ {} {}", job.command, job.args.join(" ")))?;

    for locator in &job.input_paths {
        let target = input_target(&working_dir, locator);
        log.line(&format!("staging input {} -> {}", locator, target.display()))?;
        storage::download(ctx.runner, locator, &target)?;
    }

    let output_dir = resolve_output_dir(&working_dir, &job.output_dir);
    let pid_path = ctx.pid_path.clone();
    let exit_code = execute_streaming(
        &job,
        &working_dir,
        output_dir.as_deref(),
        &mut log,
        |pid| {
            if let Err(e) = fs::write(&pid_path, pid.to_string()) {
                warn!("cannot record pid: {}", e);
            }
        },
    )?;

    // Stage and upload whatever the command produced. Upload failures
    // surface to the caller; a missing output tree is only a note.
    if ctx.staging_dir.exists() {
        fs::remove_dir_all(&ctx.staging_dir)?;
    }
    match &output_dir {
        Some(dir) if dir.is_dir() => {
            copy_tree(dir, &ctx.staging_dir)?;
            match &ctx.container_uuid {
                Some(uuid) => {
                    let locator = output_locator(&ctx.storage_prefix, uuid);
                    log.line(&format!("uploading output to {}", locator))?;
                    storage::upload(ctx.runner, &ctx.staging_dir, &locator)?;
                }
                None => log.line("no container identity; output kept in staging only")?,
            }
        }
        Some(dir) => log.line(&format!(
            "output dir {} not found; nothing uploaded",
            dir.display()
        ))?,
        None => log.line("no output dir declared; nothing uploaded")?,
    }

    log.line(&format!(
        "=== remote job exited with code {} at {} ===",
        exit_code,
        now_iso()
    ))?;
    Ok(exit_code)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
