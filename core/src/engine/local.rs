//! Local backend — one detached worker process per job, supervised
//! through the status store.
//!
//! `run` writes the initial record and spawns `<current exe> worker
//! <job_dir> <job_id>` in its own process group, never waiting on it;
//! the worker outlives this process. Everything else is bookkeeping
//! against the per-job records on disk.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use log::info;

use crate::engine::worker::LogWriter;
use crate::engine::JobEngine;
use crate::error::{JobError, Result};
use crate::job::{now_iso, JobDescription, JobStatus, JobSummary};
use crate::store::StatusStore;

const KILL_POLL_ATTEMPTS: u32 = 10;
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(300);
/// Delay between confirming the kill and writing the stop verdict, so a
/// worker racing to record its own terminal state loses the write.
const STOP_SETTLE: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// WorkerLauncher
// ---------------------------------------------------------------------------

/// How a worker process gets started for a freshly persisted job.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, job_dir: &Path, job_id: u64) -> Result<()>;
}

/// Spawns `<current exe> worker <job_dir> <job_id>` detached: own
/// process group, standard streams null, never waited on.
pub struct DetachedLauncher;

impl WorkerLauncher for DetachedLauncher {
    fn launch(&self, job_dir: &Path, job_id: u64) -> Result<()> {
        let exe = std::env::current_exe()?;
        let mut cmd = Command::new(exe);
        cmd.arg("worker")
            .arg(job_dir)
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.spawn()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LocalJobEngine
// ---------------------------------------------------------------------------

pub struct LocalJobEngine {
    store: StatusStore,
    launcher: Box<dyn WorkerLauncher>,
}

impl LocalJobEngine {
    pub fn new(jobs_dir: &Path) -> Result<LocalJobEngine> {
        LocalJobEngine::with_launcher(jobs_dir, Box::new(DetachedLauncher))
    }

    pub fn with_launcher(
        jobs_dir: &Path,
        launcher: Box<dyn WorkerLauncher>,
    ) -> Result<LocalJobEngine> {
        Ok(LocalJobEngine {
            store: StatusStore::new(jobs_dir)?,
            launcher,
        })
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    fn parse_id(job_id: &str) -> Result<u64> {
        job_id
            .parse()
            .map_err(|_| JobError::NotFound(job_id.to_string()))
    }
}

impl JobEngine for LocalJobEngine {
    fn run(&self, mut job: JobDescription) -> Result<String> {
        job.validate()?;
        job.working_dir = resolve_working_dir(&job.working_dir)?;
        let id = self.store.next_job_id()?;
        job.job_id = id.to_string();
        job.status = JobStatus::Pending;
        job.start_time = now_iso();
        job.end_time.clear();
        job.exit_code = 0;
        job.pid = -1;
        self.store.put(id, &job)?;
        self.launcher.launch(&self.store.job_dir(id), id)?;
        info!("job {} submitted: {}", id, job.command);
        Ok(id.to_string())
    }

    fn stop(&self, job_id: &str) -> Result<()> {
        let id = Self::parse_id(job_id)?;
        let job = self.store.get(id)?;
        if job.status.is_terminal() {
            return Ok(());
        }
        if !job.status.is_active() {
            return Err(JobError::Conflict(format!("job {} is {}", id, job.status)));
        }
        if job.pid > 0 {
            kill_group_confirmed(job.pid)?;
        }
        // The surviving worker may still write failed/completed for the
        // killed command; wait it out, then let the stop verdict win.
        thread::sleep(STOP_SETTLE);
        let mut job = self.store.get(id)?;
        job.status = JobStatus::Stopped;
        job.end_time = now_iso();
        self.store.put(id, &job)?;
        if let Ok(mut log) = LogWriter::open(&self.store.log_path(id), false) {
            let _ = log.line(&format!(
                "=== job {} stopped by user at {} ===",
                id,
                now_iso()
            ));
        }
        info!("job {} stopped", id);
        Ok(())
    }

    fn status(&self, job_id: &str) -> Result<JobStatus> {
        let id = Self::parse_id(job_id)?;
        Ok(self.store.get(id)?.status)
    }

    fn list(&self) -> Result<Vec<JobSummary>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|(id, job)| JobSummary::from_description(&id.to_string(), &job))
            .collect())
    }

    fn remove(&self, job_id: &str) -> Result<()> {
        let id = Self::parse_id(job_id)?;
        let job = self.store.get(id)?;
        if !job.status.is_terminal() {
            return Err(JobError::Conflict(format!("job {} is {}", id, job.status)));
        }
        // The log and status record stay behind for audit.
        let staged = self.store.staged_output_dir(id);
        if staged.exists() {
            std::fs::remove_dir_all(&staged)?;
        }
        Ok(())
    }

    fn log(&self, job_id: &str) -> Result<String> {
        let placeholder = format!("no log available for job {}", job_id);
        let id = match Self::parse_id(job_id) {
            Ok(id) => id,
            Err(_) => return Ok(placeholder),
        };
        Ok(self.store.read_log(id).unwrap_or(placeholder))
    }
}

// ---------------------------------------------------------------------------
// Process helpers
// ---------------------------------------------------------------------------

fn resolve_working_dir(dir: &str) -> Result<String> {
    let current = std::env::current_dir()
        .map_err(|e| JobError::Validation(format!("cannot resolve working dir: {}", e)))?;
    let path = if dir.is_empty() {
        current
    } else {
        let path = PathBuf::from(dir);
        if path.is_absolute() {
            path
        } else {
            current.join(path)
        }
    };
    Ok(path.to_string_lossy().into_owned())
}

fn process_alive(pid: i64) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Kill the process group rooted at `pid` and poll the process table
/// until the leader is gone. `Fatal` only after the poll is exhausted.
fn kill_group_confirmed(pid: i64) -> Result<()> {
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
    for _ in 0..KILL_POLL_ATTEMPTS {
        if !process_alive(pid) {
            return Ok(());
        }
        thread::sleep(KILL_POLL_INTERVAL);
    }
    Err(JobError::Fatal(format!("process {} survived kill", pid)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
