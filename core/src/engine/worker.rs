//! Worker process body — executes one job and keeps its record current.
//!
//! Runs detached from the engine call that spawned it: reads the status
//! record, transitions to `running`, executes the user command with
//! stdout and stderr merged into one line stream, writes every line to
//! the job log with a forced durable write, stages the declared output
//! directory, and records the terminal state. A host crash simply leaves
//! the record in its last observed state.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::warn;

use crate::error::{JobError, Result};
use crate::job::{now_iso, JobDescription, JobStatus};
use crate::store::StatusStore;

// ---------------------------------------------------------------------------
// LogWriter
// ---------------------------------------------------------------------------

/// Append-only line writer for the job log. Each line is flushed and
/// synced so `log` queries from other processes observe output promptly
/// even while the job runs.
pub(crate) struct LogWriter {
    file: fs::File,
    /// Mirror every line to stdout (the remote worker wants the
    /// provider's own log capture to see it too).
    echo: bool,
}

impl LogWriter {
    pub(crate) fn open(path: &Path, echo: bool) -> Result<LogWriter> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogWriter { file, echo })
    }

    pub(crate) fn line(&mut self, text: &str) -> Result<()> {
        self.file.write_all(text.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.file.sync_data()?;
        if self.echo {
            println!("{}", text);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Command execution
// ---------------------------------------------------------------------------

/// Resolve the declared output directory against the working directory.
/// An empty declaration means the job produces no authoritative output.
pub(crate) fn resolve_output_dir(working_dir: &Path, output_dir: &str) -> Option<PathBuf> {
    if output_dir.is_empty() {
        return None;
    }
    let path = PathBuf::from(output_dir);
    if path.is_absolute() {
        Some(path)
    } else {
        Some(working_dir.join(path))
    }
}

/// Spawn the user command in its own process group with stdout and
/// stderr merged, stream the output line-by-line into `log`, and return
/// the exit code. `on_spawn` receives the child pid as soon as it is
/// known, before any output is consumed.
pub(crate) fn execute_streaming<F>(
    job: &JobDescription,
    working_dir: &Path,
    output_dir: Option<&Path>,
    log: &mut LogWriter,
    on_spawn: F,
) -> Result<i64>
where
    F: FnOnce(i64),
{
    let mut cmd = Command::new(&job.command);
    cmd.args(&job.args).current_dir(working_dir);
    for (key, value) in &job.env {
        cmd.env(key, value);
    }
    // Force unbuffered, UTF-8 text output so the line stream is prompt.
    cmd.env("PYTHONUNBUFFERED", "1");
    cmd.env("PYTHONIOENCODING", "utf-8");
    if let Some(dir) = output_dir {
        cmd.env("JOB_OUTPUT_DIR", dir);
        cmd.env("OUTPUT_DIR", dir);
    }
    // Export the full description so the command can introspect its job.
    for (key, value) in job.to_env() {
        cmd.env(key, value);
    }

    let (reader, writer) = std::io::pipe()?;
    cmd.stdin(Stdio::null());
    cmd.stdout(writer.try_clone()?);
    cmd.stderr(writer);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group so stop can kill the whole tree at once.
        cmd.process_group(0);
    }
    let mut child = cmd.spawn()?;
    // Close this process's copies of the pipe writer, or the reader
    // below never sees end-of-file.
    drop(cmd);

    on_spawn(child.id() as i64);

    for line in BufReader::new(reader).lines() {
        match line {
            Ok(text) => log.line(&text)?,
            Err(e) => {
                warn!("log stream read error: {}", e);
                break;
            }
        }
    }
    let status = child.wait()?;
    Ok(i64::from(status.code().unwrap_or(-1)))
}

/// Recursively copy a directory tree.
pub(crate) fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = destination.join(entry.file_name());
        if entry.path().is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Worker entry
// ---------------------------------------------------------------------------

/// Execute the job recorded at `job_dir`, updating the status record
/// through every transition. This is the body of the detached worker
/// process the local engine spawns.
pub fn run_worker(job_dir: &Path, job_id: u64) -> Result<()> {
    let jobs_dir = job_dir
        .parent()
        .ok_or_else(|| JobError::Validation("job directory has no parent".into()))?;
    let store = StatusStore::new(jobs_dir)?;
    let job = store.get(job_id)?;

    let mut log = LogWriter::open(&store.log_path(job_id), false)?;
    log.line(&format!("=== job {} started at {} ===", job_id, now_iso()))?;
    log.line(&format!("$ {} {}", job.command, job.args.join(" ")))?;

    let working_dir = PathBuf::from(&job.working_dir);
    fs::create_dir_all(&working_dir)?;
    let output_dir = resolve_output_dir(&working_dir, &job.output_dir);

    store.update(job_id, |j| j.status = JobStatus::Running)?;

    let spawned = execute_streaming(&job, &working_dir, output_dir.as_deref(), &mut log, |pid| {
        if let Err(e) = store.update(job_id, |j| j.pid = pid) {
            warn!("job {}: cannot record pid: {}", job_id, e);
        }
    });
    let exit_code = match spawned {
        Ok(code) => code,
        Err(e) => {
            log.line(&format!("cannot start command: {}", e))?;
            store.update(job_id, |j| {
                j.status = JobStatus::Failed;
                j.exit_code = -1;
                j.end_time = now_iso();
                j.error_message = e.to_string();
            })?;
            return Err(e);
        }
    };

    store.update(job_id, |j| j.status = JobStatus::Postprocessing)?;

    // Stage the declared output tree under the job directory. A missing
    // output directory is a logged note, not a failure.
    let staged = store.staged_output_dir(job_id);
    if staged.exists() {
        fs::remove_dir_all(&staged)?;
    }
    match &output_dir {
        Some(dir) if dir.is_dir() => copy_tree(dir, &staged)?,
        Some(dir) => log.line(&format!(
            "output dir {} not found; nothing staged",
            dir.display()
        ))?,
        None => log.line("no output dir declared; nothing staged")?,
    }

    let final_status = if exit_code == 0 {
        JobStatus::Completed
    } else {
        JobStatus::Failed
    };
    store.update(job_id, |j| {
        j.status = final_status;
        j.exit_code = exit_code;
        j.end_time = now_iso();
        if exit_code != 0 {
            j.error_message = format!("command exited with code {}", exit_code);
        }
    })?;
    log.line(&format!(
        "=== job {} {} with code {} at {} ===",
        job_id,
        final_status,
        exit_code,
        now_iso()
    ))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
