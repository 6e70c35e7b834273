//! Status Store — durable per-job records.
//!
//! One directory per job under the jobs root:
//!
//! ```text
//! jobs/
//!   job_1/
//!     status.json     <- the authoritative record
//!     job_1.log       <- captured stdout/stderr
//!     output/         <- staged output tree
//! ```
//!
//! `status.json` is the single source of truth for "what is this job
//! doing right now". Every query re-reads it from disk; no process holds
//! authoritative state in memory. Writes are read-modify-write without a
//! lock: only the owning engine and the worker it spawned write a given
//! record, and a lost update under true concurrent writers is a known
//! limitation, not a guaranteed-safe race.

use std::fs;
use std::path::{Path, PathBuf};

use log::{error, warn};

use crate::error::{JobError, Result};
use crate::job::JobDescription;

// ---------------------------------------------------------------------------
// StatusStore
// ---------------------------------------------------------------------------

/// Per-job durable records keyed by integer job id.
#[derive(Debug, Clone)]
pub struct StatusStore {
    jobs_dir: PathBuf,
}

impl StatusStore {
    /// Open (creating if needed) a store rooted at `jobs_dir`.
    pub fn new(jobs_dir: &Path) -> Result<StatusStore> {
        fs::create_dir_all(jobs_dir)?;
        Ok(StatusStore {
            jobs_dir: jobs_dir.to_path_buf(),
        })
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    /// `jobs/job_<id>`
    pub fn job_dir(&self, job_id: u64) -> PathBuf {
        self.jobs_dir.join(format!("job_{}", job_id))
    }

    /// `jobs/job_<id>/status.json`
    pub fn status_path(&self, job_id: u64) -> PathBuf {
        self.job_dir(job_id).join("status.json")
    }

    /// `jobs/job_<id>/job_<id>.log`
    pub fn log_path(&self, job_id: u64) -> PathBuf {
        self.job_dir(job_id).join(format!("job_{}.log", job_id))
    }

    /// `jobs/job_<id>/output` — where the worker stages the job's
    /// declared output directory after the command exits.
    pub fn staged_output_dir(&self, job_id: u64) -> PathBuf {
        self.job_dir(job_id).join("output")
    }

    // -- Record I/O --

    /// Write the record, creating the job directory if needed.
    pub fn put(&self, job_id: u64, job: &JobDescription) -> Result<()> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir)?;
        let text = serde_json::to_string_pretty(job)
            .map_err(|e| JobError::Validation(format!("cannot serialize record: {}", e)))?;
        fs::write(self.status_path(job_id), text)?;
        Ok(())
    }

    /// Read the record. `NotFound` if the job directory or record is
    /// missing.
    pub fn get(&self, job_id: u64) -> Result<JobDescription> {
        let path = self.status_path(job_id);
        let text = fs::read_to_string(&path)
            .map_err(|_| JobError::NotFound(job_id.to_string()))?;
        serde_json::from_str(&text).map_err(|e| {
            JobError::Validation(format!("corrupt record {}: {}", path.display(), e))
        })
    }

    /// Read-modify-write the record. Logs (but does not reject) a status
    /// change that is not a valid transition, since the on-disk state may
    /// be newer than what the mutator assumed.
    pub fn update<F>(&self, job_id: u64, mutate: F) -> Result<JobDescription>
    where
        F: FnOnce(&mut JobDescription),
    {
        let mut job = self.get(job_id)?;
        let before = job.status;
        mutate(&mut job);
        if job.status != before && !before.can_transition_to(job.status) {
            warn!(
                "job {}: unusual status transition {} -> {}",
                job_id, before, job.status
            );
        }
        self.put(job_id, &job)?;
        Ok(job)
    }

    // -- Enumeration --

    /// All known job ids, highest (most recently created) first.
    pub fn list_ids(&self) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.jobs_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(rest) = name.strip_prefix("job_") {
                if let Ok(id) = rest.parse::<u64>() {
                    if self.status_path(id).exists() {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    /// All records, most-recently-created first. Unreadable records are
    /// skipped with an error log rather than failing the listing.
    pub fn list(&self) -> Result<Vec<(u64, JobDescription)>> {
        let mut jobs = Vec::new();
        for id in self.list_ids()? {
            match self.get(id) {
                Ok(job) => jobs.push((id, job)),
                Err(e) => error!("skipping job {}: {}", id, e),
            }
        }
        Ok(jobs)
    }

    /// The next identifier to allocate: highest existing + 1, starting
    /// at 1. Survives engine restarts because it is derived from the
    /// persisted records.
    pub fn next_job_id(&self) -> Result<u64> {
        Ok(self.list_ids()?.first().map_or(1, |max| max + 1))
    }

    /// Full captured log text, if the log file exists yet.
    pub fn read_log(&self, job_id: u64) -> Option<String> {
        fs::read_to_string(self.log_path(job_id)).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use tempfile::TempDir;

    fn store() -> (TempDir, StatusStore) {
        let dir = TempDir::new().unwrap();
        let store = StatusStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_then_get_round_trips() {
        let (_dir, store) = store();
        let mut job = JobDescription::new("echo");
        job.args = vec!["hi".into()];
        store.put(3, &job).unwrap();
        let back = store.get(3).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn get_unknown_is_not_found() {
        let (_dir, store) = store();
        match store.get(99) {
            Err(JobError::NotFound(id)) => assert_eq!(id, "99"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn update_persists_mutation() {
        let (_dir, store) = store();
        store.put(1, &JobDescription::new("echo")).unwrap();
        store
            .update(1, |job| {
                job.status = JobStatus::Running;
                job.pid = 4242;
            })
            .unwrap();
        let job = store.get(1).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.pid, 4242);
    }

    #[test]
    fn next_id_starts_at_one_and_increments_past_max() {
        let (_dir, store) = store();
        assert_eq!(store.next_job_id().unwrap(), 1);
        store.put(1, &JobDescription::new("a")).unwrap();
        store.put(7, &JobDescription::new("b")).unwrap();
        assert_eq!(store.next_job_id().unwrap(), 8);
    }

    #[test]
    fn list_is_most_recent_first() {
        let (_dir, store) = store();
        for id in [2, 5, 1] {
            store.put(id, &JobDescription::new("echo")).unwrap();
        }
        let ids: Vec<u64> = store.list().unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![5, 2, 1]);
    }

    #[test]
    fn list_ignores_foreign_directories() {
        let (dir, store) = store();
        fs::create_dir(dir.path().join("logs")).unwrap();
        fs::create_dir(dir.path().join("job_abc")).unwrap();
        // A job dir without a record does not count.
        fs::create_dir(dir.path().join("job_9")).unwrap();
        store.put(2, &JobDescription::new("echo")).unwrap();
        assert_eq!(store.list_ids().unwrap(), vec![2]);
    }

    #[test]
    fn read_log_absent_is_none() {
        let (_dir, store) = store();
        store.put(1, &JobDescription::new("echo")).unwrap();
        assert!(store.read_log(1).is_none());
        fs::write(store.log_path(1), "line\n").unwrap();
        assert_eq!(store.read_log(1).unwrap(), "line\n");
    }
}
