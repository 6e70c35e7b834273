//! Object storage client, addressed by scheme-prefixed locators.
//!
//! `cos://bucket-path/key` locators are served by the `coscmd` CLI tool
//! through `CommandRunner`; any other scheme is rejected with
//! `Unsupported`. Transfers are retried a small fixed number of times
//! before escalating to `Network`, since the remote worker has no
//! operator watching it.

use std::path::Path;

use log::warn;

use crate::error::{JobError, Result};
use crate::infrastructure::runner::{shell_escape, CommandRunner};

/// Transfer attempts before a failure becomes `Network`.
const TRANSFER_ATTEMPTS: usize = 3;

const COS_SCHEME: &str = "cos://";

// ---------------------------------------------------------------------------
// ObjectStorage
// ---------------------------------------------------------------------------

/// A storage backend addressed by locator strings.
pub trait ObjectStorage {
    /// Fetch `locator` to `local_path`. A locator with a trailing `/` is
    /// a recursive prefix download.
    fn download(&self, locator: &str, local_path: &Path) -> Result<()>;

    /// Store `local_path` (file or directory) at `locator`.
    fn upload(&self, local_path: &Path, locator: &str) -> Result<()>;
}

/// Resolve the backend for a locator and download through it.
pub fn download(runner: &dyn CommandRunner, locator: &str, local_path: &Path) -> Result<()> {
    backend_for(runner, locator)?.download(locator, local_path)
}

/// Resolve the backend for a locator and upload through it.
pub fn upload(runner: &dyn CommandRunner, local_path: &Path, locator: &str) -> Result<()> {
    backend_for(runner, locator)?.upload(local_path, locator)
}

fn backend_for<'a>(
    runner: &'a dyn CommandRunner,
    locator: &str,
) -> Result<Box<dyn ObjectStorage + 'a>> {
    if locator.starts_with(COS_SCHEME) {
        Ok(Box::new(CoscmdStorage::new(runner)))
    } else {
        Err(JobError::Unsupported(format!(
            "storage scheme in locator '{}'",
            locator
        )))
    }
}

// ---------------------------------------------------------------------------
// CoscmdStorage
// ---------------------------------------------------------------------------

/// `cos://` backend shelling out to the `coscmd` tool.
pub struct CoscmdStorage<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CoscmdStorage<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        CoscmdStorage { runner }
    }

    fn run_with_retries(&self, cmd: &str) -> Result<()> {
        let mut last_err = String::new();
        for attempt in 1..=TRANSFER_ATTEMPTS {
            match self.runner.run(cmd) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(
                        "storage transfer attempt {}/{} failed: {}",
                        attempt, TRANSFER_ATTEMPTS, e
                    );
                    last_err = e;
                }
            }
        }
        Err(JobError::Network(format!(
            "transfer failed after {} attempts: {}",
            TRANSFER_ATTEMPTS, last_err
        )))
    }
}

impl<'a> ObjectStorage for CoscmdStorage<'a> {
    fn download(&self, locator: &str, local_path: &Path) -> Result<()> {
        let key = locator.trim_start_matches(COS_SCHEME);
        let recursive = if key.ends_with('/') { "-r " } else { "" };
        let cmd = format!(
            "coscmd download {}{} {}",
            recursive,
            shell_escape(key),
            shell_escape(&local_path.to_string_lossy())
        );
        self.run_with_retries(&cmd)
    }

    fn upload(&self, local_path: &Path, locator: &str) -> Result<()> {
        let key = locator.trim_start_matches(COS_SCHEME);
        let recursive = if local_path.is_dir() { "-r " } else { "" };
        let cmd = format!(
            "coscmd upload {}{} {}",
            recursive,
            shell_escape(&local_path.to_string_lossy()),
            shell_escape(key)
        );
        self.run_with_retries(&cmd)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
