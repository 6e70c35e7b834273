//! Remote backend — one job per cloud deployment.
//!
//! `run` resolves the configured image, wraps the serialized job into a
//! `jobrig remote-worker <payload>` launch command, and submits a
//! deployment of kind Job. Supervision goes through the cloud API;
//! `stop` additionally opens an SSH side-channel into each running
//! container for a best-effort process-group kill. No local state is
//! kept for remote jobs.

use std::collections::BTreeMap;
use std::path::Path;

use log::{info, warn};

use crate::cloud::{BlacklistEntry, CloudApi, Container, DeploymentRequest, GpuStock};
use crate::engine::remote_worker::{
    encode_payload, output_locator, REMOTE_LOG_PATH, REMOTE_PID_PATH, REMOTE_STAGING_DIR,
    STORAGE_PREFIX_ENV,
};
use crate::engine::JobEngine;
use crate::error::{JobError, Result};
use crate::infrastructure::runner::CommandRunner;
use crate::job::{now_iso, JobDescription, JobStatus, JobSummary};
use crate::ssh::{SshClient, SshTarget};
use crate::storage;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Backend knobs the caller resolves from settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Image name to resolve when the job does not name one itself.
    pub image: String,
    /// GPU types acceptable for placement.
    pub gpu_name_set: Vec<String>,
    pub region: Option<String>,
    /// Object-storage prefix under which container outputs are keyed.
    pub storage_prefix: String,
}

// ---------------------------------------------------------------------------
// RemoteJobEngine
// ---------------------------------------------------------------------------

pub struct RemoteJobEngine {
    cloud: Box<dyn CloudApi>,
    runner: Box<dyn CommandRunner>,
    config: RemoteConfig,
}

impl RemoteJobEngine {
    pub fn new(
        cloud: Box<dyn CloudApi>,
        runner: Box<dyn CommandRunner>,
        config: RemoteConfig,
    ) -> RemoteJobEngine {
        RemoteJobEngine {
            cloud,
            runner,
            config,
        }
    }

    /// Whether any container behind the deployment is actually
    /// executing. Deployment status alone lags real container state, so
    /// callers use this to detect "accepted" becoming "running".
    pub fn is_any_container_running(&self, job_id: &str) -> Result<bool> {
        Ok(self
            .cloud
            .container_list(job_id)?
            .iter()
            .any(|c| c.is_running()))
    }

    /// Current per-GPU-type stock in the configured region.
    pub fn gpu_stock(&self) -> Result<BTreeMap<String, GpuStock>> {
        self.cloud.gpu_stock(self.config.region.as_deref())
    }

    /// Machines the account is currently barred from.
    pub fn blacklist(&self) -> Result<Vec<BlacklistEntry>> {
        self.cloud.blacklist()
    }

    /// The provider's private image list.
    pub fn images(&self) -> Result<Vec<crate::cloud::CloudImage>> {
        self.cloud.image_list()
    }

    /// Copy the output tree straight out of the most recent running
    /// container. Returns `false` (logging, not failing) when no
    /// container is up; the object-storage path is the fallback then.
    pub fn download_output_via_container(&self, job_id: &str, local_dir: &Path) -> Result<bool> {
        let container = match self.latest_running_container(job_id)? {
            Some(container) => container,
            None => {
                info!(
                    "no running container for deployment {}; nothing downloaded",
                    job_id
                );
                return Ok(false);
            }
        };
        let target = match connection_target(&container) {
            Some(target) => target,
            None => {
                warn!("container {} has no usable ssh info", container.uuid);
                return Ok(false);
            }
        };
        let ssh = SshClient::new(self.runner.as_ref());
        ssh.download(&format!("{}/", REMOTE_STAGING_DIR), local_dir, &target)?;
        Ok(true)
    }

    /// Download the output the container uploaded to object storage.
    /// The only viable path once the container is gone.
    pub fn download_output_via_storage(&self, job_id: &str, local_dir: &Path) -> Result<()> {
        let mut events = self.cloud.container_event_list(job_id)?;
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let event = events.pop().ok_or_else(|| {
            JobError::NotFound(format!("no container events for deployment {}", job_id))
        })?;
        let locator = format!(
            "{}/",
            output_locator(&self.config.storage_prefix, &event.deployment_container_uuid)
        );
        storage::download(self.runner.as_ref(), &locator, local_dir)
    }

    fn latest_running_container(&self, job_id: &str) -> Result<Option<Container>> {
        let mut running: Vec<Container> = self
            .cloud
            .container_list(job_id)?
            .into_iter()
            .filter(|c| c.is_running())
            .collect();
        running.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(running.pop())
    }
}

impl JobEngine for RemoteJobEngine {
    fn run(&self, mut job: JobDescription) -> Result<String> {
        job.validate()?;
        let image_name = if job.image.is_empty() {
            self.config.image.clone()
        } else {
            job.image.clone()
        };
        let image = self
            .cloud
            .image_list()?
            .into_iter()
            .find(|i| i.image_name == image_name)
            .ok_or_else(|| JobError::Validation(format!("unknown image '{}'", image_name)))?;

        job.status = JobStatus::Pending;
        job.start_time = now_iso();
        let payload = encode_payload(&job)?;

        let mut env = BTreeMap::new();
        env.insert(
            STORAGE_PREFIX_ENV.to_string(),
            self.config.storage_prefix.clone(),
        );
        let request = DeploymentRequest {
            name: deployment_name(&job),
            image_uuid: image.image_uuid,
            replica_num: 1,
            parallelism_num: 1,
            gpu_name_set: self.config.gpu_name_set.clone(),
            gpu_num: job.gpu_num.max(1),
            cmd: format!("jobrig remote-worker {}", payload),
            region_sign: self.config.region.clone(),
            env,
        };
        let uuid = self.cloud.create_job_deployment(&request)?;
        info!("job submitted as deployment {}", uuid);
        Ok(uuid)
    }

    fn stop(&self, job_id: &str) -> Result<()> {
        let containers = self.cloud.container_list(job_id)?;
        let ssh = SshClient::new(self.runner.as_ref());
        for container in containers.iter().filter(|c| c.is_running()) {
            let target = match connection_target(container) {
                Some(target) => target,
                None => {
                    warn!("stop: container {} has no usable ssh info", container.uuid);
                    continue;
                }
            };
            // Best-effort signal. The remote process table is not
            // observable the way a local one is, so no confirmation
            // poll follows.
            let kill = format!(
                "test -f {pid} && kill -9 -$(cat {pid})",
                pid = REMOTE_PID_PATH
            );
            if let Err(e) = ssh.execute(&kill, &target) {
                warn!("stop: signal to container {} failed: {}", container.uuid, e);
            }
        }
        Ok(())
    }

    fn status(&self, job_id: &str) -> Result<JobStatus> {
        let deployment = self.cloud.deployment_get(job_id)?;
        Ok(map_deployment_status(&deployment.status))
    }

    fn list(&self) -> Result<Vec<JobSummary>> {
        Ok(self
            .cloud
            .deployment_list()?
            .into_iter()
            .map(|d| {
                let mut job = JobDescription::new("");
                job.description = d.name;
                job.status = map_deployment_status(&d.status);
                JobSummary::from_description(&d.uuid, &job)
            })
            .collect())
    }

    fn remove(&self, job_id: &str) -> Result<()> {
        self.cloud.deployment_delete(job_id)
    }

    fn log(&self, job_id: &str) -> Result<String> {
        let placeholder = format!("no log available for deployment {}", job_id);
        let container = match self.latest_running_container(job_id)? {
            Some(container) => container,
            None => return Ok(placeholder),
        };
        let target = match connection_target(&container) {
            Some(target) => target,
            None => return Ok(placeholder),
        };
        let ssh = SshClient::new(self.runner.as_ref());
        match ssh.execute(&format!("cat {}", REMOTE_LOG_PATH), &target) {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!("log fetch from container {} failed: {}", container.uuid, e);
                Ok(placeholder)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn map_deployment_status(status: &str) -> JobStatus {
    match status {
        "running" => JobStatus::Running,
        "stopped" => JobStatus::Stopped,
        _ => JobStatus::Pending,
    }
}

fn connection_target(container: &Container) -> Option<SshTarget> {
    let command = container.ssh_command.as_deref()?;
    SshTarget::parse_command(command, container.root_password.as_deref())
}

fn deployment_name(job: &JobDescription) -> String {
    let base: String = job
        .command
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("job-{}-{}", base, chrono::Utc::now().timestamp())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
