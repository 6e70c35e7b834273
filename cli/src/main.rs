//! jobrig — submit and supervise jobs from the command line.
//!
//! ```text
//! jobrig run --gpu 1 python train.py
//! jobrig list
//! jobrig status 3
//! jobrig log 3
//! jobrig stop 3
//! jobrig fetch 3 ./results
//! ```
//!
//! The backend (local detached workers or cloud deployments) comes from
//! the config file, `~/.jobrig/config.yaml` by default, overridable via
//! the `JOBRIG_CONFIG` environment variable.

use std::path::{Path, PathBuf};
use std::process;

use jobrig_core::cli::parse_args;
use jobrig_core::cloud::CloudClient;
use jobrig_core::command::{job_from_run, Command};
use jobrig_core::config::{self, Backend, Settings};
use jobrig_core::engine::local::LocalJobEngine;
use jobrig_core::engine::remote::{RemoteConfig, RemoteJobEngine};
use jobrig_core::engine::remote_worker::{run_remote_worker, RemoteWorkerContext};
use jobrig_core::engine::worker::run_worker;
use jobrig_core::engine::JobEngine;
use jobrig_core::error::{JobError, Result};
use jobrig_core::infrastructure::runner::ShellRunner;
use jobrig_core::job::JobSummary;

fn main() {
    env_logger::init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let arg_refs: Vec<&str> = argv.iter().map(|s| s.as_str()).collect();
    let command = match parse_args(&arg_refs) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("jobrig: {}", e);
            process::exit(2);
        }
    };

    // Worker entries run in this process; they never consult settings.
    match &command {
        Command::Worker { job_dir, job_id } => {
            if let Err(e) = run_worker(Path::new(job_dir), *job_id) {
                eprintln!("jobrig worker: {}", e);
                process::exit(1);
            }
            return;
        }
        Command::RemoteWorker { payload } => {
            let runner = ShellRunner;
            let ctx = RemoteWorkerContext::from_env(&runner);
            match run_remote_worker(payload, &ctx) {
                Ok(code) => process::exit(i32::try_from(code).unwrap_or(1)),
                Err(e) => {
                    eprintln!("jobrig remote-worker: {}", e);
                    process::exit(1);
                }
            }
        }
        Command::Help => {
            println!("{}", usage());
            return;
        }
        _ => {}
    }

    let settings = match config::load(&config::default_config_path()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("jobrig: {}", e);
            process::exit(1);
        }
    };

    match execute(&settings, command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(e) => {
            eprintln!("jobrig: {}", e);
            process::exit(1);
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn execute(settings: &Settings, command: Command) -> Result<String> {
    match command {
        Command::Run { .. } => {
            let job = match job_from_run(&command) {
                Some(Ok(job)) => job,
                Some(Err(e)) => return Err(JobError::Validation(e)),
                None => unreachable!("matched Run above"),
            };
            let id = build_engine(settings)?.run(job)?;
            Ok(format!("job {} submitted", id))
        }
        Command::Stop { id } => {
            build_engine(settings)?.stop(&id)?;
            Ok(format!("job {} stopped", id))
        }
        Command::Status { id } => Ok(build_engine(settings)?.status(&id)?.to_string()),
        Command::List => Ok(format_summaries(&build_engine(settings)?.list()?)),
        Command::Remove { id } => {
            build_engine(settings)?.remove(&id)?;
            Ok(format!("job {} removed", id))
        }
        Command::Log { id } => build_engine(settings)?.log(&id),
        Command::Fetch { id, dest } => fetch(settings, &id, dest),
        Command::Stock => {
            let stocks = remote_engine(require_remote(settings, "stock")?).gpu_stock()?;
            Ok(stocks
                .iter()
                .map(|(name, stock)| {
                    format!("{}: {}/{} idle", name, stock.idle_gpu_num, stock.total_gpu_num)
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Images => {
            let images = remote_engine(require_remote(settings, "images")?).images()?;
            Ok(images
                .iter()
                .map(|image| format!("{}  {}", image.image_uuid, image.image_name))
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Blacklist => {
            let entries = remote_engine(require_remote(settings, "blacklist")?).blacklist()?;
            if entries.is_empty() {
                return Ok("no blacklisted machines".into());
            }
            Ok(entries
                .iter()
                .map(|entry| {
                    format!(
                        "{}  {}  until {}  {}",
                        entry.machine_id, entry.data_center, entry.expired_time, entry.msg
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Worker { .. } | Command::RemoteWorker { .. } | Command::Help => Ok(String::new()),
    }
}

fn build_engine(settings: &Settings) -> Result<Box<dyn JobEngine>> {
    match settings.backend {
        Backend::Local => Ok(Box::new(LocalJobEngine::new(Path::new(
            &settings.jobs_dir,
        ))?)),
        Backend::Remote => Ok(Box::new(remote_engine(settings))),
    }
}

fn remote_engine(settings: &Settings) -> RemoteJobEngine {
    let cloud = CloudClient::with_host(&settings.cloud.token, &settings.cloud.host);
    RemoteJobEngine::new(
        Box::new(cloud),
        Box::new(ShellRunner),
        RemoteConfig {
            image: settings.cloud.image.clone(),
            gpu_name_set: settings.cloud.gpu_name_set.clone(),
            region: Some(settings.cloud.region.clone()),
            storage_prefix: settings.storage_prefix.clone(),
        },
    )
}

fn require_remote<'a>(settings: &'a Settings, what: &str) -> Result<&'a Settings> {
    match settings.backend {
        Backend::Remote => Ok(settings),
        Backend::Local => Err(JobError::Unsupported(format!(
            "'{}' requires the remote backend",
            what
        ))),
    }
}

/// `fetch` locates a job's output. Locally that is the staged directory
/// next to the status record; remotely it is the live container when one
/// is still up, and the object-storage copy otherwise.
fn fetch(settings: &Settings, id: &str, dest: Option<String>) -> Result<String> {
    match settings.backend {
        Backend::Local => {
            let engine = LocalJobEngine::new(Path::new(&settings.jobs_dir))?;
            let job_id: u64 = id
                .parse()
                .map_err(|_| JobError::NotFound(id.to_string()))?;
            engine.store().get(job_id)?;
            let staged = engine.store().staged_output_dir(job_id);
            if staged.is_dir() {
                Ok(format!("output for job {} is at {}", id, staged.display()))
            } else {
                Ok(format!("no staged output for job {}", id))
            }
        }
        Backend::Remote => {
            let engine = remote_engine(settings);
            let dest = PathBuf::from(dest.unwrap_or_else(|| ".".into()));
            if engine.download_output_via_container(id, &dest)? {
                return Ok(format!(
                    "output downloaded from the live container to {}",
                    dest.display()
                ));
            }
            engine.download_output_via_storage(id, &dest)?;
            Ok(format!(
                "output downloaded from object storage to {}",
                dest.display()
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn format_summaries(summaries: &[JobSummary]) -> String {
    if summaries.is_empty() {
        return "no jobs".into();
    }
    let mut lines = vec![format!(
        "{:<12} {:<16} {:<20} COMMAND",
        "ID", "STATUS", "STARTED"
    )];
    for summary in summaries {
        let mut command = summary.command.clone();
        for arg in &summary.args {
            command.push(' ');
            command.push_str(arg);
        }
        lines.push(format!(
            "{:<12} {:<16} {:<20} {}",
            summary.id,
            summary.status.as_str(),
            summary.start_time,
            command
        ));
    }
    lines.join("\n")
}

fn usage() -> &'static str {
    "jobrig - run and supervise jobs locally or on cloud GPUs

Usage:
  jobrig run [flags] <command> [args...]   submit a job
      --working-dir <dir>   directory the command runs in
      --output-dir <dir>    directory staged as the job's output
      --env KEY=VALUE       extra child environment (repeatable)
      --input <locator>     remote input staged before execution (repeatable)
      --gpu <n>             GPUs to request (remote backend)
      --image <name>        image name (remote backend)
      --priority <n>        scheduling priority
      --description <text>  free-form note shown in listings
  jobrig list                              all jobs, most recent first
  jobrig status <id>                       current status of one job
  jobrig log <id>                          captured output of one job
  jobrig stop <id>                         terminate a running job
  jobrig remove <id>                       delete a finished job's output
  jobrig fetch <id> [dest]                 retrieve a job's output
  jobrig stock                             GPU availability (remote backend)
  jobrig images                            private image list (remote backend)
  jobrig blacklist                         barred machines (remote backend)
  jobrig help                              this text"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use jobrig_core::job::{JobDescription, JobStatus};

    fn local_settings() -> Settings {
        Settings {
            backend: Backend::Local,
            ..Settings::default()
        }
    }

    #[test]
    fn remote_only_commands_are_rejected_on_the_local_backend() {
        let settings = local_settings();
        for command in [Command::Stock, Command::Images, Command::Blacklist] {
            match execute(&settings, command) {
                Err(JobError::Unsupported(msg)) => {
                    assert!(msg.contains("remote backend"), "{}", msg)
                }
                other => panic!("expected Unsupported, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn summaries_format_one_line_per_job() {
        let mut job = JobDescription::new("python");
        job.args = vec!["train.py".into()];
        job.job_id = "3".into();
        job.status = JobStatus::Running;
        job.start_time = "2026-08-25T10:00:00+00:00".into();
        let text = format_summaries(&[JobSummary::from_description("3", &job)]);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("running"));
        assert!(lines[1].contains("python train.py"));
    }

    #[test]
    fn empty_listing_says_so() {
        assert_eq!(format_summaries(&[]), "no jobs");
    }
}
