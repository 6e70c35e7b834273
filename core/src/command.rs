//! Command — the typed interface for every CLI operation.
//!
//! Each variant corresponds to exactly one operation the `jobrig` binary
//! dispatches. Serialized as JSON with a `"command"` discriminant, which
//! doubles as the API documentation of the surface:
//!
//! ```json
//! {"command": "run", "cmd": "python", "args": ["-c", "print(1)"]}
//! {"command": "stop", "id": "3"}
//! {"command": "list"}
//! ```

use serde::{Deserialize, Serialize};

use crate::job::JobDescription;

/// A typed `jobrig` operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command")]
pub enum Command {
    /// Submit a job to the configured backend.
    #[serde(rename = "run")]
    Run {
        /// The user command to execute.
        cmd: String,
        /// Arguments for the user command.
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_dir: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_dir: Option<String>,
        /// `KEY=VALUE` pairs for the child environment.
        #[serde(default)]
        env: Vec<String>,
        /// Remote input locators staged before execution.
        #[serde(default)]
        input: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gpu_num: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        image: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        priority: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Request termination of a job.
    #[serde(rename = "stop")]
    Stop { id: String },

    /// Print a job's current status.
    #[serde(rename = "status")]
    Status { id: String },

    /// List all jobs, most recent first.
    #[serde(rename = "list")]
    List,

    /// Delete artifacts of a terminal job.
    #[serde(rename = "remove")]
    Remove { id: String },

    /// Print a job's captured log.
    #[serde(rename = "log")]
    Log { id: String },

    /// Retrieve a job's output.
    #[serde(rename = "fetch")]
    Fetch {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dest: Option<String>,
    },

    /// Per-GPU-type stock in the configured region (remote backend).
    #[serde(rename = "stock")]
    Stock,

    /// The provider's private image list (remote backend).
    #[serde(rename = "images")]
    Images,

    /// Machines the account is currently barred from (remote backend).
    #[serde(rename = "blacklist")]
    Blacklist,

    /// Detached worker entry; spawned by the local engine, not typed by
    /// users.
    #[serde(rename = "worker")]
    Worker { job_dir: String, job_id: u64 },

    /// In-container worker entry; the deployment launch command.
    #[serde(rename = "remote-worker")]
    RemoteWorker { payload: String },

    #[serde(rename = "help")]
    Help,
}

/// Build the `JobDescription` a `run` command describes. `None` for any
/// other variant.
pub fn job_from_run(command: &Command) -> Option<Result<JobDescription, String>> {
    let Command::Run {
        cmd,
        args,
        working_dir,
        output_dir,
        env,
        input,
        gpu_num,
        image,
        priority,
        description,
    } = command
    else {
        return None;
    };
    let mut job = JobDescription::new(cmd);
    job.args = args.clone();
    job.working_dir = working_dir.clone().unwrap_or_default();
    job.output_dir = output_dir.clone().unwrap_or_default();
    for pair in env {
        match pair.split_once('=') {
            Some((key, value)) => {
                job.env.insert(key.to_string(), value.to_string());
            }
            None => return Some(Err(format!("bad --env '{}', expected KEY=VALUE", pair))),
        }
    }
    job.input_paths = input.clone();
    job.gpu_num = gpu_num.unwrap_or(0);
    job.image = image.clone().unwrap_or_default();
    job.priority = priority.unwrap_or(0);
    job.description = description.clone().unwrap_or_default();
    Some(Ok(job))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_command() -> Command {
        Command::Run {
            cmd: "python".into(),
            args: vec!["-c".into(), "print(1)".into()],
            working_dir: Some("/work".into()),
            output_dir: Some("out".into()),
            env: vec!["A=1".into(), "B=x=y".into()],
            input: vec!["cos://bucket/data.txt".into()],
            gpu_num: Some(2),
            image: None,
            priority: None,
            description: Some("demo".into()),
        }
    }

    #[test]
    fn wire_format_uses_command_discriminant() {
        let text = serde_json::to_string(&Command::Stop { id: "3".into() }).unwrap();
        assert_eq!(text, r#"{"command":"stop","id":"3"}"#);
        let back: Command = serde_json::from_str(&text).unwrap();
        assert_eq!(back, Command::Stop { id: "3".into() });
    }

    #[test]
    fn run_converts_to_a_job_description() {
        let job = job_from_run(&run_command()).unwrap().unwrap();
        assert_eq!(job.command, "python");
        assert_eq!(job.args, vec!["-c".to_string(), "print(1)".into()]);
        assert_eq!(job.working_dir, "/work");
        assert_eq!(job.output_dir, "out");
        assert_eq!(job.env["A"], "1");
        // Only the first '=' splits the pair.
        assert_eq!(job.env["B"], "x=y");
        assert_eq!(job.gpu_num, 2);
        assert_eq!(job.description, "demo");
    }

    #[test]
    fn bad_env_pair_is_rejected() {
        let command = Command::Run {
            cmd: "true".into(),
            args: Vec::new(),
            working_dir: None,
            output_dir: None,
            env: vec!["NOVALUE".into()],
            input: Vec::new(),
            gpu_num: None,
            image: None,
            priority: None,
            description: None,
        };
        assert!(job_from_run(&command).unwrap().is_err());
    }

    #[test]
    fn non_run_variants_yield_none() {
        assert!(job_from_run(&Command::List).is_none());
        assert!(job_from_run(&Command::Help).is_none());
    }
}
