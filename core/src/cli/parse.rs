use crate::command::Command;

/// Parse CLI arguments into a typed `Command`.
///
/// Arguments are expected WITHOUT the program name (i.e. `args` should
/// be `["stop", "3"]`, not `["jobrig", "stop", "3"]`).
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'jobrig help' for usage.".into());
    }

    match args[0] {
        "run" => parse_run(&args[1..]),
        "stop" => parse_id(args, |id| Command::Stop { id }),
        "status" => parse_id(args, |id| Command::Status { id }),
        "list" => Ok(Command::List),
        "remove" => parse_id(args, |id| Command::Remove { id }),
        "log" => parse_id(args, |id| Command::Log { id }),
        "fetch" => parse_fetch(args),
        "stock" => Ok(Command::Stock),
        "images" => Ok(Command::Images),
        "blacklist" => Ok(Command::Blacklist),
        "worker" => parse_worker(args),
        "remote-worker" => parse_remote_worker(args),
        "help" | "--help" | "-h" => Ok(Command::Help),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}

// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `jobrig run [flags] <command> [args...]`
///
/// Flags come first; the first token that is not a flag starts the user
/// command, and everything after it belongs to that command verbatim.
fn parse_run(rest: &[&str]) -> Result<Command, String> {
    let mut working_dir = None;
    let mut output_dir = None;
    let mut env = Vec::new();
    let mut input = Vec::new();
    let mut gpu_num = None;
    let mut image = None;
    let mut priority = None;
    let mut description = None;

    let mut i = 0;
    while i < rest.len() && rest[i].starts_with("--") {
        match rest[i] {
            "--working-dir" => {
                i += 1;
                working_dir = Some(take_arg(rest, i, "--working-dir")?);
            }
            "--output-dir" => {
                i += 1;
                output_dir = Some(take_arg(rest, i, "--output-dir")?);
            }
            "--env" => {
                i += 1;
                env.push(take_arg(rest, i, "--env")?);
            }
            "--input" => {
                i += 1;
                input.push(take_arg(rest, i, "--input")?);
            }
            "--gpu" => {
                i += 1;
                gpu_num = Some(take_int(rest, i, "--gpu")?);
            }
            "--image" => {
                i += 1;
                image = Some(take_arg(rest, i, "--image")?);
            }
            "--priority" => {
                i += 1;
                priority = Some(take_int(rest, i, "--priority")?);
            }
            "--description" => {
                i += 1;
                description = Some(take_arg(rest, i, "--description")?);
            }
            other => return Err(format!("Unknown flag for run: '{}'", other)),
        }
        i += 1;
    }
    if i >= rest.len() {
        return Err("Usage: jobrig run [flags] <command> [args...]".into());
    }
    Ok(Command::Run {
        cmd: rest[i].to_string(),
        args: rest[i + 1..].iter().map(|s| s.to_string()).collect(),
        working_dir,
        output_dir,
        env,
        input,
        gpu_num,
        image,
        priority,
        description,
    })
}

/// `jobrig <stop|status|remove|log> <id>`
fn parse_id(args: &[&str], build: fn(String) -> Command) -> Result<Command, String> {
    if args.len() < 2 {
        return Err(format!("Usage: jobrig {} <id>", args[0]));
    }
    Ok(build(args[1].to_string()))
}

/// `jobrig fetch <id> [dest]`
fn parse_fetch(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: jobrig fetch <id> [dest]".into());
    }
    Ok(Command::Fetch {
        id: args[1].to_string(),
        dest: args.get(2).map(|s| s.to_string()),
    })
}

/// `jobrig worker <job_dir> <job_id>`
fn parse_worker(args: &[&str]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("Usage: jobrig worker <job_dir> <job_id>".into());
    }
    let job_id = args[2]
        .parse()
        .map_err(|_| format!("Bad job id: '{}'", args[2]))?;
    Ok(Command::Worker {
        job_dir: args[1].to_string(),
        job_id,
    })
}

/// `jobrig remote-worker <payload>`
fn parse_remote_worker(args: &[&str]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("Usage: jobrig remote-worker <payload>".into());
    }
    Ok(Command::RemoteWorker {
        payload: args[1].to_string(),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn take_arg(args: &[&str], i: usize, flag: &str) -> Result<String, String> {
    args.get(i)
        .map(|s| s.to_string())
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn take_int(args: &[&str], i: usize, flag: &str) -> Result<i64, String> {
    let text = take_arg(args, i, flag)?;
    text.parse()
        .map_err(|_| format!("Bad integer for {}: '{}'", flag, text))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- run --

    #[test]
    fn run_with_flags_and_command_args() {
        let cmd = parse_args(&[
            "run",
            "--working-dir",
            "/work",
            "--output-dir",
            "out",
            "--env",
            "A=1",
            "--env",
            "B=2",
            "--gpu",
            "2",
            "python",
            "-c",
            "print(1)",
        ])
        .unwrap();
        match cmd {
            Command::Run {
                cmd,
                args,
                working_dir,
                output_dir,
                env,
                gpu_num,
                ..
            } => {
                assert_eq!(cmd, "python");
                assert_eq!(args, vec!["-c".to_string(), "print(1)".into()]);
                assert_eq!(working_dir.as_deref(), Some("/work"));
                assert_eq!(output_dir.as_deref(), Some("out"));
                assert_eq!(env, vec!["A=1".to_string(), "B=2".into()]);
                assert_eq!(gpu_num, Some(2));
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn run_command_flags_belong_to_the_command() {
        // Flags after the command token are the command's own.
        let cmd = parse_args(&["run", "ls", "--color", "-la"]).unwrap();
        match cmd {
            Command::Run { cmd, args, .. } => {
                assert_eq!(cmd, "ls");
                assert_eq!(args, vec!["--color".to_string(), "-la".into()]);
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn run_without_a_command_is_an_error() {
        assert!(parse_args(&["run"]).is_err());
        assert!(parse_args(&["run", "--gpu", "1"]).is_err());
    }

    #[test]
    fn run_rejects_bad_flag_values() {
        assert!(parse_args(&["run", "--gpu", "two", "python"]).is_err());
        assert!(parse_args(&["run", "--env"]).is_err());
        assert!(parse_args(&["run", "--frobnicate", "x", "python"]).is_err());
    }

    // -- id commands --

    #[test]
    fn id_commands_parse() {
        assert_eq!(
            parse_args(&["stop", "3"]).unwrap(),
            Command::Stop { id: "3".into() }
        );
        assert_eq!(
            parse_args(&["status", "dep-abc"]).unwrap(),
            Command::Status { id: "dep-abc".into() }
        );
        assert_eq!(
            parse_args(&["remove", "1"]).unwrap(),
            Command::Remove { id: "1".into() }
        );
        assert_eq!(
            parse_args(&["log", "1"]).unwrap(),
            Command::Log { id: "1".into() }
        );
        assert!(parse_args(&["stop"]).is_err());
    }

    #[test]
    fn fetch_takes_an_optional_destination() {
        assert_eq!(
            parse_args(&["fetch", "3"]).unwrap(),
            Command::Fetch {
                id: "3".into(),
                dest: None
            }
        );
        assert_eq!(
            parse_args(&["fetch", "3", "/tmp/out"]).unwrap(),
            Command::Fetch {
                id: "3".into(),
                dest: Some("/tmp/out".into())
            }
        );
    }

    // -- worker entries --

    #[test]
    fn worker_entry_parses() {
        assert_eq!(
            parse_args(&["worker", "/jobs/job_3", "3"]).unwrap(),
            Command::Worker {
                job_dir: "/jobs/job_3".into(),
                job_id: 3
            }
        );
        assert!(parse_args(&["worker", "/jobs/job_3", "x"]).is_err());
        assert!(parse_args(&["worker", "/jobs/job_3"]).is_err());
    }

    #[test]
    fn remote_worker_entry_parses() {
        assert_eq!(
            parse_args(&["remote-worker", "eyJ4IjoxfQ=="]).unwrap(),
            Command::RemoteWorker {
                payload: "eyJ4IjoxfQ==".into()
            }
        );
    }

    // -- misc --

    #[test]
    fn bare_commands_parse() {
        assert_eq!(parse_args(&["list"]).unwrap(), Command::List);
        assert_eq!(parse_args(&["stock"]).unwrap(), Command::Stock);
        assert_eq!(parse_args(&["images"]).unwrap(), Command::Images);
        assert_eq!(parse_args(&["blacklist"]).unwrap(), Command::Blacklist);
        assert_eq!(parse_args(&["help"]).unwrap(), Command::Help);
    }

    #[test]
    fn unknown_and_empty_are_errors() {
        assert!(parse_args(&[]).is_err());
        assert!(parse_args(&["frobnicate"]).is_err());
    }
}
