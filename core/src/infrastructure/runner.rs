//! Command runner abstraction for executing shell commands.
//!
//! `CommandRunner` is the trait the ssh, storage, and archive modules use
//! to execute system commands. `ShellRunner` is the production
//! implementation that spawns `sh -c`. `MockRunner` is the test double
//! that records calls and returns preset responses.

use std::cell::RefCell;
use std::process::Command;

/// Trait for executing shell command strings. On success returns the
/// captured stdout; on failure returns a message carrying the exit code
/// and stderr.
pub trait CommandRunner: Send {
    fn run(&self, cmd: &str) -> Result<String, String>;
}

/// Production runner that spawns `sh -c <cmd>`.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .output()
            .map_err(|e| format!("failed to execute '{}': {}", cmd, e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            ))
        }
    }
}

/// Quote a string for safe inclusion in an `sh -c` command line.
pub fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=%+,".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Test-double runner that records commands and returns pre-configured
/// responses (first configured response answers the first call).
pub struct MockRunner {
    responses: RefCell<Vec<Result<String, String>>>,
    commands: RefCell<Vec<String>>,
}

// RefCell is fine here: the mock is only driven from one test thread.
unsafe impl Send for MockRunner {}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner {
            responses: RefCell::new(Vec::new()),
            commands: RefCell::new(Vec::new()),
        }
    }

    pub fn with_responses(responses: Vec<Result<String, String>>) -> Self {
        let mut reversed = responses;
        reversed.reverse();
        MockRunner {
            responses: RefCell::new(reversed),
            commands: RefCell::new(Vec::new()),
        }
    }

    /// Every command string this runner has been asked to execute.
    pub fn executed_commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, cmd: &str) -> Result<String, String> {
        self.commands.borrow_mut().push(cmd.to_string());
        match self.responses.borrow_mut().pop() {
            Some(response) => response,
            None => Ok(String::new()),
        }
    }
}
