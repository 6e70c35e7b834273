//! Remote-shell client: execute commands and fetch files over SSH.
//!
//! Builds `ssh`/`scp` command lines and runs them through
//! `CommandRunner`. Directory downloads are pack-transfer-unpack: the
//! remote side tars the tree into a temp archive, the archive is copied
//! down, then extracted and cleaned up on both ends.

use std::path::Path;

use crate::archive::Archiver;
use crate::error::{JobError, Result};
use crate::infrastructure::runner::{shell_escape, CommandRunner};

// ---------------------------------------------------------------------------
// SshTarget
// ---------------------------------------------------------------------------

/// Connection coordinates for one remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Password auth goes through `sshpass`; prefer `key_file` where
    /// possible.
    pub password: Option<String>,
    pub key_file: Option<String>,
}

impl SshTarget {
    pub fn new(host: &str, port: u16, user: &str) -> Self {
        SshTarget {
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: None,
            key_file: None,
        }
    }

    /// Parse a provider-issued connection string of the form
    /// `ssh -p <port> <user>@<host>`, attaching the given password.
    pub fn parse_command(command: &str, password: Option<&str>) -> Option<SshTarget> {
        let tokens: Vec<&str> = command.split_whitespace().collect();
        let mut port = 22u16;
        let mut login = None;
        let mut i = 0;
        while i < tokens.len() {
            match tokens[i] {
                "ssh" => {}
                "-p" => {
                    port = tokens.get(i + 1)?.parse().ok()?;
                    i += 1;
                }
                tok if tok.contains('@') => login = Some(tok),
                _ => {}
            }
            i += 1;
        }
        let (user, host) = login?.split_once('@')?;
        let mut target = SshTarget::new(host, port, user);
        target.password = password.map(|p| p.to_string());
        Some(target)
    }

    /// `user@host` form used by ssh and scp.
    fn login(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Common option prefix (`sshpass` wrapper, host-key policy, port
    /// flag, identity file) for an ssh or scp invocation. scp spells the
    /// port flag `-P`.
    fn base_command(&self, program: &str, port_flag: &str) -> String {
        let mut cmd = String::new();
        if let Some(password) = &self.password {
            cmd.push_str(&format!("sshpass -p {} ", shell_escape(password)));
        }
        cmd.push_str(program);
        cmd.push_str(" -o StrictHostKeyChecking=no");
        cmd.push_str(&format!(" {} {}", port_flag, self.port));
        if let Some(key) = &self.key_file {
            cmd.push_str(&format!(" -i {}", shell_escape(key)));
        }
        cmd
    }
}

// ---------------------------------------------------------------------------
// SshClient
// ---------------------------------------------------------------------------

pub struct SshClient<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SshClient<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        SshClient { runner }
    }

    /// Run `command` on the target, returning its trimmed stdout.
    pub fn execute(&self, command: &str, target: &SshTarget) -> Result<String> {
        let cmd = format!(
            "{} {} {}",
            target.base_command("ssh", "-p"),
            shell_escape(&target.login()),
            shell_escape(command)
        );
        let out = self.runner.run(&cmd).map_err(JobError::Network)?;
        Ok(out.trim().to_string())
    }

    /// Download a remote path. A trailing `/` marks a directory download
    /// (pack remote side, transfer, unpack under
    /// `local_path/<basename>`); otherwise a single `scp`.
    pub fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
        target: &SshTarget,
    ) -> Result<()> {
        if remote_path.ends_with('/') {
            self.download_dir(remote_path, local_path, target)
        } else {
            self.scp_get(remote_path, local_path, target)
        }
    }

    fn scp_get(&self, remote_path: &str, local_path: &Path, target: &SshTarget) -> Result<()> {
        let cmd = format!(
            "{} {}:{} {}",
            target.base_command("scp", "-P"),
            shell_escape(&target.login()),
            shell_escape(remote_path),
            shell_escape(&local_path.to_string_lossy())
        );
        self.runner.run(&cmd).map_err(JobError::Network)?;
        Ok(())
    }

    fn download_dir(
        &self,
        remote_path: &str,
        local_path: &Path,
        target: &SshTarget,
    ) -> Result<()> {
        let basename = remote_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("download")
            .to_string();
        let remote_tmp = format!("/tmp/{}_0.tar", basename);

        let local_target = local_path.join(&basename);
        if local_target.exists() {
            return Err(JobError::Conflict(format!(
                "download target {} already exists",
                local_target.display()
            )));
        }
        std::fs::create_dir_all(&local_target)?;

        // Pack on the remote, fetch the archive, then unpack with the
        // archiver (which deletes the fetched archive as it goes). The
        // remote temp archive is removed even if the fetch fails.
        let pack = format!(
            "rm -rf {tmp} && tar -cf {tmp} -C {src} .",
            tmp = shell_escape(&remote_tmp),
            src = shell_escape(remote_path)
        );
        self.execute(&pack, target)?;

        let local_tmp = local_path.join(format!("{}_0.tar", basename));
        let fetch = self.scp_get(&remote_tmp, &local_tmp, target);
        let _ = self.execute(&format!("rm -rf {}", shell_escape(&remote_tmp)), target);
        fetch?;

        Archiver::new(self.runner).unpack_and_delete(local_path, &local_target, &basename)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::runner::MockRunner;

    fn target() -> SshTarget {
        SshTarget::new("10.0.0.1", 22, "root")
    }

    // -- Target parsing --

    #[test]
    fn parses_provider_connection_string() {
        let t = SshTarget::parse_command("ssh -p 30022 root@gpu-7.example.com", Some("pw"))
            .unwrap();
        assert_eq!(t.host, "gpu-7.example.com");
        assert_eq!(t.port, 30022);
        assert_eq!(t.user, "root");
        assert_eq!(t.password.as_deref(), Some("pw"));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(SshTarget::parse_command("not a connection", None).is_none());
        assert!(SshTarget::parse_command("ssh -p x root@h", None).is_none());
    }

    // -- Command construction --

    #[test]
    fn execute_builds_ssh_command() {
        let runner = MockRunner::with_responses(vec![Ok("  4242\n".into())]);
        let out = SshClient::new(&runner)
            .execute("cat /work/pid", &target())
            .unwrap();
        assert_eq!(out, "4242");

        let cmds = runner.executed_commands();
        assert_eq!(
            cmds[0],
            "ssh -o StrictHostKeyChecking=no -p 22 root@10.0.0.1 'cat /work/pid'"
        );
    }

    #[test]
    fn execute_with_key_and_port() {
        let mut t = target();
        t.port = 2222;
        t.key_file = Some("/keys/id_rsa".into());
        let runner = MockRunner::new();
        SshClient::new(&runner).execute("ls", &t).unwrap();
        assert_eq!(
            runner.executed_commands()[0],
            "ssh -o StrictHostKeyChecking=no -p 2222 -i /keys/id_rsa root@10.0.0.1 ls"
        );
    }

    #[test]
    fn execute_with_password_uses_sshpass() {
        let mut t = target();
        t.password = Some("secret".into());
        let runner = MockRunner::new();
        SshClient::new(&runner).execute("ls", &t).unwrap();
        assert!(runner.executed_commands()[0].starts_with("sshpass -p secret ssh "));
    }

    #[test]
    fn single_file_download_uses_scp() {
        let runner = MockRunner::new();
        SshClient::new(&runner)
            .download("/work/result.txt", Path::new("/tmp/result.txt"), &target())
            .unwrap();
        assert_eq!(
            runner.executed_commands()[0],
            "scp -o StrictHostKeyChecking=no -P 22 root@10.0.0.1:/work/result.txt /tmp/result.txt"
        );
    }

    #[test]
    fn directory_download_packs_transfers_unpacks() {
        let dir = tempfile::TempDir::new().unwrap();
        // Stand in for the archive scp would have fetched.
        std::fs::write(dir.path().join("output_0.tar"), b"tar bytes").unwrap();
        let runner = MockRunner::new();
        SshClient::new(&runner)
            .download("/work/output/", dir.path(), &target())
            .unwrap();

        let cmds = runner.executed_commands();
        assert_eq!(cmds.len(), 4);
        assert!(cmds[0].contains("tar -cf /tmp/output_0.tar -C /work/output/ ."));
        assert!(cmds[1].starts_with("scp "), "got: {}", cmds[1]);
        assert!(cmds[1].contains(":/tmp/output_0.tar"));
        assert!(cmds[2].contains("rm -rf /tmp/output_0.tar"));
        assert!(cmds[3].starts_with("tar -xf "), "got: {}", cmds[3]);
        assert!(dir.path().join("output").is_dir());
        // The fetched archive is consumed by the unpack.
        assert!(!dir.path().join("output_0.tar").exists());
    }

    #[test]
    fn directory_download_refuses_existing_target() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("output")).unwrap();
        let runner = MockRunner::new();
        let err = SshClient::new(&runner)
            .download("/work/output/", dir.path(), &target())
            .unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));
        assert!(runner.executed_commands().is_empty());
    }

    #[test]
    fn ssh_failure_maps_to_network_error() {
        let runner = MockRunner::with_responses(vec![Err("connection refused".into())]);
        let err = SshClient::new(&runner)
            .execute("ls", &target())
            .unwrap_err();
        assert!(matches!(err, JobError::Network(_)));
    }
}
