//! Generation store on a remote host, driven through ssh.
//!
//! Every operation is one `ssh <server> -- <command>` round trip running
//! plain POSIX tools on the far side. The `ssh` program itself comes from
//! `ssh_command`, so a wrapper can stand in for it.

use std::path::PathBuf;
use std::process::{Command, Output};

use tracing::debug;

use super::{shell_escape_path, GenerationStore};
use crate::utils::errors::{Result, RotateError};

/// Exit status `test` uses for "false".
const TEST_FALSE: i32 = 1;

#[derive(Debug, Clone)]
pub struct SshStore {
    server: String,
    command: Vec<String>,
    ssh_options: Vec<String>,
    root: PathBuf,
}

impl SshStore {
    pub fn new(server: String, ssh_options: Vec<String>, root: PathBuf) -> Self {
        Self {
            server,
            command: vec!["ssh".to_string()],
            ssh_options,
            root,
        }
    }

    /// Replace the `ssh` program (plus leading arguments).
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.command = command;
        }
        self
    }

    /// Arguments after the program for running `remote_command` on the server.
    pub fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let mut args = self.command[1..].to_vec();
        args.extend(self.ssh_options.iter().cloned());
        args.push(self.server.clone());
        args.push("--".to_string());
        args.push(remote_command.to_string());
        args
    }

    fn run(&self, remote_command: &str) -> Result<Output> {
        debug!(server = %self.server, "ssh: {remote_command}");
        let program = &self.command[0];
        Command::new(program)
            .args(self.ssh_args(remote_command))
            .output()
            .map_err(|e| RotateError::Remote(format!("failed to start {program}: {e}")))
    }

    fn run_checked(&self, remote_command: &str) -> Result<Output> {
        let output = self.run(remote_command)?;
        if !output.status.success() {
            return Err(RotateError::Remote(format!(
                "'{remote_command}' on {} exited with {}: {}",
                self.server,
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    /// Run a `test` expression remotely, mapping status 1 to false.
    fn test(&self, expression: &str) -> Result<bool> {
        let output = self.run(&format!("test {expression}"))?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(TEST_FALSE) => Ok(false),
            _ => Err(RotateError::Remote(format!(
                "'test {expression}' on {} failed: {}",
                self.server,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }

    fn path(&self, name: &str) -> String {
        shell_escape_path(&self.root.join(name))
    }
}

impl GenerationStore for SshStore {
    fn describe(&self) -> String {
        format!("{}:{}", self.server, self.root.display())
    }

    fn ensure_root(&self) -> Result<()> {
        self.run_checked(&format!("mkdir -p -- {}", shell_escape_path(&self.root)))?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let root = shell_escape_path(&self.root);
        // A missing root lists as empty, matching the local store
        let output = self.run_checked(&format!(
            "if test -d {root}; then ls -1A -- {root}; fi"
        ))?;

        let mut names: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        self.test(&format!("-d {}", self.path(name)))
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.run_checked(&format!("rm -rf -- {}", self.path(name)))?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.path(to);
        if self.test(&format!("-e {target}"))? {
            return Err(RotateError::Collision(format!("{}:{}", self.server, self.root.join(to).display())));
        }
        self.run_checked(&format!("mv -- {} {target}", self.path(from)))?;
        Ok(())
    }

    fn rsync_target(&self, name: &str) -> String {
        format!("{}:{}/", self.server, self.root.join(name).display())
    }
}
