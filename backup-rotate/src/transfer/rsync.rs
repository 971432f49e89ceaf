//! rsync command construction and execution.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::{classify_exit, TransferOutcome};
use crate::config::Config;
use crate::retention::Generation;
use crate::store::{shell_escape, GenerationStore};
use crate::utils::errors::{Result, RotateError};

/// Flags always passed before the configured extras.
const DEFAULT_FLAGS: &[&str] = &["-aH", "--delete", "--numeric-ids", "--partial", "--stats"];

/// A fully built rsync command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncInvocation {
    pub program: String,
    pub args: Vec<String>,
}

/// Counters scraped from rsync's `--stats` summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub files_transferred: Option<u64>,
    pub bytes_transferred: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    pub stats: TransferStats,
    pub duration: Duration,
}

impl RsyncInvocation {
    /// Build the command copying the source into `target`, hard-linking
    /// unchanged files against `link_dests`.
    pub fn build(
        config: &Config,
        store: &dyn GenerationStore,
        target: Generation,
        link_dests: &[Generation],
    ) -> Self {
        let (program, leading) = config
            .rsync_command
            .split_first()
            .map(|(program, rest)| (program.clone(), rest.to_vec()))
            .unwrap_or_else(|| ("rsync".to_string(), Vec::new()));

        let mut args = leading;
        args.extend(DEFAULT_FLAGS.iter().map(|flag| flag.to_string()));

        if config.is_remote() {
            let mut ssh: Vec<String> = config.ssh_command.iter().map(|part| shell_escape(part)).collect();
            ssh.extend(config.ssh_options.iter().map(|opt| shell_escape(opt)));
            args.push("-e".to_string());
            args.push(ssh.join(" "));
        }

        args.extend(config.rsync_options.iter().cloned());

        // Relative link-dest paths resolve against the destination directory
        for reference in link_dests {
            args.push(format!("--link-dest=../{reference}"));
        }

        let source = config.source.to_string_lossy();
        args.push(format!("{}/", source.trim_end_matches('/')));
        args.push(store.rsync_target(&target.dir_name()));

        Self { program, args }
    }

    /// Shell-like rendering for logs and dry runs.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| shell_escape(part))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run rsync, streaming its output into the log.
    ///
    /// The child is killed if this future is dropped.
    pub async fn run(&self) -> Result<TransferReport> {
        let start = Instant::now();
        info!("Running {}", self.command_line());

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RotateError::Config(format!("cannot run {}: {e}", self.program)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RotateError::Io(std::io::Error::other("rsync stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RotateError::Io(std::io::Error::other("rsync stderr not captured")))?;

        let mut stats = TransferStats::default();

        let read_stdout = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                stats.observe(&line);
                info!("rsync: {line}");
            }
            Ok::<_, std::io::Error>(())
        };

        let read_stderr = async {
            let mut lines = BufReader::new(stderr).lines();
            while let Some(line) = lines.next_line().await? {
                warn!("rsync: {line}");
            }
            Ok::<_, std::io::Error>(())
        };

        let (stdout_result, stderr_result, status) =
            tokio::join!(read_stdout, read_stderr, child.wait());
        stdout_result?;
        stderr_result?;
        let status = status?;

        let outcome = classify_exit(status.code())?;
        if outcome == TransferOutcome::Vanished {
            warn!("Some source files vanished during transfer (rsync exit 24), continuing");
        }

        Ok(TransferReport {
            outcome,
            stats,
            duration: start.elapsed(),
        })
    }
}

impl TransferStats {
    /// Pick the counters out of one `--stats` line.
    fn observe(&mut self, line: &str) {
        let Some((label, value)) = line.split_once(':') else {
            return;
        };

        let label = label.trim();
        if label == "Number of regular files transferred" || label == "Number of files transferred" {
            self.files_transferred = parse_count(value);
        } else if label == "Total transferred file size" {
            self.bytes_transferred = parse_count(value);
        }
    }
}

/// Parse `" 1,234 bytes"` into 1234.
fn parse_count(value: &str) -> Option<u64> {
    value
        .split_whitespace()
        .next()
        .map(|number| number.replace([',', '.'], ""))
        .and_then(|number| number.parse().ok())
}
