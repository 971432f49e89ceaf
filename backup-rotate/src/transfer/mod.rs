//! Transfer of the source into a fresh generation with rsync.
//!
//! rsync does the real work: hard-linking unchanged files against the
//! reference generations given with `--link-dest`, and resuming partial
//! files. This module only builds the command line and classifies the exit
//! status.

pub mod rsync;

pub use rsync::{RsyncInvocation, TransferReport};

use crate::utils::errors::{Result, RotateError};

/// "Partial transfer due to vanished source files".
pub const EXIT_VANISHED: i32 = 24;

/// How a transfer finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Complete,
    /// Files disappeared while rsync was reading them
    Vanished,
}

/// Map an rsync exit status to an outcome; anything but 0 and 24 is fatal.
///
/// `None` means rsync was killed by a signal.
pub fn classify_exit(code: Option<i32>) -> Result<TransferOutcome> {
    match code {
        Some(0) => Ok(TransferOutcome::Complete),
        Some(EXIT_VANISHED) => Ok(TransferOutcome::Vanished),
        Some(code) => Err(RotateError::transfer(code)),
        // Same status rsync reports when it catches SIGINT itself
        None => Err(RotateError::transfer(20)),
    }
}

/// rsync's description of its exit codes (see rsync(1), EXIT VALUES).
pub fn describe_exit_code(code: i32) -> &'static str {
    match code {
        0 => "success",
        1 => "syntax or usage error",
        2 => "protocol incompatibility",
        3 => "errors selecting input/output files, dirs",
        4 => "requested action not supported",
        5 => "error starting client-server protocol",
        6 => "daemon unable to append to log-file",
        10 => "error in socket I/O",
        11 => "error in file I/O",
        12 => "error in rsync protocol data stream",
        13 => "errors with program diagnostics",
        14 => "error in IPC code",
        20 => "received SIGUSR1 or SIGINT",
        21 => "some error returned by waitpid()",
        22 => "error allocating core memory buffers",
        23 => "partial transfer due to error",
        24 => "partial transfer due to vanished source files",
        25 => "the --max-delete limit stopped deletions",
        30 => "timeout in data send/receive",
        35 => "timeout waiting for daemon connection",
        127 => "command not found",
        _ => "unknown error",
    }
}
