//! Custom error types for backup-rotate.
//!
//! Every variant maps to a numeric process exit code so that cron wrappers
//! and monitoring can tell a held lock apart from a failed transfer.

use std::path::PathBuf;
use thiserror::Error;

use crate::transfer::describe_exit_code;

#[derive(Error, Debug)]
pub enum RotateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration error: {0}")]
    Settings(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup already running{} (lock {})", .pid.map(|p| format!(" as pid {p}")).unwrap_or_default(), .path.display())]
    Locked { pid: Option<i32>, path: PathBuf },

    #[error("Generation collision: {0} already exists")]
    Collision(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("rsync exited with code {code}: {reason}")]
    Transfer { code: i32, reason: &'static str },

    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error("Mount error: {0}")]
    Mount(String),

    #[error("Mail error: {0}")]
    Mail(String),

    #[error("Interrupted by {name}")]
    Interrupted { name: &'static str, signal: i32 },
}

impl RotateError {
    /// Transfer failure carrying rsync's own description of `code`.
    pub fn transfer(code: i32) -> Self {
        RotateError::Transfer {
            code,
            reason: describe_exit_code(code),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            RotateError::Config(_) | RotateError::Settings(_) => 2,
            RotateError::Locked { .. } => 3,
            RotateError::Hook(_) => 4,
            RotateError::Transfer { code, .. } => *code,
            RotateError::Interrupted { signal, .. } => 128 + signal,
            RotateError::Io(_)
            | RotateError::Collision(_)
            | RotateError::Remote(_)
            | RotateError::Mount(_)
            | RotateError::Mail(_) => 1,
        }
    }

    /// Short human string for the exit code, taken from the variant so rsync
    /// codes sharing a value with our own categories keep rsync's meaning.
    pub fn describe(&self) -> &'static str {
        match self {
            RotateError::Config(_) | RotateError::Settings(_) => "configuration or usage error",
            RotateError::Locked { .. } => "another run holds the lock",
            RotateError::Hook(_) => "before hook failed",
            RotateError::Transfer { reason, .. } => *reason,
            RotateError::Interrupted { signal, .. } => match *signal {
                1 => "terminated by SIGHUP",
                2 => "terminated by SIGINT",
                15 => "terminated by SIGTERM",
                _ => "terminated by signal",
            },
            RotateError::Io(_)
            | RotateError::Collision(_)
            | RotateError::Remote(_)
            | RotateError::Mount(_)
            | RotateError::Mail(_) => "general failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, RotateError>;
