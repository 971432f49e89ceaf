//! backup-rotate library
//!
//! Generational backups: rotate numbered `<period>-NN` directories, then let
//! rsync write the newest one, hard-linking unchanged files against the
//! previous generation.

pub mod config;
pub mod executor;
pub mod fs;
pub mod hooks;
pub mod lock;
pub mod mounts;
pub mod report;
pub mod retention;
pub mod rotation;
pub mod signals;
pub mod status;
pub mod store;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{Result, RotateError};
