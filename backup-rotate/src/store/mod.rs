//! Generation stores: where the generation directories live.
//!
//! The rotation engine only needs a handful of directory operations, so the
//! local filesystem and a remote host reached over ssh share one trait.

pub mod local;
pub mod ssh;

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::utils::errors::Result;

pub use local::LocalStore;
pub use ssh::SshStore;

/// Directory operations on the destination, addressed by entry name.
pub trait GenerationStore: Send + Sync {
    /// Human readable location, for logs and reports.
    fn describe(&self) -> String;

    /// Create the destination directory if missing.
    fn ensure_root(&self) -> Result<()>;

    /// Names of all entries directly inside the destination.
    fn list(&self) -> Result<Vec<String>>;

    /// Whether a directory called `name` exists in the destination.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Recursively delete `name`.
    fn remove(&self, name: &str) -> Result<()>;

    /// Rename `from` to `to`. Fails with a collision if `to` exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// rsync destination argument for the directory `name`, with trailing slash.
    fn rsync_target(&self, name: &str) -> String;
}

/// Build the store matching the configured destination.
pub fn from_config(config: &Config) -> Arc<dyn GenerationStore> {
    match &config.server {
        Some(server) => Arc::new(
            SshStore::new(
                server.clone(),
                config.ssh_options.clone(),
                config.destination.clone(),
            )
            .with_command(config.ssh_command.clone()),
        ),
        None => Arc::new(LocalStore::new(config.destination.clone())),
    }
}

/// Quote `input` for a POSIX shell.
pub fn shell_escape(input: &str) -> String {
    if input.is_empty() {
        return "''".to_string();
    }
    if input
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b"/._-+=:,@".contains(&b))
    {
        return input.to_string();
    }
    let escaped = input.replace('\'', "'\"'\"'");
    format!("'{escaped}'")
}

/// Quote a path for a POSIX shell.
pub fn shell_escape_path(path: &Path) -> String {
    shell_escape(&path.to_string_lossy())
}
