//! Bind mounts held for the duration of a run.
//!
//! Mounts are made in configuration order and unmounted in reverse order
//! when the guard is dropped, so an error or a signal never leaves them
//! behind.

use std::path::PathBuf;
use std::process::Command;

use tracing::{info, warn};

use crate::config::MountConfig;
use crate::utils::errors::{Result, RotateError};

#[derive(Debug, Default)]
pub struct MountGuard {
    mounted: Vec<PathBuf>,
}

/// Fail early when `mounts` cannot be made by this process.
pub fn check_privileges(mounts: &[MountConfig]) -> Result<()> {
    if !mounts.is_empty() && !nix::unistd::geteuid().is_root() {
        return Err(RotateError::Mount("bind mounts require root".to_string()));
    }
    Ok(())
}

/// Log the mounts a run would make.
pub fn log_planned(mounts: &[MountConfig]) {
    for mount in mounts {
        info!(
            "Would bind-mount {} on {}{}",
            mount.source.display(),
            mount.target.display(),
            if mount.read_only { " (read-only)" } else { "" }
        );
    }
}

impl MountGuard {
    /// Bind-mount every entry of `mounts`.
    ///
    /// On failure the mounts already made are undone before returning.
    pub fn mount_all(mounts: &[MountConfig]) -> Result<Self> {
        check_privileges(mounts)?;

        let mut guard = MountGuard::default();
        for mount in mounts {
            // Dropping `guard` on error unmounts what is already mounted
            guard.mount_one(mount)?;
        }
        Ok(guard)
    }

    fn mount_one(&mut self, mount: &MountConfig) -> Result<()> {
        std::fs::create_dir_all(&mount.target)?;

        let source = mount.source.to_string_lossy().into_owned();
        let target = mount.target.to_string_lossy().into_owned();

        run("mount", &["--bind", &source, &target])?;
        info!("Bind-mounted {source} on {target}");
        self.mounted.push(mount.target.clone());

        if mount.read_only {
            run("mount", &["-o", "remount,bind,ro", &target])?;
        }
        Ok(())
    }

    /// Unmount everything, newest first, collecting the first failure.
    pub fn unmount_all(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(target) = self.mounted.pop() {
            let target = target.to_string_lossy().into_owned();
            match run("umount", &[&target]) {
                Ok(()) => info!("Unmounted {target}"),
                Err(e) => {
                    warn!("Failed to unmount {target}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        let _ = self.unmount_all();
    }
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| RotateError::Mount(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        return Err(RotateError::Mount(format!(
            "{program} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_mounts_is_noop() {
        let mut guard = MountGuard::mount_all(&[]).unwrap();
        assert!(guard.unmount_all().is_ok());
        assert!(check_privileges(&[]).is_ok());
    }

    #[test]
    fn test_mount_requires_root() {
        if nix::unistd::geteuid().is_root() {
            return;
        }
        let mounts = vec![MountConfig {
            source: PathBuf::from("/var/lib/mysql"),
            target: PathBuf::from("/mnt/mysql"),
            read_only: false,
        }];
        let err = MountGuard::mount_all(&mounts).unwrap_err();
        assert!(matches!(err, RotateError::Mount(_)));
        assert!(matches!(check_privileges(&mounts), Err(RotateError::Mount(_))));
    }
}
