//! Directory lock preventing concurrent runs of one configuration.
//!
//! `mkdir` is the mutex primitive: it either creates the lock directory or
//! fails because it exists. The owner then writes its PID into `pid` inside
//! the directory. A lock whose PID is no longer running is stale and gets
//! cleared. Clearing is itself serialised by a second `mkdir` on
//! `<name>.lock.takeover`, and the lock is re-inspected once that is held,
//! so two processes never both clear and retake the same stale lock.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::utils::errors::{Result, RotateError};

const PID_FILE: &str = "pid";

/// How long a lock directory without a PID file counts as held, covering the
/// window between `mkdir` and writing the PID.
const PID_GRACE: Duration = Duration::from_secs(30);

const ACQUIRE_ATTEMPTS: usize = 3;

const TAKEOVER_SUFFIX: &str = "takeover";

/// Who holds a lock, as far as the filesystem tells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Held { pid: i32 },
    Stale { pid: Option<i32> },
    /// No PID written yet, still inside the grace window
    Starting,
}

#[derive(Debug, Clone)]
pub struct DirLock {
    path: PathBuf,
}

/// Held lock; released on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    pid: i32,
    released: bool,
}

impl DirLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, clearing a stale one left by a dead process.
    pub fn acquire(&self) -> Result<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pid = std::process::id() as i32;

        for _ in 0..ACQUIRE_ATTEMPTS {
            match fs::create_dir(&self.path) {
                Ok(()) => {
                    if let Err(e) = fs::write(self.path.join(PID_FILE), format!("{pid}\n")) {
                        let _ = remove_lock_dir(&self.path);
                        return Err(e.into());
                    }
                    debug!("Acquired lock {}", self.path.display());
                    return Ok(LockGuard {
                        path: self.path.clone(),
                        pid,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.state()? {
                    LockState::Held { pid } => {
                        return Err(RotateError::Locked {
                            pid: Some(pid),
                            path: self.path.clone(),
                        });
                    }
                    LockState::Starting => {
                        return Err(RotateError::Locked {
                            pid: None,
                            path: self.path.clone(),
                        });
                    }
                    LockState::Stale { pid } => {
                        self.clear_stale(pid)?;
                    }
                    // Released between our mkdir and the inspection
                    LockState::Free => {}
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(RotateError::Locked {
            pid: None,
            path: self.path.clone(),
        })
    }

    fn takeover_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".");
        name.push(TAKEOVER_SUFFIX);
        PathBuf::from(name)
    }

    /// Remove the lock if it is still the stale one left by `stale_pid`.
    ///
    /// Returns whether it was removed. Fails with `Locked` while another
    /// process is clearing it.
    fn clear_stale(&self, stale_pid: Option<i32>) -> Result<bool> {
        let takeover = self.takeover_path();
        match fs::create_dir(&takeover) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !is_abandoned(&takeover) {
                    return Err(RotateError::Locked {
                        pid: None,
                        path: self.path.clone(),
                    });
                }
                // Left by a process that died mid-takeover
                warn!("Removing abandoned takeover {}", takeover.display());
                remove_lock_dir(&takeover)?;
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }

        let result = match self.state() {
            Ok(LockState::Stale { pid }) if pid == stale_pid => {
                warn!(
                    "Clearing stale lock {} (pid {})",
                    self.path.display(),
                    pid.map(|p| p.to_string()).unwrap_or_else(|| "unknown".to_string())
                );
                remove_lock_dir(&self.path).map(|()| true)
            }
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        };

        if let Err(e) = fs::remove_dir(&takeover) {
            warn!("Failed to remove {}: {e}", takeover.display());
        }
        result
    }

    /// Inspect the lock without taking it.
    pub fn state(&self) -> Result<LockState> {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LockState::Free),
            Err(e) => return Err(e.into()),
        };

        match read_pid(&self.path)? {
            Some(pid) if process_alive(pid) => Ok(LockState::Held { pid }),
            Some(pid) => Ok(LockState::Stale { pid: Some(pid) }),
            None => {
                let age = metadata
                    .modified()
                    .ok()
                    .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                    .unwrap_or_default();
                if age < PID_GRACE {
                    Ok(LockState::Starting)
                } else {
                    Ok(LockState::Stale { pid: None })
                }
            }
        }
    }

    /// Remove the lock. A live holder is only evicted with `force`.
    ///
    /// Returns whether a lock was removed.
    pub fn clear(&self, force: bool) -> Result<bool> {
        match self.state()? {
            LockState::Free => Ok(false),
            LockState::Held { pid } if !force => Err(RotateError::Locked {
                pid: Some(pid),
                path: self.path.clone(),
            }),
            LockState::Starting if !force => Err(RotateError::Locked {
                pid: None,
                path: self.path.clone(),
            }),
            _ => {
                remove_lock_dir(&self.path)?;
                Ok(true)
            }
        }
    }
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting failures.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove_if_owned()
    }

    fn remove_if_owned(&self) -> Result<()> {
        // Someone may have force-cleared and retaken the lock meanwhile
        if read_pid(&self.path)? != Some(self.pid) {
            warn!("Lock {} no longer owned by this process", self.path.display());
            return Ok(());
        }
        remove_lock_dir(&self.path)?;
        debug!("Released lock {}", self.path.display());
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove_if_owned() {
            warn!("Failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

/// Whether a directory was last modified longer ago than the PID grace window.
fn is_abandoned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age >= PID_GRACE)
}

fn read_pid(lock_dir: &Path) -> Result<Option<i32>> {
    match fs::read_to_string(lock_dir.join(PID_FILE)) {
        Ok(content) => Ok(content.trim().parse().ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn remove_lock_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Signal 0 checks for existence; EPERM still means the process exists.
fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// A PID above any kernel's pid_max.
    const DEAD_PID: i32 = 999_999_999;

    #[test]
    fn test_acquire_and_release() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let lock = DirLock::new(temp_dir.path().join("locks/home.lock"));

        let guard = lock.acquire()?;
        assert_eq!(
            lock.state()?,
            LockState::Held {
                pid: std::process::id() as i32
            }
        );
        assert_eq!(
            fs::read_to_string(guard.path().join("pid"))?.trim(),
            std::process::id().to_string()
        );

        guard.release()?;
        assert_eq!(lock.state()?, LockState::Free);
        Ok(())
    }

    #[test]
    fn test_live_lock_is_never_double_acquired() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let lock = DirLock::new(temp_dir.path().join("home.lock"));

        let _guard = lock.acquire()?;
        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, RotateError::Locked { pid: Some(_), .. }));
        assert_eq!(err.exit_code(), 3);

        // The failed attempt must not have disturbed the holder
        assert!(matches!(lock.state()?, LockState::Held { .. }));
        Ok(())
    }

    #[test]
    fn test_drop_releases() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let lock = DirLock::new(temp_dir.path().join("home.lock"));
        {
            let _guard = lock.acquire()?;
            assert!(lock.path().exists());
        }
        assert!(!lock.path().exists());
        Ok(())
    }

    #[test]
    fn test_stale_lock_is_cleared() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("home.lock");
        fs::create_dir(&path)?;
        fs::write(path.join("pid"), format!("{DEAD_PID}\n"))?;

        let lock = DirLock::new(&path);
        assert_eq!(lock.state()?, LockState::Stale { pid: Some(DEAD_PID) });

        let guard = lock.acquire()?;
        assert_eq!(
            fs::read_to_string(path.join("pid"))?.trim(),
            std::process::id().to_string()
        );
        drop(guard);
        Ok(())
    }

    #[test]
    fn test_fresh_lock_without_pid_is_respected() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("home.lock");
        fs::create_dir(&path)?;

        let lock = DirLock::new(&path);
        assert_eq!(lock.state()?, LockState::Starting);
        assert!(matches!(
            lock.acquire().unwrap_err(),
            RotateError::Locked { pid: None, .. }
        ));
        Ok(())
    }

    #[test]
    fn test_clear() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let lock = DirLock::new(temp_dir.path().join("home.lock"));
        assert!(!lock.clear(false)?);

        let guard = lock.acquire()?;
        assert!(lock.clear(false).is_err());
        assert!(lock.clear(true)?);
        assert_eq!(lock.state()?, LockState::Free);

        // The evicted guard must not complain or remove a successor's lock
        let successor = lock.acquire()?;
        fs::write(successor.path().join("pid"), format!("{DEAD_PID}\n"))?;
        drop(guard);
        assert!(lock.path().exists());
        Ok(())
    }

    #[test]
    fn test_stale_clear_spares_a_retaken_lock() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let lock = DirLock::new(temp_dir.path().join("home.lock"));

        // Another process already cleared the stale lock and took it
        let _winner = lock.acquire()?;
        assert!(!lock.clear_stale(Some(DEAD_PID))?);
        assert!(matches!(lock.state()?, LockState::Held { .. }));
        assert!(!lock.takeover_path().exists());
        Ok(())
    }

    #[test]
    fn test_concurrent_takeover_backs_off() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("home.lock");
        fs::create_dir(&path)?;
        fs::write(path.join("pid"), format!("{DEAD_PID}\n"))?;

        let lock = DirLock::new(&path);
        fs::create_dir(lock.takeover_path())?;

        let err = lock.acquire().unwrap_err();
        assert!(matches!(err, RotateError::Locked { pid: None, .. }));
        assert_eq!(lock.state()?, LockState::Stale { pid: Some(DEAD_PID) });
        Ok(())
    }

    #[test]
    fn test_abandoned_takeover_is_cleared() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("home.lock");
        fs::create_dir(&path)?;
        fs::write(path.join("pid"), format!("{DEAD_PID}\n"))?;

        let lock = DirLock::new(&path);
        let takeover = lock.takeover_path();
        fs::create_dir(&takeover)?;
        fs::File::open(&takeover)?.set_modified(SystemTime::now() - Duration::from_secs(3600))?;

        let guard = lock.acquire()?;
        assert_eq!(
            fs::read_to_string(guard.path().join("pid"))?.trim(),
            std::process::id().to_string()
        );
        assert!(!takeover.exists());
        Ok(())
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id() as i32));
        assert!(!process_alive(DEAD_PID));
        assert!(!process_alive(0));
    }
}
