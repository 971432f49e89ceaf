//! Generation store on the local filesystem.

use std::io::ErrorKind;
use std::path::PathBuf;

use super::GenerationStore;
use crate::utils::errors::{Result, RotateError};

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl GenerationStore for LocalStore {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            names.push(entry?.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.root.join(name).is_dir())
    }

    fn remove(&self, name: &str) -> Result<()> {
        match std::fs::remove_dir_all(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.root.join(to);
        if target.symlink_metadata().is_ok() {
            return Err(RotateError::Collision(target.display().to_string()));
        }
        std::fs::rename(self.root.join(from), target)?;
        Ok(())
    }

    fn rsync_target(&self, name: &str) -> String {
        format!("{}/", self.root.join(name).display())
    }
}
