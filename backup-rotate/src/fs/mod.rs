//! Filesystem inspection of generation directories.

pub mod walker;
