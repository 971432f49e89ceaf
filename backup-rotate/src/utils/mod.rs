//! Utility modules for backup-rotate.

pub mod errors;
pub mod logger;

pub use errors::{RotateError, Result};
