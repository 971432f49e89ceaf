//! Directory traversal summarising one generation.
//!
//! Generations share unchanged files through hard links, so the apparent
//! size of a generation says little about the space it costs. The walker
//! reports both: every file's size, and the size of files whose data is not
//! linked from anywhere else.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use walkdir::WalkDir;

/// Totals for one generation directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GenerationStats {
    /// Regular files
    pub files: u64,

    /// Sum of all regular file sizes
    pub bytes: u64,

    /// Files with more than one hard link (shared with other generations)
    pub linked_files: u64,

    /// Bytes held only by this generation
    pub unique_bytes: u64,
}

/// Walk `root` and total its regular files.
///
/// Symbolic links are not followed.
///
/// # Example
/// ```no_run
/// use backup_rotate::fs::walker::generation_stats;
/// use std::path::Path;
///
/// let stats = generation_stats(Path::new("/backup/home/daily-00")).unwrap();
/// println!("{} files, {} bytes not shared", stats.files, stats.unique_bytes);
/// ```
pub fn generation_stats(root: &Path) -> std::io::Result<GenerationStats> {
    let mut stats = GenerationStats::default();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata()?;
        let size = metadata.len();
        stats.files += 1;
        stats.bytes += size;

        if metadata.nlink() > 1 {
            stats.linked_files += 1;
        } else {
            stats.unique_bytes += size;
        }
    }

    Ok(stats)
}
