//! Run report: captured log output plus a summary of what happened.

pub mod mail;

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::retention::{Generation, Period};
use crate::transfer::rsync::TransferStats;
use crate::transfer::TransferOutcome;

/// Shared in-memory sink for the log layer feeding the report.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything captured so far.
    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buffer) => String::from_utf8_lossy(&buffer).into_owned(),
            Err(poisoned) => String::from_utf8_lossy(&poisoned.into_inner()).into_owned(),
        }
    }
}

impl io::Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("capture buffer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Result of one period's rotation and transfer.
#[derive(Debug, Clone)]
pub struct PeriodResult {
    pub period: Period,
    pub generation: Generation,
    pub removed: usize,
    pub rotated: usize,
    pub outcome: TransferOutcome,
    pub stats: TransferStats,
    pub duration: Duration,
}

/// Everything the report mail describes.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub name: String,
    pub host: String,
    pub destination: String,
    pub started: DateTime<Local>,
    pub finished: DateTime<Local>,
    pub periods: Vec<PeriodResult>,
    /// Error message when the run failed
    pub error: Option<String>,
    pub exit_code: i32,
    /// What `exit_code` means for this run
    pub exit_reason: &'static str,
    pub log: String,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn status_word(&self) -> &'static str {
        if self.succeeded() {
            "OK"
        } else {
            "FAILED"
        }
    }

    /// Plain-text summary placed in the mail body.
    pub fn summary(&self) -> String {
        let elapsed = (self.finished - self.started).num_seconds().max(0) as u64;
        let mut text = String::new();

        text.push_str(&format!("Backup:      {}\n", self.name));
        text.push_str(&format!("Host:        {}\n", self.host));
        text.push_str(&format!("Destination: {}\n", self.destination));
        text.push_str(&format!("Started:     {}\n", self.started.format("%Y-%m-%d %H:%M:%S")));
        text.push_str(&format!("Finished:    {}\n", self.finished.format("%Y-%m-%d %H:%M:%S")));
        text.push_str(&format!("Duration:    {}\n", format_duration(elapsed)));
        text.push_str(&format!(
            "Status:      {} (exit {}: {})\n",
            self.status_word(),
            self.exit_code,
            self.exit_reason
        ));

        if let Some(error) = &self.error {
            text.push_str(&format!("Error:       {error}\n"));
        }

        if self.periods.is_empty() {
            text.push_str("\nNo generations were written.\n");
        } else {
            text.push_str("\nGenerations written:\n");
            for result in &self.periods {
                let files = result
                    .stats
                    .files_transferred
                    .map(|n| format!("{n} files"))
                    .unwrap_or_else(|| "? files".to_string());
                let bytes = result
                    .stats
                    .bytes_transferred
                    .map(format_bytes)
                    .unwrap_or_else(|| "? bytes".to_string());
                let note = match result.outcome {
                    TransferOutcome::Complete => "",
                    TransferOutcome::Vanished => ", some files vanished",
                };
                text.push_str(&format!(
                    "  {:<12} {files}, {bytes} transferred in {}; {} rotated, {} removed{note}\n",
                    result.generation.dir_name(),
                    format_duration(result.duration.as_secs()),
                    result.rotated,
                    result.removed,
                ));
            }
        }

        text
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use crate::utils::errors::RotateError;

    pub(crate) fn sample_report(error: Option<&str>) -> RunReport {
        let started = Local.with_ymd_and_hms(2026, 10, 18, 3, 0, 0).unwrap();
        RunReport {
            name: "home".to_string(),
            host: "fileserver".to_string(),
            destination: "/backup/home".to_string(),
            started,
            finished: started + chrono::Duration::seconds(95),
            periods: vec![PeriodResult {
                period: Period::Daily,
                generation: Generation::new(Period::Daily, 0),
                removed: 1,
                rotated: 6,
                outcome: TransferOutcome::Vanished,
                stats: TransferStats {
                    files_transferred: Some(12),
                    bytes_transferred: Some(2048),
                },
                duration: Duration::from_secs(90),
            }],
            error: error.map(str::to_string),
            exit_code: if error.is_some() { 23 } else { 0 },
            exit_reason: if error.is_some() {
                "partial transfer due to error"
            } else {
                "success"
            },
            log: "INFO Rotating daily-00 -> daily-01\n".to_string(),
        }
    }

    #[test]
    fn test_capture_buffer_shares_contents() {
        let buffer = CaptureBuffer::new();
        let mut writer = buffer.clone();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();
        assert_eq!(buffer.contents(), "first line\nsecond line\n");
    }

    #[test]
    fn test_summary_success() {
        let summary = sample_report(None).summary();
        assert!(summary.contains("Backup:      home"));
        assert!(summary.contains("Duration:    1m 35s"));
        assert!(summary.contains("Status:      OK (exit 0: success)"));
        assert!(summary.contains("daily-00     12 files, 2.00 KB transferred in 1m 30s; 6 rotated, 1 removed, some files vanished"));
        assert!(!summary.contains("Error:"));
    }

    #[test]
    fn test_summary_failure() {
        let report = sample_report(Some("rsync exited with code 23"));
        assert!(!report.succeeded());
        let summary = report.summary();
        assert!(summary.contains("Status:      FAILED (exit 23: partial transfer due to error)"));
        assert!(summary.contains("Error:       rsync exited with code 23"));
    }

    #[test]
    fn test_summary_keeps_rsync_meaning_of_low_codes() {
        let err = RotateError::transfer(3);
        let mut report = sample_report(Some("rsync exited with code 3"));
        report.exit_code = err.exit_code();
        report.exit_reason = err.describe();

        let summary = report.summary();
        assert!(summary.contains("Status:      FAILED (exit 3: errors selecting input/output files, dirs)"));
        assert!(!summary.contains("another run holds the lock"));
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }
}
