//! Per-session transfer counters and the end-of-session summary.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

use super::copy::{CopyResult, SkipReason};

/// Why files were skipped, broken down. The parts always add up to `TransferStats::skipped_files`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipBreakdown {
    /// Extension not on the allow-list
    pub unsupported: u64,
    /// Destination already held a file of the same size
    pub duplicate: u64,
    /// Zero-byte source
    pub empty: u64,
}

/// Running counters for one session. Only ever incremented while the session runs.
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// Files encountered (directories are not counted)
    pub total_files: u64,
    pub copied_files: u64,
    pub skipped_files: u64,
    pub failed_files: u64,
    /// Bytes written by successful copies
    pub total_bytes: u64,
    pub skipped: SkipBreakdown,
    started_at: Instant,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            total_files: 0,
            copied_files: 0,
            skipped_files: 0,
            failed_files: 0,
            total_bytes: 0,
            skipped: SkipBreakdown::default(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }

    pub(crate) fn record_seen(&mut self) {
        self.total_files += 1;
    }

    pub(crate) fn record_unsupported(&mut self) {
        self.skipped_files += 1;
        self.skipped.unsupported += 1;
    }

    pub(crate) fn record_failed(&mut self) {
        self.failed_files += 1;
    }

    /// Folds one copy result into the counters. `Cancelled` leaves everything untouched, the
    /// in-flight file simply doesn't land in any bucket.
    pub(crate) fn record(&mut self, result: &CopyResult) {
        match result {
            CopyResult::Copied { bytes } => {
                self.copied_files += 1;
                self.total_bytes += bytes;
            }
            CopyResult::Skipped(reason) => {
                self.skipped_files += 1;
                match reason {
                    SkipReason::Duplicate => self.skipped.duplicate += 1,
                    SkipReason::Empty => self.skipped.empty += 1,
                }
            }
            CopyResult::Failed(_) => self.failed_files += 1,
            CopyResult::Cancelled => {}
        }
    }

    /// True when every counted file landed in exactly one bucket.
    pub fn is_balanced(&self) -> bool {
        self.total_files == self.copied_files + self.skipped_files + self.failed_files
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary {
            total_files: self.total_files,
            copied_files: self.copied_files,
            skipped_files: self.skipped_files,
            failed_files: self.failed_files,
            total_bytes: self.total_bytes,
            skipped: self.skipped,
            elapsed_seconds: self.elapsed_seconds(),
        }
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot of a finished session, handed to the notification and log sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub total_files: u64,
    pub copied_files: u64,
    pub skipped_files: u64,
    pub failed_files: u64,
    pub total_bytes: u64,
    pub skipped: SkipBreakdown,
    pub elapsed_seconds: u64,
}

impl TransferSummary {
    /// One-line version for notifications.
    pub fn short(&self) -> String {
        format!(
            "{} copied, {} skipped, {} failed ({})",
            self.copied_files,
            self.skipped_files,
            self.failed_files,
            format_bytes(self.total_bytes)
        )
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Backup summary:")?;
        writeln!(f, "- Total files processed: {}", self.total_files)?;
        writeln!(f, "- Successfully copied: {}", self.copied_files)?;
        writeln!(
            f,
            "- Skipped: {} (unsupported: {}, already present: {}, empty: {})",
            self.skipped_files, self.skipped.unsupported, self.skipped.duplicate, self.skipped.empty
        )?;
        writeln!(f, "- Failed to copy: {}", self.failed_files)?;
        writeln!(f, "- Total data copied: {}", format_bytes(self.total_bytes))?;
        write!(f, "- Time taken: {}s", self.elapsed_seconds)
    }
}

/// Formats a byte count with binary units and one decimal (`1.5 KB`). Counts below 1 KiB are
/// printed exactly (`512 B`).
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::copy::FailureReason;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn test_record_folds_each_result_kind() {
        let mut stats = TransferStats::new();
        for result in [
            CopyResult::Copied { bytes: 1000 },
            CopyResult::Copied { bytes: 200 },
            CopyResult::Skipped(SkipReason::Duplicate),
            CopyResult::Skipped(SkipReason::Empty),
            CopyResult::Failed(FailureReason::SizeMismatch { expected: 10, actual: 4 }),
        ] {
            stats.record_seen();
            stats.record(&result);
        }
        stats.record_seen();
        stats.record_unsupported();

        assert_eq!(stats.total_files, 6);
        assert_eq!(stats.copied_files, 2);
        assert_eq!(stats.total_bytes, 1200);
        assert_eq!(stats.skipped_files, 3);
        assert_eq!(
            stats.skipped,
            SkipBreakdown {
                unsupported: 1,
                duplicate: 1,
                empty: 1
            }
        );
        assert_eq!(stats.failed_files, 1);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_cancelled_result_is_not_counted() {
        let mut stats = TransferStats::new();
        stats.record_seen();
        stats.record(&CopyResult::Cancelled);
        assert_eq!(stats.copied_files + stats.skipped_files + stats.failed_files, 0);
        assert!(!stats.is_balanced());
    }

    #[test]
    fn test_summary_display() {
        let mut stats = TransferStats::new();
        stats.record_seen();
        stats.record(&CopyResult::Copied { bytes: 2048 });
        let text = stats.summary().to_string();
        assert!(text.starts_with("Backup summary:"));
        assert!(text.contains("- Successfully copied: 1"));
        assert!(text.contains("- Total data copied: 2.0 KB"));
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = TransferStats::new().summary();
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("copiedFiles"));
        assert!(json.contains("elapsedSeconds"));
    }
}
