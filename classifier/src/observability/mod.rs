//! Scan observability: keeps a snapshot of every live scan and logs a status
//! table on lifecycle transitions so operators can see batch scans progress
//! without querying each one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::info;
use uuid::Uuid;

use crate::scan::progress::{ScanProgress, ScanStatus};

/// Format a table with headers and rows.
fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    let header_line: Vec<String> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| format!("{:width$}", h, width = widths[i]))
        .collect();
    output.push_str(&format!("| {} |\n", header_line.join(" | ")));

    let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    output.push_str(&format!("|-{}-|\n", separator.join("-|-")));

    for row in rows {
        let cells: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let width = widths.get(i).copied().unwrap_or(cell.len());
                format!("{:width$}", cell, width = width)
            })
            .collect();
        output.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    output
}

#[derive(Debug, Clone)]
struct TrackedScan {
    account_id: String,
    status: ScanStatus,
    batch_number: u64,
    processed: u64,
    skipped: u64,
    failed: u64,
    started_at: Instant,
}

impl TrackedScan {
    fn format_elapsed(&self) -> String {
        let secs = self.started_at.elapsed().as_secs();
        if secs >= 60 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Thread-safe tracker for active scans. Cheap to clone; all clones share
/// state.
#[derive(Clone, Default)]
pub struct ScanTracker {
    active_scans: Arc<RwLock<HashMap<Uuid, TrackedScan>>>,
}

impl ScanTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest snapshot of a scan and log the status table when
    /// its lifecycle status changed.
    pub fn update(&self, progress: &ScanProgress) {
        let status_changed = {
            let mut scans = self
                .active_scans
                .write()
                .unwrap_or_else(|e| e.into_inner());
            let entry = scans.entry(progress.scan_id).or_insert_with(|| TrackedScan {
                account_id: progress.account_id.clone(),
                status: ScanStatus::NotStarted,
                batch_number: 0,
                processed: 0,
                skipped: 0,
                failed: 0,
                started_at: Instant::now(),
            });
            let changed = entry.status != progress.status;
            entry.status = progress.status;
            entry.batch_number = progress.batch_number;
            entry.processed = progress.counters.processed;
            entry.skipped = progress.counters.skipped;
            entry.failed = progress.counters.failed;
            changed
        };

        if status_changed {
            if let Some(table) = self.get_scans_table() {
                info!("Scan status update:\n{}", table);
            }
        }

        if progress.status.is_terminal() {
            self.active_scans
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&progress.scan_id);
        }
    }

    pub fn scan_count(&self) -> usize {
        self.active_scans
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Formatted table of all tracked scans, or `None` when idle.
    pub fn get_scans_table(&self) -> Option<String> {
        let scans = self
            .active_scans
            .read()
            .unwrap_or_else(|e| e.into_inner());
        if scans.is_empty() {
            return None;
        }

        let headers = [
            "Scan", "Account", "Status", "Batch", "Processed", "Skipped", "Failed", "Elapsed",
        ];
        let mut rows: Vec<Vec<String>> = scans
            .iter()
            .map(|(id, s)| {
                vec![
                    id.to_string()[..8].to_string(),
                    s.account_id.clone(),
                    s.status.to_string(),
                    s.batch_number.to_string(),
                    s.processed.to_string(),
                    s.skipped.to_string(),
                    s.failed.to_string(),
                    s.format_elapsed(),
                ]
            })
            .collect();

        rows.sort_by(|a, b| a[1].cmp(&b[1]).then(a[0].cmp(&b[0])));

        Some(format!(
            "Batch scans ({}):\n{}",
            scans.len(),
            format_table(&headers, &rows)
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use crate::scan::progress::ScanConfig;

    use super::*;

    #[test]
    fn table_aligns_columns() {
        let table = format_table(
            &["A", "Longer"],
            &[
                vec!["x".into(), "y".into()],
                vec!["wider-cell".into(), "z".into()],
            ],
        );
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|l| l.len() == lines[0].len()));
    }

    #[test]
    fn terminal_scans_are_dropped_from_tracking() {
        let tracker = ScanTracker::new();
        let mut progress = ScanProgress::new(Uuid::new_v4(), ScanConfig::new("acct"));

        progress.status = ScanStatus::InProgress;
        tracker.update(&progress);
        assert_eq!(tracker.scan_count(), 1);
        assert!(tracker.get_scans_table().unwrap().contains("acct"));

        progress.status = ScanStatus::Completed;
        tracker.update(&progress);
        assert_eq!(tracker.scan_count(), 0);
        assert!(tracker.get_scans_table().is_none());
    }
}
