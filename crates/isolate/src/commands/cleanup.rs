//! `--cleanup` and `--cleanup-dry-run`

use anyhow::Result;
use execution_tracker::{CleanupOptions, CleanupReport};

use super::query_store;
use crate::config::Config;

/// Finalize stale records, or only list them when `dry_run`
pub fn cleanup(config: &Config, dry_run: bool) -> i32 {
    match sweep(config, dry_run) {
        Ok(report) => {
            print!("{}", render(&report, dry_run));
            0
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn sweep(config: &Config, dry_run: bool) -> Result<CleanupReport> {
    let store = query_store(config)?;
    Ok(store.cleanup_stale(CleanupOptions {
        dry_run,
        ..Default::default()
    })?)
}

fn render(report: &CleanupReport, dry_run: bool) -> String {
    if report.records.is_empty() {
        return "No stale executions found\n".to_string();
    }
    let mut out = if dry_run {
        format!("Would clean {} stale executions:\n", report.records.len())
    } else {
        format!("Cleaned {} stale executions:\n", report.cleaned)
    };
    for (record, reason) in &report.records {
        out.push_str(&format!("  {}  {}  ({})\n", record.uuid, record.command, reason));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use execution_tracker::{ExecutionRecord, StaleReason};

    #[test]
    fn test_render() {
        let empty = CleanupReport::default();
        assert_eq!(render(&empty, true), "No stale executions found\n");

        let report = CleanupReport {
            records: vec![(
                ExecutionRecord::new("sleep 9").with_uuid("u-1"),
                StaleReason::ProcessGone(42),
            )],
            cleaned: 1,
        };
        assert_eq!(
            render(&report, true),
            "Would clean 1 stale executions:\n  u-1  sleep 9  (process 42 is gone)\n"
        );
        assert!(render(&report, false).starts_with("Cleaned 1 stale executions:\n"));
    }
}
