//! `--status` and `--list`

use anyhow::Result;
use execution_tracker::{ExecutionRecord, OutputFormat};
use tracing::warn;

use super::query_store;
use crate::config::Config;

/// Print one record in `format`
pub fn status(config: &Config, uuid: &str, format: &str) -> i32 {
    let format: OutputFormat = match format.parse() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("Error: {}. Use links-notation, json or text.", e);
            return 2;
        }
    };
    match lookup(config, uuid) {
        Ok(Some(record)) => match format.render(&record) {
            Ok(text) => {
                println!("{}", text);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Ok(None) => {
            eprintln!("Error: No execution found with UUID: {}", uuid);
            1
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn lookup(config: &Config, uuid: &str) -> Result<Option<ExecutionRecord>> {
    Ok(query_store(config)?.get(uuid)?)
}

/// Print the `limit` most recent executions, newest first
pub fn list(config: &Config, limit: usize) -> i32 {
    match print_recent(config, limit) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn print_recent(config: &Config, limit: usize) -> Result<()> {
    let store = query_store(config)?;
    let records = store.get_recent(limit)?;
    if records.is_empty() {
        println!("No executions recorded");
        return Ok(());
    }
    for record in &records {
        println!("{}", summary_line(record));
    }

    let stats = store.stats()?;
    println!();
    println!(
        "{} executions: {} executing, {} succeeded, {} failed",
        stats.total, stats.executing, stats.successful, stats.failed
    );

    let consistency = store.verify_consistency()?;
    if !consistency.consistent {
        for error in &consistency.errors {
            warn!("Store index out of date: {}", error);
        }
    }
    Ok(())
}

fn summary_line(record: &ExecutionRecord) -> String {
    let exit = record
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {:<9}  {:>4}  {}  {}",
        record.uuid,
        record.status.as_str(),
        exit,
        record.start_time.format("%Y-%m-%d %H:%M:%S"),
        record.command
    )
}
