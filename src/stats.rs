//! Catalog statistics and health overview.
//!
//! Summarizes what has been recorded: archive and entry counts per
//! origin, connector and category, total size on disk, and when each
//! group was last fetched. Used by `fh archives stats`.

use anyhow::Result;

use crate::catalog::{group_stats, ArchiveCatalog};
use crate::config::Config;

/// Run the stats command: walk the catalog and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let catalog = ArchiveCatalog::new(config.archive_path())?;

    let entries = catalog.list().await;
    let total_size: u64 = entries
        .iter()
        .filter_map(|e| std::fs::metadata(&e.path).ok())
        .map(|m| m.len())
        .sum();
    let total_entries: i64 = entries.iter().map(|e| e.entries).sum();
    let empty = entries.iter().filter(|e| e.metadata.is_none()).count();

    println!("fetch-harness — Archive Stats");
    println!("=============================");
    println!();
    println!("  Catalog:     {}", catalog.base_path().display());
    println!("  Size:        {}", format_bytes(total_size));
    println!();
    println!("  Archives:    {} ({} never used)", entries.len(), empty);
    println!("  Entries:     {}", total_entries);

    let groups = group_stats(&entries);
    if !groups.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<32} {:<10} {:<10} {:>8} {:>8}   {}",
            "ORIGIN", "CONNECTOR", "CATEGORY", "ARCHIVES", "ENTRIES", "LAST FETCH"
        );
        println!("  {}", "-".repeat(96));

        for g in &groups {
            println!(
                "  {:<32} {:<10} {:<10} {:>8} {:>8}   {}",
                g.origin,
                g.connector_name,
                g.category,
                g.archives,
                g.entries,
                format_ts_relative(g.last_created_on.timestamp())
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now ("3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub(crate) fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
