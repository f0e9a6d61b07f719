//! `fh archives` subcommands: list, search and remove recorded archives.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

use crate::catalog::ArchiveCatalog;
use crate::config::Config;

/// Parse a date given on the command line: RFC 3339 or `YYYY-MM-DD`
/// (midnight UTC).
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}': expected YYYY-MM-DD or RFC 3339", value))?;
    Ok(date.and_time(NaiveTime::MIN).and_utc())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let catalog = ArchiveCatalog::new(config.archive_path())?;
    let entries = catalog.list().await;

    if entries.is_empty() {
        println!("No archives in {}", catalog.base_path().display());
        return Ok(());
    }

    println!(
        "{:<20} {:<10} {:<10} {:>7}  {:<32} PATH",
        "CREATED", "CONNECTOR", "CATEGORY", "ENTRIES", "ORIGIN"
    );
    for entry in &entries {
        match &entry.metadata {
            Some(m) => println!(
                "{:<20} {:<10} {:<10} {:>7}  {:<32} {}",
                m.created_on.format("%Y-%m-%d %H:%M:%S"),
                m.connector_name,
                m.category,
                entry.entries,
                m.origin,
                entry.path.display()
            ),
            None => println!(
                "{:<20} {:<10} {:<10} {:>7}  {:<32} {}",
                "-",
                "-",
                "-",
                entry.entries,
                "-",
                entry.path.display()
            ),
        }
    }
    Ok(())
}

/// Print the paths of matching archives, oldest first, one per line.
pub async fn run_search(
    config: &Config,
    origin: &str,
    connector_name: &str,
    category: &str,
    since: Option<&str>,
) -> Result<()> {
    let created_after = match since {
        Some(s) => parse_date(s)?,
        None => DateTime::<Utc>::MIN_UTC,
    };

    let catalog = ArchiveCatalog::new(config.archive_path())?;
    for path in catalog
        .search(origin, connector_name, category, created_after)
        .await
    {
        println!("{}", path.display());
    }
    Ok(())
}

pub async fn run_remove(config: &Config, path: &Path) -> Result<()> {
    let catalog = ArchiveCatalog::new(config.archive_path())?;
    catalog.remove_archive(path).await?;
    println!("Removed {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2016-01-01").unwrap().to_rfc3339(),
            "2016-01-01T00:00:00+00:00"
        );
        assert_eq!(
            parse_date("2016-01-01T02:00:00+02:00").unwrap().to_rfc3339(),
            "2016-01-01T00:00:00+00:00"
        );
        assert!(parse_date("01/01/2016").is_err());
    }
}
