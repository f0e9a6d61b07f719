//! TOML configuration for the `fh` binary.
//!
//! Every section is optional; a missing config file yields the defaults.
//!
//! ```toml
//! [archive]
//! path = "~/.fetch-harness/archives"
//!
//! [http]
//! max_retries = 5
//! backoff_secs = 1
//! timeout_secs = 30
//! user_agent = "fetch-harness/0.3.0"
//! status_forcelist = []      # added to 408, 423, 504
//! retry_after_status = []    # added to 413, 429, 503
//!
//! [rate_limit]
//! sleep_for_rate = false
//! min_rate_to_sleep = 10
//! remaining_header = "X-RateLimit-Remaining"
//! reset_header = "X-RateLimit-Reset"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MAX_RETRIES_LIMIT: u32 = 20;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Catalog base directory.
    #[serde(default = "default_archive_path")]
    pub path: PathBuf,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            path: default_archive_path(),
        }
    }
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("~/.fetch-harness/archives")
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extra statuses retried with backoff.
    #[serde(default)]
    pub status_forcelist: Vec<u16>,
    /// Extra statuses retried after `Retry-After`.
    #[serde(default)]
    pub retry_after_status: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_secs: default_backoff_secs(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            status_forcelist: Vec::new(),
            retry_after_status: Vec::new(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_backoff_secs() -> u64 {
    1
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("fetch-harness/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub sleep_for_rate: bool,
    #[serde(default = "default_min_rate_to_sleep")]
    pub min_rate_to_sleep: u64,
    /// Response header holding the remaining request budget.
    #[serde(default = "default_remaining_header")]
    pub remaining_header: String,
    /// Response header holding the UNIX time of the next reset.
    #[serde(default = "default_reset_header")]
    pub reset_header: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sleep_for_rate: false,
            min_rate_to_sleep: default_min_rate_to_sleep(),
            remaining_header: default_remaining_header(),
            reset_header: default_reset_header(),
        }
    }
}

fn default_min_rate_to_sleep() -> u64 {
    crate::retry::MIN_RATE_LIMIT
}
fn default_remaining_header() -> String {
    crate::retry::RATE_LIMIT_HEADER.to_string()
}
fn default_reset_header() -> String {
    crate::retry::RATE_LIMIT_RESET_HEADER.to_string()
}

impl Config {
    /// Catalog base directory with `~` expanded.
    pub fn archive_path(&self) -> PathBuf {
        expand_tilde(&self.archive.path)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.http.max_retries > MAX_RETRIES_LIMIT {
        anyhow::bail!("http.max_retries must be <= {}", MAX_RETRIES_LIMIT);
    }

    if config.http.timeout_secs == 0 {
        anyhow::bail!("http.timeout_secs must be > 0");
    }

    Ok(config)
}

/// Expand `~` at the start of a path to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") || s == "~" {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            return home.join(s.strip_prefix("~/").unwrap_or(""));
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join("nope.toml")).unwrap();
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.http.timeout_secs, 30);
        assert!(!config.rate_limit.sleep_for_rate);
        assert_eq!(config.rate_limit.min_rate_to_sleep, 10);
        assert_eq!(config.rate_limit.remaining_header, "X-RateLimit-Remaining");
        assert_eq!(config.rate_limit.reset_header, "X-RateLimit-Reset");
    }

    #[test]
    fn test_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fh.toml");
        std::fs::write(
            &path,
            "[archive]\npath = \"/data/archives\"\n\n[http]\nmax_retries = 2\nstatus_forcelist = [500]\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.archive_path(), PathBuf::from("/data/archives"));
        assert_eq!(config.http.max_retries, 2);
        assert_eq!(config.http.status_forcelist, vec![500]);
        assert_eq!(config.http.backoff_secs, 1);
    }

    #[test]
    fn test_rejects_too_many_retries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fh.toml");
        std::fs::write(&path, "[http]\nmax_retries = 50\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fh.toml");
        std::fs::write(&path, "[http]\ntimeout_secs = 0\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_tilde(Path::new("~/archives")),
                PathBuf::from(home).join("archives")
            );
        }
        assert_eq!(expand_tilde(Path::new("/abs")), PathBuf::from("/abs"));
    }
}
