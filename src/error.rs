//! Error types for archives, the catalog, the HTTP layer, and fetch runs.
//!
//! ## Error Categories
//!
//! - [`ArchiveError`]: a single archive file is missing, already exists, is
//!   not a valid archive, is corrupted, or the storage engine failed.
//! - [`CatalogError`]: an [`ArchiveError`] raised while the catalog was
//!   creating, removing, or opening an archive, tagged with the operation.
//! - [`HttpError`]: a network call failed. These are the errors an archive
//!   can record and replay.
//! - [`IdentityError`]: an item identity field was empty.
//! - [`FetchError`]: everything a fetch run can fail with.
//!
//! Connectors return `anyhow::Result`; [`FetchError::from_connector`]
//! recovers the typed error when one is buried inside.

use std::path::PathBuf;

use thiserror::Error;

use crate::outcome::ErrorRecord;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("archive {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("invalid archive file {}: {cause}", .path.display())]
    Invalid { path: PathBuf, cause: String },

    #[error("corrupted archive {}: {cause}", .path.display())]
    Corrupted { path: PathBuf, cause: String },

    #[error("metadata already initialized in archive {}", .0.display())]
    MetadataExists(PathBuf),

    #[error("archive {} has no metadata", .0.display())]
    MissingMetadata(PathBuf),

    #[error("duplicate entry {fingerprint} in archive {}", .path.display())]
    DuplicateEntry { path: PathBuf, fingerprint: String },

    #[error("entry {fingerprint} not found in archive {}", .path.display())]
    EntryNotFound { path: PathBuf, fingerprint: String },

    #[error("undecodable outcome: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Catalog-level operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogOp {
    Create,
    Remove,
    Open,
}

impl std::fmt::Display for CatalogOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogOp::Create => f.write_str("create"),
            CatalogOp::Remove => f.write_str("remove"),
            CatalogOp::Open => f.write_str("open"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("cannot {op} archive {}: {source}", .path.display())]
    Archive {
        op: CatalogOp,
        path: PathBuf,
        #[source]
        source: ArchiveError,
    },

    #[error("catalog io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure of a single network call.
///
/// Status failures are recorded in archives and re-raised on replay;
/// the other variants are never recorded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("{status} error for url {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("network error for url {url}: {message}")]
    Network { url: String, message: String },

    #[error("rate limit exhausted; {seconds_to_reset} seconds to reset")]
    RateLimit { seconds_to_reset: u64 },
}

impl HttpError {
    pub const STATUS_KIND: &'static str = "http_status";

    /// Record of this error suitable for an archive entry.
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            HttpError::Status { url, status, body } => ErrorRecord {
                kind: Self::STATUS_KIND.to_string(),
                message: body.clone(),
                status: Some(*status),
                target: Some(url.clone()),
            },
            other => ErrorRecord {
                kind: "http_other".to_string(),
                message: other.to_string(),
                status: None,
                target: None,
            },
        }
    }

    /// Rebuild the error a recording was taken from.
    pub fn from_record(record: &ErrorRecord) -> Self {
        match (record.kind.as_str(), record.status) {
            (Self::STATUS_KIND, Some(status)) => HttpError::Status {
                url: record.target.clone().unwrap_or_default(),
                status,
                body: record.message.clone(),
            },
            _ => HttpError::Network {
                url: record.target.clone().unwrap_or_default(),
                message: record.message.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity value cannot be empty")]
    Empty,

    #[error("item has no identity field '{0}'")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Capability(String),

    #[error("{0}")]
    Usage(String),

    #[error("{category} category not valid for {connector}")]
    InvalidCategory { category: String, connector: String },

    #[error("connector error: {0:#}")]
    Connector(anyhow::Error),
}

impl FetchError {
    /// Classify an error returned by a connector.
    ///
    /// HTTP and archive failures keep their typed variant so callers can
    /// match on them regardless of how many `context` layers were added.
    pub fn from_connector(err: anyhow::Error) -> Self {
        let err = match err.downcast::<HttpError>() {
            Ok(e) => return FetchError::Http(e),
            Err(err) => err,
        };
        let err = match err.downcast::<ArchiveError>() {
            Ok(e) => return FetchError::Archive(e),
            Err(err) => err,
        };
        if let Some(e) = err.chain().find_map(|c| c.downcast_ref::<HttpError>()) {
            return FetchError::Http(e.clone());
        }
        FetchError::Connector(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_record_round_trip() {
        let err = HttpError::Status {
            url: "http://x/api".to_string(),
            status: 503,
            body: "unavailable".to_string(),
        };
        let rebuilt = HttpError::from_record(&err.to_record());
        assert_eq!(rebuilt, err);
        assert_eq!(rebuilt.to_string(), err.to_string());
    }

    #[test]
    fn test_from_connector_keeps_http_variant() {
        let err = HttpError::Status {
            url: "http://x".to_string(),
            status: 500,
            body: String::new(),
        };
        let wrapped = anyhow::Error::new(err.clone()).context("fetching page 2");
        match FetchError::from_connector(wrapped) {
            FetchError::Http(e) => assert_eq!(e, err),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_from_connector_other() {
        let err = FetchError::from_connector(anyhow::anyhow!("bad json"));
        assert!(matches!(err, FetchError::Connector(_)));
        assert!(err.to_string().contains("bad json"));
    }
}
