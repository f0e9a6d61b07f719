//! Single-file, fingerprint-indexed store of one fetch run.
//!
//! An archive is an SQLite file with two tables:
//!
//! ```text
//! metadata  origin | connector_name | connector_version | category | connector_params | created_on
//! entries   id | fingerprint (unique) | target | payload | headers | outcome
//! ```
//!
//! `metadata` holds at most one row, written once when the fetch run makes
//! its first request. `entries` is append-only: one row per distinct
//! request, keyed by its [`fingerprint`](crate::fingerprint::fingerprint).
//! Storing the same request twice is an error, never an overwrite.
//!
//! # Integrity
//!
//! [`Archive::open`] checks the row counts: more than one metadata row, or
//! entries without a metadata row, mark the file as corrupted. An archive
//! with metadata and no entries is valid (a fetch that found nothing).

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::db::{self, OpenMode};
use crate::error::ArchiveError;
use crate::fingerprint::{canonical_json, fingerprint};
use crate::migrate::{self, ENTRIES_TABLE, METADATA_TABLE};
use crate::models::{ArchiveMetadata, FetchParams};
use crate::outcome::Outcome;

pub const STORAGE_EXT: &str = "sqlite3";

/// An open archive file.
pub struct Archive {
    path: PathBuf,
    pool: SqlitePool,
    metadata: Mutex<Option<ArchiveMetadata>>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive").field("path", &self.path).finish()
    }
}

impl Archive {
    /// Create a new, empty archive at `path`.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::AlreadyExists`] if anything exists at `path`.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(ArchiveError::AlreadyExists(path));
        }

        let pool = db::connect(&path, OpenMode::Create).await?;
        migrate::run_migrations(&pool).await?;
        debug!(path = %path.display(), "archive created");

        Ok(Self {
            path,
            pool,
            metadata: Mutex::new(None),
        })
    }

    /// Open an existing archive for reading and writing.
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::NotFound`] if the file does not exist.
    /// - [`ArchiveError::Invalid`] if it is not an archive.
    /// - [`ArchiveError::Corrupted`] if it fails the integrity check.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::load(path.as_ref(), OpenMode::ReadWrite).await
    }

    /// Open an existing archive without write access.
    ///
    /// Used when scanning a catalog, so foreign files are never modified.
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::load(path.as_ref(), OpenMode::ReadOnly).await
    }

    async fn load(path: &Path, mode: OpenMode) -> Result<Self, ArchiveError> {
        if !path.is_file() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }

        let pool = db::connect(path, mode)
            .await
            .map_err(|e| invalid(path, e))?;

        let archive = Self {
            path: path.to_path_buf(),
            pool,
            metadata: Mutex::new(None),
        };

        if let Err(e) = archive.verify().await {
            archive.close().await;
            return Err(e);
        }
        match archive.load_metadata().await {
            Ok(metadata) => archive.set_metadata(metadata),
            Err(e) => {
                archive.close().await;
                return Err(e);
            }
        }

        Ok(archive)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The metadata record, if it has been written.
    pub fn metadata(&self) -> Option<ArchiveMetadata> {
        self.metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_metadata(&self, metadata: Option<ArchiveMetadata>) {
        *self
            .metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = metadata;
    }

    /// Check the row-count invariants.
    pub async fn verify(&self) -> Result<(), ArchiveError> {
        let nmetadata = self.count_rows(METADATA_TABLE).await?;
        let nentries = self.count_rows(ENTRIES_TABLE).await?;

        if nmetadata > 1 {
            return Err(ArchiveError::Corrupted {
                path: self.path.clone(),
                cause: format!("metadata table must have one or zero rows; found {nmetadata}"),
            });
        }
        if nmetadata == 0 && nentries > 0 {
            return Err(ArchiveError::Corrupted {
                path: self.path.clone(),
                cause: format!("{nentries} entries stored without metadata"),
            });
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<i64, ArchiveError> {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| invalid(&self.path, e))
    }

    /// Number of stored entries.
    pub async fn entry_count(&self) -> Result<i64, ArchiveError> {
        self.count_rows(ENTRIES_TABLE).await
    }

    async fn load_metadata(&self) -> Result<Option<ArchiveMetadata>, ArchiveError> {
        let row = sqlx::query(
            "SELECT origin, connector_name, connector_version, category, connector_params, created_on FROM metadata",
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let corrupted = |cause: String| ArchiveError::Corrupted {
            path: self.path.clone(),
            cause,
        };

        let params: Vec<u8> = row.try_get("connector_params")?;
        let connector_params: FetchParams = serde_json::from_slice(&params)
            .map_err(|e| corrupted(format!("unreadable connector params: {e}")))?;
        let created_on: String = row.try_get("created_on")?;
        let created_on = DateTime::parse_from_rfc3339(&created_on)
            .map_err(|e| corrupted(format!("unreadable creation date '{created_on}': {e}")))?
            .with_timezone(&Utc);

        Ok(Some(ArchiveMetadata {
            origin: row.try_get("origin")?,
            connector_name: row.try_get("connector_name")?,
            connector_version: row.try_get("connector_version")?,
            category: row.try_get("category")?,
            connector_params,
            created_on,
        }))
    }

    /// Write the metadata record. Allowed once per archive.
    pub async fn init_metadata(
        &self,
        origin: &str,
        connector_name: &str,
        connector_version: &str,
        category: &str,
        params: &FetchParams,
    ) -> Result<(), ArchiveError> {
        if self.metadata().is_some() || self.count_rows(METADATA_TABLE).await? > 0 {
            return Err(ArchiveError::MetadataExists(self.path.clone()));
        }

        let created_on = Utc::now().trunc_subsecs(6);
        let params_blob = serde_json::to_vec(params)?;

        sqlx::query(
            r#"
            INSERT INTO metadata (origin, connector_name, connector_version, category, connector_params, created_on)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(origin)
        .bind(connector_name)
        .bind(connector_version)
        .bind(category)
        .bind(params_blob)
        .bind(created_on.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        debug!(path = %self.path.display(), origin, connector_name, category, "archive metadata initialized");

        self.set_metadata(Some(ArchiveMetadata {
            origin: origin.to_string(),
            connector_name: connector_name.to_string(),
            connector_version: connector_version.to_string(),
            category: category.to_string(),
            connector_params: params.clone(),
            created_on,
        }));
        Ok(())
    }

    /// Record the outcome of a request.
    ///
    /// Returns the entry fingerprint. The write is committed before this
    /// returns.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::DuplicateEntry`] if the same request was stored before.
    pub async fn store(
        &self,
        target: &str,
        payload: &Value,
        headers: &Value,
        outcome: &Outcome,
    ) -> Result<String, ArchiveError> {
        let hashcode = fingerprint(target, payload, headers);
        let outcome_blob = outcome.encode()?;

        let result = sqlx::query(
            r#"
            INSERT INTO entries (fingerprint, target, payload, headers, outcome)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&hashcode)
        .bind(target)
        .bind(canonical_json(payload).into_bytes())
        .bind(canonical_json(headers).into_bytes())
        .bind(outcome_blob)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(fingerprint = %hashcode, target, error = outcome.is_error(), "entry stored");
                Ok(hashcode)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(ArchiveError::DuplicateEntry {
                    path: self.path.clone(),
                    fingerprint: hashcode,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up the outcome recorded for a request.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::EntryNotFound`] if the request was never stored.
    pub async fn retrieve(
        &self,
        target: &str,
        payload: &Value,
        headers: &Value,
    ) -> Result<Outcome, ArchiveError> {
        let hashcode = fingerprint(target, payload, headers);

        let blob: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT outcome FROM entries WHERE fingerprint = ?")
                .bind(&hashcode)
                .fetch_optional(&self.pool)
                .await?;

        match blob {
            Some(bytes) => {
                debug!(fingerprint = %hashcode, target, "entry retrieved");
                Outcome::decode(&bytes)
            }
            None => Err(ArchiveError::EntryNotFound {
                path: self.path.clone(),
                fingerprint: hashcode,
            }),
        }
    }

    /// Close the underlying connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn invalid(path: &Path, err: sqlx::Error) -> ArchiveError {
    ArchiveError::Invalid {
        path: path.to_path_buf(),
        cause: err.to_string(),
    }
}
