//! Directory tree of archives.
//!
//! New archives get a random 128-bit name sharded by its first two hex
//! digits:
//!
//! ```text
//! <base>/3f/9c1e0b7a4d2f8e6b5a4c3d2e1f0a9b.sqlite3
//! ```
//!
//! The catalog keeps no index of its own. Listing and searching walk the
//! tree and open every file read-only; files that are not valid archives
//! are logged and skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::archive::{Archive, STORAGE_EXT};
use crate::error::{ArchiveError, CatalogError, CatalogOp};
use crate::models::ArchiveMetadata;

/// One valid archive found in the tree.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub path: PathBuf,
    pub metadata: Option<ArchiveMetadata>,
    pub entries: i64,
}

/// Archive and entry counts for one (origin, connector, category).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub origin: String,
    pub connector_name: String,
    pub category: String,
    pub archives: usize,
    pub entries: i64,
    pub last_created_on: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    base: PathBuf,
}

impl ArchiveCatalog {
    /// Manage the tree rooted at `base`, creating the directory if needed.
    pub fn new(base: impl Into<PathBuf>) -> Result<Self, CatalogError> {
        let base = base.into();
        std::fs::create_dir_all(&base).map_err(|source| CatalogError::Io {
            path: base.clone(),
            source,
        })?;
        Ok(Self { base })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    /// Create a new, empty archive under a fresh random name.
    pub async fn create_archive(&self) -> Result<Archive, CatalogError> {
        let hashcode = uuid::Uuid::new_v4().simple().to_string();
        let (shard, name) = hashcode.split_at(2);

        let dir = self.base.join(shard);
        let path = dir.join(format!("{name}.{STORAGE_EXT}"));

        std::fs::create_dir_all(&dir).map_err(|source| CatalogError::Io {
            path: dir.clone(),
            source,
        })?;

        let archive = Archive::create(&path)
            .await
            .map_err(|source| CatalogError::Archive {
                op: CatalogOp::Create,
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), "new archive created in catalog");
        Ok(archive)
    }

    /// Delete an archive, after checking it really is one.
    pub async fn remove_archive(&self, path: impl AsRef<Path>) -> Result<(), CatalogError> {
        let path = path.as_ref();
        let remove_err = |source: ArchiveError| CatalogError::Archive {
            op: CatalogOp::Remove,
            path: path.to_path_buf(),
            source,
        };

        let archive = Archive::open(path).await.map_err(remove_err)?;
        archive.close().await;
        drop(archive);

        std::fs::remove_file(path).map_err(|e| remove_err(ArchiveError::Io(e)))?;
        debug!(path = %path.display(), "archive removed from catalog");
        Ok(())
    }

    /// Every valid archive in the tree, in walk order.
    ///
    /// Walk order is by file name at each level, so it is stable across
    /// calls.
    pub async fn list(&self) -> Vec<CatalogEntry> {
        let mut found = Vec::new();

        for path in self.archive_files() {
            match Self::inspect(&path).await {
                Ok(entry) => found.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping archive"),
            }
        }

        found
    }

    async fn inspect(path: &Path) -> Result<CatalogEntry, CatalogError> {
        let open_err = |source: ArchiveError| CatalogError::Archive {
            op: CatalogOp::Open,
            path: path.to_path_buf(),
            source,
        };

        let archive = Archive::open_read_only(path).await.map_err(open_err)?;
        let entries = archive.entry_count().await;
        let metadata = archive.metadata();
        archive.close().await;

        Ok(CatalogEntry {
            path: path.to_path_buf(),
            metadata,
            entries: entries.map_err(open_err)?,
        })
    }

    fn archive_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for entry in WalkDir::new(&self.base).sort_by_file_name() {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "cannot walk catalog directory"),
            }
        }

        files
    }

    /// Archives matching the given metadata, oldest first.
    ///
    /// Archives with equal creation times keep their walk order.
    pub async fn search(
        &self,
        origin: &str,
        connector_name: &str,
        category: &str,
        created_after: DateTime<Utc>,
    ) -> Vec<PathBuf> {
        let mut matches: Vec<(DateTime<Utc>, PathBuf)> = self
            .list()
            .await
            .into_iter()
            .filter_map(|entry| {
                let metadata = entry.metadata?;
                let selected = metadata.origin == origin
                    && metadata.connector_name == connector_name
                    && metadata.category == category
                    && metadata.created_on >= created_after;
                selected.then_some((metadata.created_on, entry.path))
            })
            .collect();

        matches.sort_by_key(|(created_on, _)| *created_on);
        matches.into_iter().map(|(_, path)| path).collect()
    }

    /// Archive and entry counts grouped by origin, connector and category.
    pub async fn stats(&self) -> Vec<CatalogStats> {
        group_stats(&self.list().await)
    }
}

/// Group already listed archives by origin, connector and category.
///
/// Archives without metadata are left out.
pub fn group_stats(entries: &[CatalogEntry]) -> Vec<CatalogStats> {
    let mut groups: BTreeMap<(String, String, String), CatalogStats> = BTreeMap::new();

    for entry in entries {
        let Some(metadata) = &entry.metadata else {
            continue;
        };
        let key = (
            metadata.origin.clone(),
            metadata.connector_name.clone(),
            metadata.category.clone(),
        );
        let group = groups.entry(key).or_insert_with(|| CatalogStats {
            origin: metadata.origin.clone(),
            connector_name: metadata.connector_name.clone(),
            category: metadata.category.clone(),
            archives: 0,
            entries: 0,
            last_created_on: metadata.created_on,
        });
        group.archives += 1;
        group.entries += entry.entries;
        group.last_created_on = group.last_created_on.max(metadata.created_on);
    }

    groups.into_values().collect()
}
