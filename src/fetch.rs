//! Fetch and replay coordination.
//!
//! Runs one connector end to end, either against the network (optionally
//! recording into an archive) or against a previously recorded archive.
//!
//! ```text
//! fetch()              connector → HttpClient (live | record) → Transport
//! fetch_from_archive() connector → HttpClient (replay)        → Archive
//! fetch_from_catalog() search the catalog, then fetch_from_archive() each match
//! ```
//!
//! Runs are lazy: nothing beyond setup happens until the caller pulls with
//! [`ItemStream::next`], and a caller may stop pulling at any time.
//!
//! # Rollback
//!
//! When a run that created its own archive fails, the archive is removed
//! through the catalog so the catalog never holds a partial recording.
//! An archive supplied by the caller is never removed.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::archive::Archive;
use crate::catalog::ArchiveCatalog;
use crate::client::{HttpClient, RunMetadata, Transport};
use crate::error::{ArchiveError, FetchError, IdentityError};
use crate::fingerprint;
use crate::models::{FetchParams, Item};
use crate::summary::Summary;
use crate::traits::{lookup, remove_path, Connector};

pub const HARNESS_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Where a live run records its requests.
pub enum Archiving {
    /// Nothing is recorded.
    Off,
    /// A fresh archive is created in this catalog, and removed again if
    /// the run fails.
    New(ArchiveCatalog),
    /// Record into an archive owned by the caller.
    Existing(Arc<Archive>),
}

/// Options of a live run.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Category to fetch; defaults to the connector's first category.
    pub category: Option<String>,
    /// Connector parameters (`offset`, ...).
    pub params: FetchParams,
    /// Label stored on every item; defaults to the origin.
    pub tag: Option<String>,
    /// Remove the connector's classified fields from every item.
    pub filter_classified: bool,
    /// Values of the origin-unique field whose items are skipped.
    pub blacklist_ids: Vec<String>,
}

/// Options of a replay.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub tag: Option<String>,
    pub blacklist_ids: Vec<String>,
}

/// Start a live run.
///
/// # Errors
///
/// - [`FetchError::InvalidCategory`] for a category the connector lacks.
/// - [`FetchError::Capability`] when classified filtering is combined
///   with archiving.
/// - [`FetchError::Catalog`] when a fresh archive cannot be created.
pub async fn fetch(
    connector: Box<dyn Connector>,
    transport: Arc<dyn Transport>,
    archiving: Archiving,
    options: FetchOptions,
) -> Result<ItemStream, FetchError> {
    let category = resolve_category(connector.as_ref(), options.category.as_deref())?;

    if options.filter_classified && !matches!(archiving, Archiving::Off) {
        return Err(FetchError::Capability(
            "classified fields filtering is not compatible with archiving items".to_string(),
        ));
    }

    let (archive, rollback) = match archiving {
        Archiving::Off => (None, None),
        Archiving::Existing(archive) => (Some(archive), None),
        Archiving::New(catalog) => {
            let archive = Arc::new(catalog.create_archive().await?);
            (Some(archive), Some(catalog))
        }
    };

    let client = match &archive {
        None => HttpClient::live(transport),
        Some(archive) => HttpClient::recording(
            transport,
            archive.clone(),
            RunMetadata {
                origin: connector.origin().to_string(),
                connector_name: connector.name().to_string(),
                connector_version: connector.version().to_string(),
                category: category.clone(),
                params: options.params.clone(),
            },
        ),
    }
    .redact_params(connector.redacted_params());

    info!(
        connector = connector.name(),
        origin = connector.origin(),
        category = %category,
        archive = ?archive.as_ref().map(|a| a.path().to_path_buf()),
        "fetch started"
    );

    Ok(ItemStream::new(
        connector,
        client,
        category,
        options.params,
        Enrichment {
            tag: options.tag,
            filter_classified: options.filter_classified,
            blacklist: options.blacklist_ids.into_iter().collect(),
        },
        archive,
        rollback,
    ))
}

/// Start a replay of `archive`.
///
/// Category and parameters come from the archive metadata, so the
/// connector re-issues exactly the requests it recorded.
///
/// # Errors
///
/// - [`FetchError::Usage`] when no archive is given.
/// - [`FetchError::Capability`] when the connector cannot archive.
/// - [`ArchiveError::MissingMetadata`] when the archive was never used.
pub async fn fetch_from_archive(
    connector: Box<dyn Connector>,
    archive: Option<Arc<Archive>>,
    options: ReplayOptions,
) -> Result<ItemStream, FetchError> {
    let archive =
        archive.ok_or_else(|| FetchError::Usage("archive instance was not provided".to_string()))?;

    if !connector.has_archiving() {
        return Err(FetchError::Capability(format!(
            "{} connector does not support archiving",
            connector.name()
        )));
    }

    let metadata = archive
        .metadata()
        .ok_or_else(|| ArchiveError::MissingMetadata(archive.path().to_path_buf()))?;
    let category = resolve_category(connector.as_ref(), Some(&metadata.category))?;

    let client = HttpClient::replaying(archive.clone()).redact_params(connector.redacted_params());

    info!(
        connector = connector.name(),
        category = %category,
        archive = %archive.path().display(),
        "replay started"
    );

    Ok(ItemStream::new(
        connector,
        client,
        category,
        metadata.connector_params,
        Enrichment {
            tag: options.tag,
            filter_classified: false,
            blacklist: options.blacklist_ids.into_iter().collect(),
        },
        Some(archive),
        None,
    ))
}

/// Replay every matching archive of a catalog, oldest first.
///
/// `build` is called once to learn the connector's name and origin, then
/// once per archive, so every replay gets a fresh connector.
pub async fn fetch_from_catalog<F>(
    catalog: &ArchiveCatalog,
    build: F,
    category: &str,
    archived_after: DateTime<Utc>,
    options: ReplayOptions,
) -> CatalogStream
where
    F: Fn() -> Box<dyn Connector> + Send + Sync + 'static,
{
    let probe = build();
    let paths = catalog
        .search(probe.origin(), probe.name(), category, archived_after)
        .await;

    debug!(
        connector = probe.name(),
        origin = probe.origin(),
        category,
        archives = paths.len(),
        "replaying catalog archives"
    );

    CatalogStream {
        build: Box::new(build),
        paths: paths.into(),
        current: None,
        options,
    }
}

fn resolve_category(connector: &dyn Connector, requested: Option<&str>) -> Result<String, FetchError> {
    let categories = connector.categories();
    let category = match requested {
        Some(c) => c,
        None => categories.first().copied().unwrap_or_default(),
    };

    if !categories.iter().any(|c| *c == category) {
        return Err(FetchError::InvalidCategory {
            category: category.to_string(),
            connector: connector.name().to_string(),
        });
    }
    Ok(category.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Item stream
// ═══════════════════════════════════════════════════════════════════════

struct Enrichment {
    tag: Option<String>,
    filter_classified: bool,
    blacklist: HashSet<String>,
}

/// Lazily produced items of one run.
pub struct ItemStream {
    connector: Box<dyn Connector>,
    client: HttpClient,
    category: String,
    params: FetchParams,
    enrichment: Enrichment,
    buffer: VecDeque<Value>,
    summary: Summary,
    archive: Option<Arc<Archive>>,
    rollback: Option<ArchiveCatalog>,
    done: bool,
}

impl ItemStream {
    fn new(
        connector: Box<dyn Connector>,
        client: HttpClient,
        category: String,
        params: FetchParams,
        enrichment: Enrichment,
        archive: Option<Arc<Archive>>,
        rollback: Option<ArchiveCatalog>,
    ) -> Self {
        Self {
            connector,
            client,
            category,
            params,
            enrichment,
            buffer: VecDeque::new(),
            summary: Summary::default(),
            archive,
            rollback,
            done: false,
        }
    }

    /// Pull the next item, or `None` once the run is over.
    ///
    /// After an error the stream is finished and returns `None`.
    pub async fn next(&mut self) -> Result<Option<Item>, FetchError> {
        if self.done {
            return Ok(None);
        }

        match self.advance().await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => {
                self.done = true;
                self.summary.extras = self.connector.summary_extras();
                info!("fetch finished\n{}", self.summary);
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                self.abort().await;
                Err(e)
            }
        }
    }

    /// Drain the stream.
    pub async fn collect_all(mut self) -> Result<Vec<Item>, FetchError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    /// Path of the archive the run records to or replays from.
    pub fn archive_path(&self) -> Option<&Path> {
        self.archive.as_deref().map(Archive::path)
    }

    async fn advance(&mut self) -> Result<Option<Item>, FetchError> {
        loop {
            if let Some(raw) = self.buffer.pop_front() {
                if self.is_blacklisted(&raw) {
                    self.summary.skip();
                    continue;
                }
                let item = self.enrich(raw)?;
                self.summary.update(&item);
                debug!(uuid = %item.uuid, "item fetched");
                return Ok(Some(item));
            }

            let batch = self
                .connector
                .next_batch(&self.client, &self.category, &self.params)
                .await
                .map_err(FetchError::from_connector)?;

            match batch {
                Some(batch) => self.buffer.extend(batch),
                None => return Ok(None),
            }
        }
    }

    fn is_blacklisted(&self, raw: &Value) -> bool {
        if self.enrichment.blacklist.is_empty() {
            return false;
        }
        let Some(field) = self.connector.origin_unique_field() else {
            return false;
        };
        let Some(value) = lookup(raw, field).map(value_as_string) else {
            return false;
        };

        let blacklisted = self.enrichment.blacklist.contains(&value);
        if blacklisted {
            warn!(field, value = %value, "skipping blacklisted item");
        }
        blacklisted
    }

    fn enrich(&self, mut raw: Value) -> Result<Item, FetchError> {
        let connector = self.connector.as_ref();
        let origin = connector.origin();

        let item_id = connector
            .item_id(&raw)
            .ok_or_else(|| IdentityError::Missing("item id".to_string()))?;
        let uuid = fingerprint::uuid(&[origin, &item_id])?;
        let updated_on = connector
            .item_updated_on(&raw)
            .map_err(FetchError::from_connector)?;
        let category = connector
            .item_category(&raw)
            .map_err(FetchError::from_connector)?;
        let offset = connector.item_offset(&raw);

        let mut search_fields = Map::new();
        search_fields.insert("item_id".to_string(), Value::String(item_id.clone()));
        for (name, path) in connector.extra_search_fields() {
            match lookup(&raw, path) {
                Some(value) => {
                    search_fields.insert(name.to_string(), value.clone());
                }
                None => warn!(item_id = %item_id, field = *name, path = *path, "search field not found"),
            }
        }

        let classified_fields_filtered = if self.enrichment.filter_classified {
            let fields = connector.classified_fields();
            for path in fields {
                remove_path(&mut raw, path);
            }
            Some(fields.iter().map(|f| f.to_string()).collect())
        } else {
            None
        };

        Ok(Item {
            backend_name: connector.name().to_string(),
            backend_version: connector.version().to_string(),
            harness_version: HARNESS_VERSION.to_string(),
            timestamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            origin: origin.to_string(),
            uuid,
            updated_on,
            classified_fields_filtered,
            category,
            search_fields,
            tag: self
                .enrichment
                .tag
                .clone()
                .unwrap_or_else(|| origin.to_string()),
            offset,
            data: raw,
        })
    }

    /// Remove a freshly created archive after a failure.
    async fn abort(&mut self) {
        let Some(catalog) = self.rollback.take() else {
            return;
        };
        let Some(archive) = self.archive.take() else {
            return;
        };

        let path = archive.path().to_path_buf();
        archive.close().await;
        drop(archive);

        match catalog.remove_archive(&path).await {
            Ok(()) => info!(path = %path.display(), "removed archive of failed fetch"),
            Err(e) => error!(path = %path.display(), error = %e, "failed to remove archive of failed fetch"),
        }
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Catalog replay
// ═══════════════════════════════════════════════════════════════════════

/// Concatenated replay of several archives.
///
/// An archive that cannot be opened or replayed because of an archive
/// failure is logged and skipped; any other error ends the stream.
pub struct CatalogStream {
    build: Box<dyn Fn() -> Box<dyn Connector> + Send + Sync>,
    paths: VecDeque<PathBuf>,
    current: Option<(PathBuf, ItemStream)>,
    options: ReplayOptions,
}

impl CatalogStream {
    pub async fn next(&mut self) -> Result<Option<Item>, FetchError> {
        loop {
            if let Some((path, stream)) = &mut self.current {
                match stream.next().await {
                    Ok(Some(item)) => return Ok(Some(item)),
                    Ok(None) => {}
                    Err(FetchError::Archive(e)) => {
                        warn!(path = %path.display(), error = %e, "ignoring archive")
                    }
                    Err(e) => {
                        self.paths.clear();
                        self.current = None;
                        return Err(e);
                    }
                }
                self.current = None;
            }

            let Some(path) = self.paths.pop_front() else {
                return Ok(None);
            };

            match self.open(&path).await {
                Ok(stream) => self.current = Some((path, stream)),
                Err(FetchError::Archive(e)) => {
                    warn!(path = %path.display(), error = %e, "ignoring archive")
                }
                Err(e) => {
                    self.paths.clear();
                    return Err(e);
                }
            }
        }
    }

    async fn open(&self, path: &Path) -> Result<ItemStream, FetchError> {
        let archive = Archive::open_read_only(path).await?;
        fetch_from_archive((self.build)(), Some(Arc::new(archive)), self.options.clone()).await
    }

    /// Archives not yet replayed.
    pub fn remaining(&self) -> usize {
        self.paths.len()
    }

    pub async fn collect_all(mut self) -> Result<Vec<Item>, FetchError> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}
