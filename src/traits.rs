//! The connector contract and the registry of available connectors.
//!
//! A connector knows one kind of source: which requests to make, in which
//! order, and how to read identity and time out of the records it gets
//! back. Everything else (archiving, replay, identifiers, summaries) is
//! done once by the coordinator in [`crate::fetch`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │   "kitsune" → factory   "rss" → factory  │
//! └──────────────┬───────────────────────────┘
//!                ▼  one fresh instance per run
//!     fetch() / fetch_from_archive() → ItemStream
//!                │
//!                ▼
//!     Connector::next_batch(&HttpClient, ...)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use fetch_harness::traits::{ConnectorArgs, ConnectorRegistry};
//!
//! let registry = ConnectorRegistry::builtin();
//! let connector = registry
//!     .build("kitsune", ConnectorArgs::new("https://support.mozilla.org"))
//!     .unwrap();
//! assert_eq!(connector.name(), "Kitsune");
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::client::HttpClient;
use crate::models::FetchParams;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// A source of raw items.
///
/// # Lifecycle
///
/// 1. A fresh instance is built for every run, so per-run caches live on
///    the instance.
/// 2. [`next_batch`](Connector::next_batch) is called until it returns
///    `None`. All network calls go through the given [`HttpClient`], which
///    may be recording to or replaying from an archive.
/// 3. Each raw item is passed to the `item_*` accessors for enrichment.
///
/// # Example
///
/// ```rust
/// use anyhow::Result;
/// use async_trait::async_trait;
/// use fetch_harness::client::{HttpClient, Request};
/// use fetch_harness::models::FetchParams;
/// use fetch_harness::traits::Connector;
/// use serde_json::Value;
///
/// struct Status {
///     url: String,
///     done: bool,
/// }
///
/// #[async_trait]
/// impl Connector for Status {
///     fn name(&self) -> &str { "Status" }
///     fn version(&self) -> &str { "0.1.0" }
///     fn origin(&self) -> &str { &self.url }
///     fn categories(&self) -> &[&'static str] { &["status"] }
///     fn has_archiving(&self) -> bool { true }
///     fn has_resuming(&self) -> bool { false }
///
///     fn item_id(&self, item: &Value) -> Option<String> {
///         item["id"].as_str().map(String::from)
///     }
///     fn item_updated_on(&self, item: &Value) -> Result<f64> {
///         item["ts"].as_f64().ok_or_else(|| anyhow::anyhow!("missing ts"))
///     }
///     fn item_category(&self, _item: &Value) -> Result<String> {
///         Ok("status".to_string())
///     }
///
///     async fn next_batch(
///         &mut self,
///         client: &HttpClient,
///         _category: &str,
///         _params: &FetchParams,
///     ) -> Result<Option<Vec<Value>>> {
///         if self.done {
///             return Ok(None);
///         }
///         self.done = true;
///         let response = client.fetch(Request::get(&self.url)).await?;
///         Ok(Some(vec![response.json()?]))
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector name, recorded in archive metadata (e.g. `"Kitsune"`).
    fn name(&self) -> &str;

    /// Connector version, recorded in archive metadata.
    fn version(&self) -> &str;

    /// The source this instance fetches from, usually its base URL.
    fn origin(&self) -> &str;

    /// Categories of items this connector can fetch. The first one is
    /// the default.
    fn categories(&self) -> &[&'static str];

    /// Whether runs of this connector can be recorded and replayed.
    fn has_archiving(&self) -> bool;

    /// Whether an interrupted run can be resumed (by offset or date).
    fn has_resuming(&self) -> bool;

    /// Dotted key paths holding personal data, removed when classified
    /// filtering is requested.
    fn classified_fields(&self) -> &[&'static str] {
        &[]
    }

    /// Extra `(name, dotted path)` pairs copied into `search_fields`.
    fn extra_search_fields(&self) -> &[(&'static str, &'static str)] {
        &[]
    }

    /// Dotted path of a field unique within the origin, checked against
    /// the blacklist.
    fn origin_unique_field(&self) -> Option<&str> {
        None
    }

    /// Payload keys dropped before requests are fingerprinted.
    fn redacted_params(&self) -> &[&'static str] {
        &[]
    }

    /// Identifier of a raw item, unique within the origin.
    fn item_id(&self, item: &Value) -> Option<String>;

    /// Last update time of a raw item, UNIX seconds.
    fn item_updated_on(&self, item: &Value) -> Result<f64>;

    fn item_category(&self, item: &Value) -> Result<String>;

    /// Position of a raw item for offset-based resuming.
    fn item_offset(&self, _item: &Value) -> Option<i64> {
        None
    }

    /// Extra details for the run summary, read once the run ends.
    fn summary_extras(&self) -> Option<Value> {
        None
    }

    /// Fetch the next batch of raw items, or `None` when the source is
    /// exhausted.
    async fn next_batch(
        &mut self,
        client: &HttpClient,
        category: &str,
        params: &FetchParams,
    ) -> Result<Option<Vec<Value>>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Key paths
// ═══════════════════════════════════════════════════════════════════════

/// Follow a dotted key path (`"author.email"`) into a JSON value.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

/// Remove a dotted key path, applying it to every element of any list
/// met on the way. Missing keys are ignored.
pub fn remove_path(value: &mut Value, path: &str) {
    let keys: Vec<&str> = path.split('.').collect();
    remove_keys(value, &keys);
}

fn remove_keys(value: &mut Value, keys: &[&str]) {
    match value {
        Value::Array(items) => {
            for item in items {
                remove_keys(item, keys);
            }
        }
        Value::Object(map) => match keys {
            [] => {}
            [last] => {
                map.remove(*last);
            }
            [first, rest @ ..] => {
                if let Some(next) = map.get_mut(*first) {
                    remove_keys(next, rest);
                }
            }
        },
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Arguments a connector is built from.
#[derive(Debug, Clone, Default)]
pub struct ConnectorArgs {
    /// Base URL of the source.
    pub url: String,
    /// Value sent as `Authorization` header, when the source needs one.
    pub api_token: Option<String>,
}

impl ConnectorArgs {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_token: None,
        }
    }
}

pub type ConnectorFactory = Arc<dyn Fn(ConnectorArgs) -> Box<dyn Connector> + Send + Sync>;

struct Registration {
    key: String,
    description: String,
    factory: ConnectorFactory,
}

/// Name → factory map of available connectors.
#[derive(Default)]
pub struct ConnectorRegistry {
    entries: Vec<Registration>,
}

/// What `fh connectors` shows about one registered connector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorInfo {
    pub key: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub categories: Vec<String>,
    pub has_archiving: bool,
    pub has_resuming: bool,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the connectors shipped in this crate.
    pub fn builtin() -> Self {
        use crate::connector_kitsune::Kitsune;
        use crate::connector_rss::Rss;

        let mut registry = Self::new();
        registry.register(
            "kitsune",
            "Questions and answers from a Kitsune support site",
            |args| Box::new(Kitsune::new(args)),
        );
        registry.register("rss", "Entries of an RSS feed", |args| {
            Box::new(Rss::new(args))
        });
        registry
    }

    /// Register a factory under `key`. A later registration with the same
    /// key replaces the earlier one.
    pub fn register<F>(&mut self, key: &str, description: &str, factory: F)
    where
        F: Fn(ConnectorArgs) -> Box<dyn Connector> + Send + Sync + 'static,
    {
        self.entries.retain(|e| e.key != key);
        self.entries.push(Registration {
            key: key.to_string(),
            description: description.to_string(),
            factory: Arc::new(factory),
        });
    }

    /// The factory registered under `key`, matched case-insensitively.
    pub fn factory(&self, key: &str) -> Result<ConnectorFactory> {
        self.entries
            .iter()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.factory.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown connector: '{}'. Available: {}",
                    key,
                    self.keys().join(", ")
                )
            })
    }

    /// Build a fresh connector instance.
    pub fn build(&self, key: &str, args: ConnectorArgs) -> Result<Box<dyn Connector>> {
        Ok((self.factory(key)?)(args))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// Describe every registered connector.
    pub fn describe(&self) -> Vec<ConnectorInfo> {
        self.entries
            .iter()
            .map(|entry| {
                let probe = (entry.factory)(ConnectorArgs::default());
                ConnectorInfo {
                    key: entry.key.clone(),
                    name: probe.name().to_string(),
                    version: probe.version().to_string(),
                    description: entry.description.clone(),
                    categories: probe.categories().iter().map(|c| c.to_string()).collect(),
                    has_archiving: probe.has_archiving(),
                    has_resuming: probe.has_resuming(),
                }
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested() {
        let item = json!({"author": {"email": "a@b.c"}, "id": 1});
        assert_eq!(lookup(&item, "author.email"), Some(&json!("a@b.c")));
        assert_eq!(lookup(&item, "id"), Some(&json!(1)));
        assert_eq!(lookup(&item, "author.name"), None);
    }

    #[test]
    fn test_remove_path_through_lists() {
        let mut item = json!({
            "answers": [
                {"creator": {"email": "x@y", "name": "x"}},
                {"creator": {"name": "y"}},
            ],
            "creator": {"email": "z@y"}
        });
        remove_path(&mut item, "answers.creator.email");
        remove_path(&mut item, "creator.email");
        remove_path(&mut item, "missing.key");

        assert_eq!(
            item,
            json!({
                "answers": [
                    {"creator": {"name": "x"}},
                    {"creator": {"name": "y"}},
                ],
                "creator": {}
            })
        );
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ConnectorRegistry::builtin();
        assert_eq!(registry.keys(), vec!["kitsune", "rss"]);

        let infos = registry.describe();
        assert_eq!(infos[0].name, "Kitsune");
        assert!(infos[0].has_resuming);
        assert_eq!(infos[1].categories, vec!["entry".to_string()]);
        assert!(!infos[1].has_resuming);

        assert!(registry.build("nope", ConnectorArgs::default()).is_err());
        assert_eq!(
            registry
                .build("RSS", ConnectorArgs::new("http://x/feed"))
                .unwrap()
                .origin(),
            "http://x/feed"
        );
    }
}
