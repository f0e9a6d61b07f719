//! Core data models used throughout fetch-harness.
//!
//! These types represent the archive metadata and the enriched items that
//! flow out of a fetch run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fetch parameters passed to a connector (`offset`, ...).
///
/// Stored verbatim in an archive's metadata so a replay can re-issue the
/// exact same requests.
pub type FetchParams = Map<String, Value>;

/// The single metadata record of an archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub origin: String,
    pub connector_name: String,
    pub connector_version: String,
    pub category: String,
    pub connector_params: FetchParams,
    pub created_on: DateTime<Utc>,
}

/// An item emitted by a fetch run.
///
/// Wraps the raw connector record (`data`) with identity, timing, and
/// provenance fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub backend_name: String,
    pub backend_version: String,
    pub harness_version: String,
    /// Wall-clock capture time, UNIX seconds.
    pub timestamp: f64,
    pub origin: String,
    pub uuid: String,
    /// Connector-derived last update time, UNIX seconds.
    pub updated_on: f64,
    pub classified_fields_filtered: Option<Vec<String>>,
    pub category: String,
    pub search_fields: Map<String, Value>,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    pub data: Value,
}

impl Item {
    /// The item without its capture timestamp, for comparing two runs.
    pub fn without_timestamp(&self) -> Item {
        Item {
            timestamp: 0.0,
            ..self.clone()
        }
    }
}
