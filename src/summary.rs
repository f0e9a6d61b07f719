//! Per-run statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::Item;

/// What a fetch run produced, updated once per item.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub fetched: u64,
    pub skipped: u64,
    pub last_uuid: Option<String>,
    pub min_updated_on: Option<DateTime<Utc>>,
    pub max_updated_on: Option<DateTime<Utc>>,
    pub last_updated_on: Option<DateTime<Utc>>,
    pub min_offset: Option<i64>,
    pub max_offset: Option<i64>,
    pub last_offset: Option<i64>,
    /// Free-form details a connector may add at the end of a run.
    pub extras: Option<Value>,
}

impl Summary {
    pub fn total(&self) -> u64 {
        self.fetched + self.skipped
    }

    pub fn update(&mut self, item: &Item) {
        self.fetched += 1;
        self.last_uuid = Some(item.uuid.clone());

        if let Some(updated_on) = unix_to_datetime(item.updated_on) {
            self.last_updated_on = Some(updated_on);
            self.min_updated_on = Some(self.min_updated_on.map_or(updated_on, |m| m.min(updated_on)));
            self.max_updated_on = Some(self.max_updated_on.map_or(updated_on, |m| m.max(updated_on)));
        }

        if let Some(offset) = item.offset {
            self.last_offset = Some(offset);
            self.min_offset = Some(self.min_offset.map_or(offset, |m| m.min(offset)));
            self.max_offset = Some(self.max_offset.map_or(offset, |m| m.max(offset)));
        }
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }
}

pub(crate) fn unix_to_datetime(ts: f64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros((ts * 1_000_000.0).round() as i64)
}

fn or_dash<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Summary of results")?;
        writeln!(f, "  total items:      {}", self.total())?;
        writeln!(f, "  fetched items:    {}", self.fetched)?;
        writeln!(f, "  skipped items:    {}", self.skipped)?;
        writeln!(f, "  last item uuid:   {}", or_dash(&self.last_uuid))?;
        writeln!(f, "  min updated on:   {}", or_dash(&self.min_updated_on))?;
        writeln!(f, "  max updated on:   {}", or_dash(&self.max_updated_on))?;
        writeln!(f, "  last updated on:  {}", or_dash(&self.last_updated_on))?;
        writeln!(f, "  min offset:       {}", or_dash(&self.min_offset))?;
        writeln!(f, "  max offset:       {}", or_dash(&self.max_offset))?;
        write!(f, "  last offset:      {}", or_dash(&self.last_offset))?;
        if let Some(extras) = &self.extras {
            write!(f, "\n  extras:           {extras}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn item(uuid: &str, updated_on: f64, offset: Option<i64>) -> Item {
        Item {
            backend_name: "Conn".to_string(),
            backend_version: "1.0".to_string(),
            harness_version: "0.0.0".to_string(),
            timestamp: 0.0,
            origin: "http://x".to_string(),
            uuid: uuid.to_string(),
            updated_on,
            classified_fields_filtered: None,
            category: "bug".to_string(),
            search_fields: Map::new(),
            tag: "http://x".to_string(),
            offset,
            data: json!({}),
        }
    }

    #[test]
    fn test_update_tracks_bounds() {
        let mut summary = Summary::default();
        summary.update(&item("a", 1_500_000_000.0, Some(3)));
        summary.update(&item("b", 1_400_000_000.0, Some(1)));
        summary.update(&item("c", 1_450_000_000.5, Some(2)));
        summary.skip();

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.last_uuid.as_deref(), Some("c"));
        assert_eq!(summary.min_updated_on.unwrap().timestamp(), 1_400_000_000);
        assert_eq!(summary.max_updated_on.unwrap().timestamp(), 1_500_000_000);
        assert_eq!(summary.last_updated_on.unwrap().timestamp_millis(), 1_450_000_000_500);
        assert_eq!((summary.min_offset, summary.max_offset, summary.last_offset), (Some(1), Some(3), Some(2)));
    }

    #[test]
    fn test_items_without_offset() {
        let mut summary = Summary::default();
        summary.update(&item("a", 0.0, None));
        assert_eq!(summary.last_offset, None);
        assert!(summary.to_string().contains("last offset:      -"));
    }
}
