//! RSS connector: entries of an RSS 2.0 feed.
//!
//! The feed is fetched with a single GET and every `<item>` becomes one
//! raw item, its child elements mapped to JSON fields by local name.
//! Repeated children (several `<category>` tags) become a list.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use quick_xml::events::Event;
use serde_json::{Map, Value};

use crate::client::{HttpClient, Request};
use crate::models::FetchParams;
use crate::traits::{Connector, ConnectorArgs};

pub const CATEGORY_ENTRY: &str = "entry";

pub struct Rss {
    url: String,
    done: bool,
}

impl Rss {
    pub fn new(args: ConnectorArgs) -> Self {
        Self {
            url: args.url,
            done: false,
        }
    }
}

fn push_field(entry: &mut Map<String, Value>, field: &str, text: String) {
    match entry.get_mut(field) {
        None => {
            entry.insert(field.to_string(), Value::String(text));
        }
        Some(Value::Array(values)) => values.push(Value::String(text)),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, Value::String(text)]);
        }
    }
}

/// Extract the `<item>` elements of a feed.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<Value>> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut entries = Vec::new();
    let mut current: Option<Map<String, Value>> = None;
    let mut field: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "item" {
                    current = Some(Map::new());
                } else if current.is_some() {
                    field = Some(name);
                }
            }
            Ok(Event::Text(te)) => {
                if let (Some(entry), Some(name)) = (current.as_mut(), field.as_deref()) {
                    push_field(entry, name, te.unescape()?.into_owned());
                }
            }
            Ok(Event::CData(cd)) => {
                if let (Some(entry), Some(name)) = (current.as_mut(), field.as_deref()) {
                    push_field(entry, name, String::from_utf8_lossy(&cd.into_inner()).into_owned());
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"item" {
                    if let Some(entry) = current.take() {
                        entries.push(Value::Object(entry));
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "Invalid RSS feed at position {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

#[async_trait]
impl Connector for Rss {
    fn name(&self) -> &str {
        "Rss"
    }

    fn version(&self) -> &str {
        "0.2.0"
    }

    fn origin(&self) -> &str {
        &self.url
    }

    fn categories(&self) -> &[&'static str] {
        &[CATEGORY_ENTRY]
    }

    fn has_archiving(&self) -> bool {
        true
    }

    fn has_resuming(&self) -> bool {
        false
    }

    fn classified_fields(&self) -> &[&'static str] {
        &["author"]
    }

    fn extra_search_fields(&self) -> &[(&'static str, &'static str)] {
        &[("title", "title")]
    }

    fn origin_unique_field(&self) -> Option<&str> {
        Some("link")
    }

    fn item_id(&self, item: &Value) -> Option<String> {
        item["link"]
            .as_str()
            .or_else(|| item["guid"].as_str())
            .map(String::from)
    }

    fn item_updated_on(&self, item: &Value) -> Result<f64> {
        let published = item["pubDate"]
            .as_str()
            .context("RSS entry without 'pubDate'")?;
        let dt = DateTime::parse_from_rfc2822(published)
            .with_context(|| format!("Invalid RSS date: {published}"))?;
        Ok(dt.timestamp() as f64)
    }

    fn item_category(&self, _item: &Value) -> Result<String> {
        Ok(CATEGORY_ENTRY.to_string())
    }

    async fn next_batch(
        &mut self,
        client: &HttpClient,
        _category: &str,
        _params: &FetchParams,
    ) -> Result<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let response = client.fetch(Request::get(&self.url)).await?;
        let entries = parse_feed(&response.body)?;
        Ok(Some(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Project news</title>
    <link>http://example.com/</link>
    <item>
      <title>Release 1.0</title>
      <link>http://example.com/news/1</link>
      <author>dev@example.com</author>
      <category>release</category>
      <category>stable</category>
      <description><![CDATA[<p>First stable release</p>]]></description>
      <pubDate>Tue, 10 Jun 2003 04:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Fish &amp; chips</title>
      <guid>urn:news:2</guid>
      <pubDate>Wed, 11 Jun 2003 04:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_parse_feed() {
        let entries = parse_feed(FEED.as_bytes()).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0]["title"], json!("Release 1.0"));
        assert_eq!(entries[0]["category"], json!(["release", "stable"]));
        assert_eq!(entries[0]["description"], json!("<p>First stable release</p>"));
        assert_eq!(entries[1]["title"], json!("Fish & chips"));
        assert!(entries[0].get("channel").is_none());
    }

    #[test]
    fn test_item_accessors() {
        let rss = Rss::new(ConnectorArgs::new("http://example.com/feed"));
        let entries = parse_feed(FEED.as_bytes()).unwrap();

        assert_eq!(rss.item_id(&entries[0]).as_deref(), Some("http://example.com/news/1"));
        assert_eq!(rss.item_id(&entries[1]).as_deref(), Some("urn:news:2"));
        assert_eq!(rss.item_updated_on(&entries[0]).unwrap(), 1055217600.0);
    }

    #[test]
    fn test_invalid_feed() {
        assert!(parse_feed(b"<rss><channel><item></channel></rss>").is_err());
    }
}
