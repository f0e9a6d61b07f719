//! `fh fetch`: run a connector and print its items as JSON on stdout.
//!
//! Live runs record into a fresh catalog archive unless `--no-archive` is
//! given or the connector cannot archive. `--fetch-archive` replays every
//! matching archive of the catalog instead of touching the network.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::archive_cmd::parse_date;
use crate::catalog::ArchiveCatalog;
use crate::client::{ReqwestTransport, Transport};
use crate::config::Config;
use crate::fetch::{self, Archiving, FetchOptions, ReplayOptions};
use crate::models::{FetchParams, Item};
use crate::retry::{RateLimitHandler, RetryPolicy, RetryTransport};
use crate::traits::{ConnectorArgs, ConnectorRegistry};

/// Everything `fh fetch` was asked to do.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub connector: String,
    pub origin: String,
    pub api_token: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub offset: Option<i64>,
    pub filter_classified: bool,
    pub blacklist_ids: Vec<String>,
    pub no_archive: bool,
    pub fetch_archive: bool,
    pub archived_since: Option<String>,
    pub json_line: bool,
}

/// Build the transport stack from the `[http]` and `[rate_limit]` sections.
pub fn build_transport(config: &Config) -> Result<Arc<dyn Transport>> {
    let reqwest = ReqwestTransport::new(
        Duration::from_secs(config.http.timeout_secs),
        &config.http.user_agent,
    )?;
    let transport = RetryTransport::new(reqwest, RetryPolicy::from_config(&config.http))
        .with_rate_limit(RateLimitHandler::from_config(&config.rate_limit));
    Ok(Arc::new(transport))
}

pub async fn run_fetch(
    config: &Config,
    registry: &ConnectorRegistry,
    request: FetchRequest,
) -> Result<()> {
    let factory = registry.factory(&request.connector)?;
    let args = ConnectorArgs {
        url: request.origin.clone(),
        api_token: request.api_token.clone(),
    };
    let connector = factory(args.clone());

    if request.fetch_archive {
        let category = match &request.category {
            Some(c) => c.clone(),
            None => connector
                .categories()
                .first()
                .map(|c| c.to_string())
                .unwrap_or_default(),
        };
        let archived_after = match &request.archived_since {
            Some(s) => parse_date(s)?,
            None => DateTime::<Utc>::MIN_UTC,
        };
        let catalog = ArchiveCatalog::new(config.archive_path())?;

        let mut stream = fetch::fetch_from_catalog(
            &catalog,
            move || factory(args.clone()),
            &category,
            archived_after,
            ReplayOptions {
                tag: request.tag,
                blacklist_ids: request.blacklist_ids,
            },
        )
        .await;

        while let Some(item) = stream.next().await? {
            print_item(&item, request.json_line)?;
        }
        return Ok(());
    }

    let mut params = FetchParams::new();
    if let Some(offset) = request.offset {
        if !connector.has_resuming() {
            bail!(
                "{} connector does not support resuming; --offset cannot be used",
                connector.name()
            );
        }
        params.insert("offset".to_string(), Value::from(offset));
    }

    let archiving = if request.no_archive || !connector.has_archiving() {
        Archiving::Off
    } else {
        Archiving::New(ArchiveCatalog::new(config.archive_path())?)
    };

    let mut stream = fetch::fetch(
        connector,
        build_transport(config)?,
        archiving,
        FetchOptions {
            category: request.category,
            params,
            tag: request.tag,
            filter_classified: request.filter_classified,
            blacklist_ids: request.blacklist_ids,
        },
    )
    .await?;

    while let Some(item) = stream.next().await? {
        print_item(&item, request.json_line)?;
    }

    if let Some(path) = stream.archive_path() {
        info!(archive = %path.display(), "raw data archived");
    }
    Ok(())
}

fn print_item(item: &Item, json_line: bool) -> Result<()> {
    let out = if json_line {
        serde_json::to_string(item)?
    } else {
        serde_json::to_string_pretty(item)?
    };
    println!("{}", out);
    Ok(())
}
