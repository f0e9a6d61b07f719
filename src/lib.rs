//! # fetch-harness
//!
//! Fetch time-series items (questions, feed entries, bugs, messages) from
//! network sources, record every raw network interaction in a local
//! archive, and replay those archives later without the network.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Connectors  │──▶│  HttpClient  │──▶│ Transport  │  retry + rate limit
//! │ Kitsune/Rss │   │ live/record/ │   └────────────┘
//! └─────────────┘   │ replay       │──▶┌────────────┐
//!        ▲          └──────────────┘   │  Archive   │  one SQLite file per run
//!        │                             └─────┬──────┘
//! ┌──────┴──────┐                      ┌─────┴──────┐
//! │ fetch::*    │─────────────────────▶│  Catalog   │  <base>/<2hex>/<30hex>.sqlite3
//! │ ItemStream  │                      └────────────┘
//! └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fh connectors                                        # what can be fetched
//! fh fetch kitsune --origin https://support.mozilla.org
//! fh fetch kitsune --origin https://support.mozilla.org --fetch-archive
//! fh archives list
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`fingerprint`] | Request fingerprints and item identifiers |
//! | [`outcome`] | Versioned encoding of recorded results |
//! | [`archive`] | Single-file store of one fetch run |
//! | [`catalog`] | Directory tree of archives, with search |
//! | [`client`] | Interceptable HTTP client (live, record, replay) |
//! | [`retry`] | Retry, backoff and rate-limit transport decorator |
//! | [`traits`] | Connector trait and registry |
//! | [`fetch`] | Fetch and replay coordination |
//! | [`summary`] | Per-run statistics |
//! | [`connector_kitsune`] | Kitsune questions and answers |
//! | [`connector_rss`] | RSS feed entries |
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Archive schema |

pub mod archive;
pub mod archive_cmd;
pub mod catalog;
pub mod client;
pub mod config;
pub mod connector_kitsune;
pub mod connector_rss;
pub mod db;
pub mod error;
pub mod fetch;
pub mod fetch_cmd;
pub mod fingerprint;
pub mod migrate;
pub mod models;
pub mod outcome;
pub mod retry;
pub mod sources;
pub mod stats;
pub mod summary;
pub mod traits;
