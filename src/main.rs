//! # Fetch Harness CLI (`fh`)
//!
//! The `fh` binary fetches items from a connector, records the raw
//! network traffic into an archive catalog, and replays those archives.
//!
//! ## Usage
//!
//! ```bash
//! fh --config ./config/fh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fh fetch <connector> --origin <url>` | Fetch items (and archive the traffic) |
//! | `fh fetch <connector> --origin <url> --fetch-archive` | Replay items from the catalog |
//! | `fh archives list` | List every archive in the catalog |
//! | `fh archives search` | Print paths of archives matching a source |
//! | `fh archives stats` | Summarize the catalog |
//! | `fh archives remove <path>` | Delete one archive |
//! | `fh connectors` | List the available connectors |
//!
//! ## Examples
//!
//! ```bash
//! # Fetch Kitsune questions, resuming after the first 200, and archive the traffic
//! fh fetch kitsune --origin https://support.mozilla.org --offset 200
//!
//! # Read an RSS feed without archiving, one JSON item per line
//! fh fetch rss --origin https://example.com/feed.xml --no-archive --json-line
//!
//! # Replay everything archived for that Kitsune site since March
//! fh fetch kitsune --origin https://support.mozilla.org --fetch-archive --archived-since 2016-03-01
//! ```
//!
//! Log output goes to stderr and honours `RUST_LOG`; items go to stdout.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fetch_harness::fetch_cmd::FetchRequest;
use fetch_harness::traits::ConnectorRegistry;
use fetch_harness::{archive_cmd, config, fetch_cmd, sources, stats};

/// Fetch Harness CLI: fetch time-series items from network sources
/// with a record/replay archive.
#[derive(Parser)]
#[command(
    name = "fh",
    about = "Fetch Harness — fetch items from network sources and replay recorded archives",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/fh.toml`. A missing file means built-in
    /// defaults.
    #[arg(long, global = true, default_value = "./config/fh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch items from a connector and print them as JSON.
    Fetch {
        /// Connector key (see `fh connectors`).
        connector: String,

        /// Base URL of the source (site, feed, tracker).
        #[arg(long)]
        origin: String,

        /// API token, if the source needs one. Never written to archives.
        #[arg(long)]
        api_token: Option<String>,

        /// Category of items to fetch. Defaults to the connector's first.
        #[arg(long)]
        category: Option<String>,

        /// Label attached to every item. Defaults to the origin.
        #[arg(long)]
        tag: Option<String>,

        /// Resume from this offset. Only for connectors that support
        /// resuming (see `fh connectors`).
        #[arg(long, conflicts_with = "fetch_archive")]
        offset: Option<i64>,

        /// Strip classified fields (e.g. personal data) from items.
        #[arg(long, requires = "no_archive")]
        filter_classified: bool,

        /// Item ids to skip.
        #[arg(long, num_args = 1..)]
        blacklist_ids: Vec<String>,

        /// Do not record the raw traffic.
        #[arg(long)]
        no_archive: bool,

        /// Replay items from the catalog instead of the network.
        #[arg(long, conflicts_with = "no_archive")]
        fetch_archive: bool,

        /// With `--fetch-archive`, only replay archives created on or
        /// after this date.
        #[arg(long, requires = "fetch_archive")]
        archived_since: Option<String>,

        /// Print one compact JSON item per line.
        #[arg(long)]
        json_line: bool,
    },

    /// Inspect and manage the archive catalog.
    Archives {
        #[command(subcommand)]
        action: ArchivesAction,
    },

    /// List the available connectors.
    Connectors,
}

#[derive(Subcommand)]
enum ArchivesAction {
    /// List every archive with its metadata and entry count.
    List,

    /// Print paths of archives for one source, oldest first.
    Search {
        #[arg(long)]
        origin: String,

        /// Connector name as stored in the archive (e.g. `Kitsune`).
        #[arg(long)]
        connector: String,

        #[arg(long)]
        category: String,

        /// Only archives created on or after this date.
        #[arg(long)]
        since: Option<String>,
    },

    /// Summarize the catalog by source.
    Stats,

    /// Delete one archive.
    Remove { path: PathBuf },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let registry = ConnectorRegistry::builtin();

    if let Commands::Connectors = cli.command {
        sources::list_connectors(&registry);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Fetch {
            connector,
            origin,
            api_token,
            category,
            tag,
            offset,
            filter_classified,
            blacklist_ids,
            no_archive,
            fetch_archive,
            archived_since,
            json_line,
        } => {
            let request = FetchRequest {
                connector,
                origin,
                api_token,
                category,
                tag,
                offset,
                filter_classified,
                blacklist_ids,
                no_archive,
                fetch_archive,
                archived_since,
                json_line,
            };
            fetch_cmd::run_fetch(&cfg, &registry, request).await?;
        }
        Commands::Archives { action } => match action {
            ArchivesAction::List => {
                archive_cmd::run_list(&cfg).await?;
            }
            ArchivesAction::Search {
                origin,
                connector,
                category,
                since,
            } => {
                archive_cmd::run_search(&cfg, &origin, &connector, &category, since.as_deref())
                    .await?;
            }
            ArchivesAction::Stats => {
                stats::run_stats(&cfg).await?;
            }
            ArchivesAction::Remove { path } => {
                archive_cmd::run_remove(&cfg, &path).await?;
            }
        },
        Commands::Connectors => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
