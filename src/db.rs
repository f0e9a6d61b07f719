use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// How an archive file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file; it must not exist yet.
    Create,
    ReadWrite,
    ReadOnly,
}

/// Open a connection pool on a single archive file.
///
/// Archives have one writer, so the pool holds one connection. The
/// rollback journal is used instead of WAL so no side files outlive a
/// write next to the archive in the catalog tree.
pub async fn connect(path: &Path, mode: OpenMode) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(mode == OpenMode::Create)
        .read_only(mode == OpenMode::ReadOnly)
        .journal_mode(SqliteJournalMode::Delete);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}
