use sqlx::SqlitePool;

pub const METADATA_TABLE: &str = "metadata";
pub const ENTRIES_TABLE: &str = "entries";

/// Create the archive schema on a fresh file.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metadata (
            origin TEXT,
            connector_name TEXT,
            connector_version TEXT,
            category TEXT,
            connector_params BLOB,
            created_on TEXT
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            fingerprint TEXT UNIQUE NOT NULL,
            target TEXT,
            payload BLOB,
            headers BLOB,
            outcome BLOB
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
