//! Versioned schema of the cache index.
//!
//! Applied versions are recorded in `_migrations`; each pending batch runs in
//! its own transaction together with its version row.

use super::Error;
use tokio_rusqlite::{Connection, params};

/// Schema batches in application order.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/001_cache_index.sql"))];

/// Bring the schema up to the latest version.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    let applied = conn
        .call(|conn| -> Result<Vec<i64>, Error> {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS _migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                )",
            )?;

            let current: i64 =
                conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;

            let mut applied = Vec::new();
            for &(version, sql) in MIGRATIONS.iter().filter(|(version, _)| *version > current) {
                let tx = conn.transaction()?;
                tx.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version}: {e}")))?;
                tx.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version, chrono::Utc::now().to_rfc3339()],
                )?;
                tx.commit()?;
                applied.push(version);
            }
            Ok(applied)
        })
        .await
        .map_err(Error::from)?;

    if !applied.is_empty() {
        tracing::info!(?applied, "applied cache index migrations");
    }
    Ok(())
}
