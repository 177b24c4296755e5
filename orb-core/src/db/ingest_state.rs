//! Durable skip index for the ingest engine.
//!
//! The table is intentionally disposable: when its shape doesn't match what
//! the code expects, it is dropped and recreated and the scan proceeds with
//! an empty skip map. Every downstream write is idempotent, so a forced full
//! re-scan converges on the same catalog. Entity tables never get this
//! treatment.
use super::models::IngestStateRow;
use super::{Database, DbError};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// In-memory image of one skip-index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    pub mtime_unix: i64,
    pub file_size: i64,
    pub track_id: Uuid,
}

const CREATE_INGEST_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS ingest_state (
    path TEXT PRIMARY KEY,
    mtime_unix BIGINT NOT NULL,
    file_size BIGINT NOT NULL,
    track_id UUID NOT NULL,
    ingested_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

/// Postgres error codes for undefined table / undefined column.
fn is_schema_mismatch(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.code().as_deref(), Some("42P01") | Some("42703"))
        }
        _ => false,
    }
}

impl Database {
    /// Bulk-load the entire skip index in one query.
    ///
    /// On schema mismatch the table is dropped and recreated and an empty map
    /// is returned, forcing a full re-scan.
    pub async fn load_ingest_state(&self) -> Result<HashMap<String, SkipEntry>, DbError> {
        let rows: Result<Vec<IngestStateRow>, sqlx::Error> = sqlx::query_as(
            "SELECT path, mtime_unix, file_size, track_id FROM ingest_state",
        )
        .fetch_all(self.pool())
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) if is_schema_mismatch(&e) => {
                warn!("ingest_state schema mismatch ({}), recreating table", e);
                self.recreate_ingest_state().await?;
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        Ok(rows
            .into_iter()
            .map(|r| {
                (
                    r.path,
                    SkipEntry {
                        mtime_unix: r.mtime_unix,
                        file_size: r.file_size,
                        track_id: r.track_id,
                    },
                )
            })
            .collect())
    }

    pub async fn upsert_ingest_state(
        &self,
        path: &str,
        entry: &SkipEntry,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO ingest_state (path, mtime_unix, file_size, track_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (path) DO UPDATE SET
                mtime_unix = EXCLUDED.mtime_unix,
                file_size = EXCLUDED.file_size,
                track_id = EXCLUDED.track_id,
                ingested_at = now()
            "#,
        )
        .bind(path)
        .bind(entry.mtime_unix)
        .bind(entry.file_size)
        .bind(entry.track_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_ingest_state(&self, path: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM ingest_state WHERE path = $1")
            .bind(path)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn recreate_ingest_state(&self) -> Result<(), DbError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DROP TABLE IF EXISTS ingest_state")
            .execute(&mut *tx)
            .await?;
        sqlx::query(CREATE_INGEST_STATE).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
