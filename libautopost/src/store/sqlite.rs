//! Local SQLite repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::{Result, StoreError};
use crate::store::{RotationCursor, RunRepository};
use crate::types::Run;

#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// Open (creating if needed) the database file and run migrations
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::IoError)?;
            }
        }

        // Forward slashes keep the URL valid on Windows; mode=rwc creates the file
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            path.to_string_lossy().replace('\\', "/")
        );

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(StoreError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(StoreError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn decode_record(record: &str) -> Result<Run> {
    serde_json::from_str(record).map_err(|e| StoreError::Serialization(e).into())
}

#[async_trait]
impl RunRepository for SqliteRepository {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn put_run(&self, run: &Run) -> Result<()> {
        let record = serde_json::to_string(run).map_err(StoreError::Serialization)?;

        sqlx::query(
            r#"
            INSERT INTO runs (id, user_id, status, record, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                status = excluded.status,
                record = excluded.record,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&run.id)
        .bind(&run.user_id)
        .bind(run.status.as_str())
        .bind(record)
        .bind(run.created_at.timestamp_millis())
        .bind(run.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT record FROM runs WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::SqlxError)?;

        row.map(|r| decode_record(&r.get::<String, _>("record")))
            .transpose()
    }

    async fn list_runs(&self, user_id: &str) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            r#"
            SELECT record FROM runs
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        rows.iter()
            .map(|r| decode_record(&r.get::<String, _>("record")))
            .collect()
    }

    async fn get_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
    ) -> Result<Option<RotationCursor>> {
        let row = sqlx::query(
            r#"
            SELECT last_author_index, updated_at FROM author_rotation
            WHERE user_id = ? AND profile_id = ?
            "#,
        )
        .bind(user_id)
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        // Out-of-range timestamps read as the epoch, so any other copy is newer
        Ok(row.map(|r| RotationCursor {
            last_author_index: r.get("last_author_index"),
            updated_at: DateTime::<Utc>::from_timestamp_millis(r.get("updated_at"))
                .unwrap_or_default(),
        }))
    }

    async fn set_author_cursor(
        &self,
        user_id: &str,
        profile_id: &str,
        cursor: RotationCursor,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO author_rotation (user_id, profile_id, last_author_index, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(user_id, profile_id) DO UPDATE SET
                last_author_index = excluded.last_author_index,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(profile_id)
        .bind(cursor.last_author_index)
        .bind(cursor.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(StoreError::SqlxError)?;

        Ok(())
    }
}
