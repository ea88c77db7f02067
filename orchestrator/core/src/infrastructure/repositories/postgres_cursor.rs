// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of CursorRepository
//!
//! One row per `(orchestrator_id, stream)` in `poll_cursors`. Saves are
//! upserts guarded by `GREATEST` so a late writer can never rewind a cursor.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::debug;

use crate::domain::repository::{CursorRepository, PollStream, RepositoryError};

/// One connection per poll stream
const MAX_CONNECTIONS: u32 = 2;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PostgresCursorRepository {
    pool: PgPool,
}

impl PostgresCursorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool on `database_url` and make sure `poll_cursors` exists.
    pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(database_url)
            .await
            .map_err(|e| {
                RepositoryError::Database(format!("Cannot connect to cursor database: {}", e))
            })?;

        let repository = Self::new(pool);
        repository.ensure_schema().await?;
        Ok(repository)
    }

    /// Create the `poll_cursors` table when it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poll_cursors (
                orchestrator_id TEXT NOT NULL,
                stream TEXT NOT NULL,
                last_index BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (orchestrator_id, stream)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to create poll_cursors: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl CursorRepository for PostgresCursorRepository {
    async fn load(
        &self,
        orchestrator_id: &str,
        stream: PollStream,
    ) -> Result<Option<u64>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT last_index
            FROM poll_cursors
            WHERE orchestrator_id = $1 AND stream = $2
            "#,
        )
        .bind(orchestrator_id)
        .bind(stream.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let index: i64 = row
                    .try_get("last_index")
                    .map_err(|e| RepositoryError::Database(format!("Missing last_index: {}", e)))?;
                Ok(Some(index.max(0) as u64))
            }
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        orchestrator_id: &str,
        stream: PollStream,
        index: u64,
    ) -> Result<(), RepositoryError> {
        let index = i64::try_from(index)
            .map_err(|_| {
                RepositoryError::Serialization(format!("cursor {} does not fit BIGINT", index))
            })?;

        sqlx::query(
            r#"
            INSERT INTO poll_cursors (orchestrator_id, stream, last_index, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (orchestrator_id, stream) DO UPDATE SET
                last_index = GREATEST(poll_cursors.last_index, EXCLUDED.last_index),
                updated_at = NOW()
            "#,
        )
        .bind(orchestrator_id)
        .bind(stream.as_str())
        .bind(index)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save cursor: {}", e)))?;

        debug!(orchestrator_id, stream = %stream, index, "Cursor persisted");
        Ok(())
    }
}
