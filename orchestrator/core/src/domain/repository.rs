// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! The only durable state the bridge keeps is the long-poll cursor of each
//! stream, keyed by orchestrator id, so a restarted process resumes polling
//! without replaying or losing remote events.
//!
//! | Trait | Implementations |
//! |-------|----------------|
//! | `CursorRepository` | `InMemoryCursorRepository`, `PostgresCursorRepository` |
//!
//! The implementation is selected at startup from `spec.persistence.backend`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Long-poll stream a cursor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStream {
    Events,
    Logs,
}

impl PollStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStream::Events => "events",
            PollStream::Logs => "logs",
        }
    }
}

impl fmt::Display for PollStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait CursorRepository: Send + Sync {
    /// Last processed index for the stream, `None` when nothing was saved yet.
    async fn load(
        &self,
        orchestrator_id: &str,
        stream: PollStream,
    ) -> Result<Option<u64>, RepositoryError>;

    /// Persist `index`. Implementations never move a stored cursor backwards.
    async fn save(
        &self,
        orchestrator_id: &str,
        stream: PollStream,
        index: u64,
    ) -> Result<(), RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
