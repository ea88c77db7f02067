// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the cursor repository selected by `spec.persistence.backend`.
//! The domain layer only knows the `CursorRepository` trait; the concrete
//! implementation is picked here at startup.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select and initialise the cursor store

use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::domain::bridge_config::{PersistenceBackend, PersistenceConfig};
use crate::domain::repository::CursorRepository;
use crate::infrastructure::repositories::{InMemoryCursorRepository, PostgresCursorRepository};

/// Creates a CursorRepository implementation based on the configured backend
pub async fn create_cursor_repository(
    config: &PersistenceConfig,
) -> anyhow::Result<Arc<dyn CursorRepository>> {
    match config.backend {
        PersistenceBackend::Memory => {
            info!("Using in-memory cursor repository, cursors will not survive a restart");
            Ok(Arc::new(InMemoryCursorRepository::new()))
        }
        PersistenceBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("persistence.database_url is required for the postgres backend")?;
            let repository = PostgresCursorRepository::connect(url)
                .await
                .context("Failed to initialize the PostgreSQL cursor store")?;
            info!("Using PostgreSQL cursor repository");
            Ok(Arc::new(repository))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::PollStream;

    #[tokio::test]
    async fn test_memory_backend() {
        let repository = create_cursor_repository(&PersistenceConfig::default()).await.unwrap();
        repository.save("yorc", PollStream::Logs, 4).await.unwrap();
        assert_eq!(repository.load("yorc", PollStream::Logs).await.unwrap(), Some(4));
    }

    #[tokio::test]
    async fn test_postgres_backend_requires_url() {
        let config = PersistenceConfig {
            backend: PersistenceBackend::Postgres,
            database_url: None,
        };
        assert!(create_cursor_repository(&config).await.is_err());
    }
}
