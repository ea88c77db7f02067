// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the cursor repository defined in the
//! domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve long-poll cursors
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! - **PostgresCursorRepository** - survives restarts, shared by replicas of
//!   the same orchestrator id
//! - **InMemoryCursorRepository** - development and tests; a restarted process
//!   bootstraps its cursors again

pub mod postgres_cursor;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::repository::{CursorRepository, PollStream, RepositoryError};

pub use postgres_cursor::PostgresCursorRepository;

#[derive(Clone, Default)]
pub struct InMemoryCursorRepository {
    cursors: Arc<RwLock<HashMap<(String, PollStream), u64>>>,
}

impl InMemoryCursorRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorRepository for InMemoryCursorRepository {
    async fn load(
        &self,
        orchestrator_id: &str,
        stream: PollStream,
    ) -> Result<Option<u64>, RepositoryError> {
        let cursors = self.cursors.read();
        Ok(cursors.get(&(orchestrator_id.to_string(), stream)).copied())
    }

    async fn save(
        &self,
        orchestrator_id: &str,
        stream: PollStream,
        index: u64,
    ) -> Result<(), RepositoryError> {
        let mut cursors = self.cursors.write();
        let entry = cursors.entry((orchestrator_id.to_string(), stream)).or_insert(index);
        *entry = (*entry).max(index);
        Ok(())
    }
}
