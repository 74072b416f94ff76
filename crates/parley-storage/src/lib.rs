// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence layer for the Parley orchestration engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`, plus a process-local
//! backend with the same contracts. Both implement every store trait from
//! `parley-core`: conversations, processed events, jobs and customer memory.

pub mod adapter;
pub mod database;
pub mod in_memory;
pub mod migrations;
pub mod models;
pub mod queries;

use std::sync::Arc;

use parley_config::model::{StorageBackend, StorageConfig};
use parley_core::{ConversationStore, EventStore, JobStore, MemoryBackend, ParleyError, PluginAdapter};

pub use adapter::SqliteStorage;
pub use database::Database;
pub use in_memory::InMemoryStorage;

/// The four stores, backed by one storage engine.
#[derive(Clone)]
pub struct Stores {
    pub conversations: Arc<dyn ConversationStore>,
    pub events: Arc<dyn EventStore>,
    pub jobs: Arc<dyn JobStore>,
    pub memory: Arc<dyn MemoryBackend>,
    /// The engine itself, for health checks.
    pub engine: Arc<dyn PluginAdapter>,
}

impl Stores {
    /// Every store served by one shared backend.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ConversationStore + EventStore + JobStore + MemoryBackend + PluginAdapter,
    {
        Self {
            conversations: backend.clone(),
            events: backend.clone(),
            jobs: backend.clone(),
            memory: backend.clone(),
            engine: backend,
        }
    }

    /// Fresh process-local stores.
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(InMemoryStorage::new()))
    }
}

/// Opens the configured backend.
pub async fn open_stores(config: &StorageConfig) -> Result<(Stores, Option<SqliteStorage>), ParleyError> {
    match config.backend {
        StorageBackend::Sqlite => {
            let sqlite = SqliteStorage::open(config).await?;
            Ok((Stores::from_backend(Arc::new(sqlite.clone())), Some(sqlite)))
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; state is lost on restart");
            Ok((Stores::in_memory(), None))
        }
    }
}
