// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the store traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use parley_config::model::StorageConfig;
use parley_core::{
    AdapterType, ClaimOutcome, Conversation, ConversationStore, CustomerKey, EventStore,
    HealthStatus, Job, JobResult, JobStore, MemoryBackend, MemoryCleared, ParleyError,
    PluginAdapter, SlotRecord, TurnReply, VectorEntry,
};

use crate::database::{Database, map_tr_err};
use crate::queries;

/// SQLite-backed storage.
///
/// Wraps a [`Database`] handle and delegates every operation to the typed
/// query modules. One instance serves all four stores.
#[derive(Clone)]
pub struct SqliteStorage {
    db: Database,
}

impl SqliteStorage {
    /// Opens the database at the configured path and runs migrations.
    pub async fn open(config: &StorageConfig) -> Result<Self, ParleyError> {
        let db = Database::open(&config.database_path, config.wal_mode).await?;
        debug!(path = %config.database_path, "SQLite storage initialized");
        Ok(Self { db })
    }

    /// Wraps an already opened database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Checkpoints the WAL before the process exits.
    pub async fn close(&self) -> Result<(), ParleyError> {
        self.db.checkpoint().await?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        self.db
            .connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl ConversationStore for SqliteStorage {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, ParleyError> {
        queries::conversations::get_conversation(&self.db, conversation_id).await
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        conversation: &Conversation,
    ) -> Result<(), ParleyError> {
        queries::conversations::compare_and_swap(&self.db, expected_version, conversation).await
    }
}

#[async_trait]
impl EventStore for SqliteStorage {
    async fn try_claim(
        &self,
        project_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ParleyError> {
        queries::events::try_claim(&self.db, project_id, message_id, now, stale_before).await
    }

    async fn complete(
        &self,
        project_id: &str,
        message_id: &str,
        outcome: &TurnReply,
        now: DateTime<Utc>,
    ) -> Result<(), ParleyError> {
        queries::events::complete(&self.db, project_id, message_id, outcome, now).await
    }

    async fn release(&self, project_id: &str, message_id: &str) -> Result<(), ParleyError> {
        queries::events::release(&self.db, project_id, message_id).await
    }

    async fn outcome(
        &self,
        project_id: &str,
        message_id: &str,
    ) -> Result<Option<TurnReply>, ParleyError> {
        queries::events::outcome(&self.db, project_id, message_id).await
    }

    async fn evict_oldest(&self, project_id: &str, keep: usize) -> Result<usize, ParleyError> {
        queries::events::evict_oldest(&self.db, project_id, keep).await
    }

    async fn count(&self, project_id: &str) -> Result<usize, ParleyError> {
        queries::events::count(&self.db, project_id).await
    }
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn insert(&self, job: &Job) -> Result<(), ParleyError> {
        queries::jobs::insert_job(&self.db, job).await
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, ParleyError> {
        queries::jobs::get_job(&self.db, job_id).await
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, ParleyError> {
        queries::jobs::claim_next(&self.db, now).await
    }

    async fn finish(
        &self,
        job_id: &str,
        result: &JobResult,
        now: DateTime<Utc>,
    ) -> Result<bool, ParleyError> {
        queries::jobs::finish_job(&self.db, job_id, result, now).await
    }

    async fn record_callback(
        &self,
        job_id: &str,
        attempts: u32,
        delivered: bool,
    ) -> Result<(), ParleyError> {
        queries::jobs::record_callback(&self.db, job_id, attempts, delivered).await
    }

    async fn requeue_running(&self) -> Result<usize, ParleyError> {
        queries::jobs::requeue_running(&self.db).await
    }

    async fn undelivered_callbacks(&self) -> Result<Vec<Job>, ParleyError> {
        queries::jobs::undelivered_callbacks(&self.db).await
    }
}

#[async_trait]
impl MemoryBackend for SqliteStorage {
    async fn put_slot(&self, key: &CustomerKey, slot: SlotRecord) -> Result<(), ParleyError> {
        queries::memory::put_slot(&self.db, key, slot).await
    }

    async fn get_slot(
        &self,
        key: &CustomerKey,
        name: &str,
    ) -> Result<Option<SlotRecord>, ParleyError> {
        queries::memory::get_slot(&self.db, key, name).await
    }

    async fn list_slots(&self, key: &CustomerKey) -> Result<Vec<SlotRecord>, ParleyError> {
        queries::memory::list_slots(&self.db, key).await
    }

    async fn delete_slot(&self, key: &CustomerKey, name: &str) -> Result<bool, ParleyError> {
        queries::memory::delete_slot(&self.db, key, name).await
    }

    async fn append_vector(
        &self,
        key: &CustomerKey,
        entry: VectorEntry,
        capacity: usize,
    ) -> Result<Option<usize>, ParleyError> {
        queries::memory::append_vector(&self.db, key, entry, capacity).await
    }

    async fn list_vectors(&self, key: &CustomerKey) -> Result<Vec<VectorEntry>, ParleyError> {
        queries::memory::list_vectors(&self.db, key).await
    }

    async fn clear(&self, key: &CustomerKey) -> Result<MemoryCleared, ParleyError> {
        queries::memory::clear(&self.db, key).await
    }
}
