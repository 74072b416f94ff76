// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence contracts for conversations, processed events, jobs and
//! customer memory.
//!
//! Each store is a distinct logical table. Implementations live in
//! `parley-storage` (SQLite and in-memory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::conversation::{Conversation, TurnReply};
use crate::error::ParleyError;
use crate::job::{Job, JobResult};
use crate::memory::{CustomerKey, MemoryCleared, SlotRecord, VectorEntry};

/// Versioned conversation persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync + 'static {
    /// Loads a conversation, `None` if it was never committed.
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, ParleyError>;

    /// Commits `conversation` only if the stored version equals `expected_version`
    /// (zero meaning "not stored yet").
    ///
    /// `conversation.version` must be `expected_version + 1`. A mismatch yields
    /// [`ParleyError::VersionConflict`] and leaves the stored record untouched.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        conversation: &Conversation,
    ) -> Result<(), ParleyError>;
}

/// Result of trying to claim an inbound event for processing.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The caller won and must process the event.
    Claimed,
    /// Another caller holds the claim and has not finished.
    InFlight,
    /// The event was already processed; here is its recorded outcome.
    Completed(TurnReply),
}

/// Processed-event records backing the idempotency guard.
///
/// Implementations must make `try_claim` linearizable per
/// `(project_id, message_id)`.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Claims an event. A claim older than `stale_before` that never completed
    /// may be taken over.
    async fn try_claim(
        &self,
        project_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ParleyError>;

    /// Records the outcome for a claimed event.
    async fn complete(
        &self,
        project_id: &str,
        message_id: &str,
        outcome: &TurnReply,
        now: DateTime<Utc>,
    ) -> Result<(), ParleyError>;

    /// Drops an unfinished claim so a later delivery can retry the event.
    async fn release(&self, project_id: &str, message_id: &str) -> Result<(), ParleyError>;

    /// Returns the recorded outcome, if the event completed.
    async fn outcome(
        &self,
        project_id: &str,
        message_id: &str,
    ) -> Result<Option<TurnReply>, ParleyError>;

    /// Deletes the oldest completed records of a project until at most `keep`
    /// remain. Returns how many were removed.
    async fn evict_oldest(&self, project_id: &str, keep: usize) -> Result<usize, ParleyError>;

    /// Number of records held for a project.
    async fn count(&self, project_id: &str) -> Result<usize, ParleyError>;
}

/// Job persistence and the pending-job queue.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    async fn insert(&self, job: &Job) -> Result<(), ParleyError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, ParleyError>;

    /// Atomically moves the oldest pending job to running and returns it.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, ParleyError>;

    /// Writes the terminal result of a running job.
    ///
    /// Returns `false` without changing anything if the job is not running,
    /// which keeps terminal results write-once.
    async fn finish(
        &self,
        job_id: &str,
        result: &JobResult,
        now: DateTime<Utc>,
    ) -> Result<bool, ParleyError>;

    /// Records callback bookkeeping. Never touches status or result.
    async fn record_callback(
        &self,
        job_id: &str,
        attempts: u32,
        delivered: bool,
    ) -> Result<(), ParleyError>;

    /// Moves every `running` job back to `pending`, ahead of jobs that were
    /// never claimed. Returns how many were requeued.
    ///
    /// Only safe while no worker is running; meant for startup.
    async fn requeue_running(&self) -> Result<usize, ParleyError>;

    /// Terminal jobs whose callback was never attempted, oldest first.
    async fn undelivered_callbacks(&self) -> Result<Vec<Job>, ParleyError>;
}

/// Raw customer memory persistence. TTL and similarity live in `parley-memory`.
#[async_trait]
pub trait MemoryBackend: Send + Sync + 'static {
    async fn put_slot(&self, key: &CustomerKey, slot: SlotRecord) -> Result<(), ParleyError>;

    async fn get_slot(
        &self,
        key: &CustomerKey,
        name: &str,
    ) -> Result<Option<SlotRecord>, ParleyError>;

    async fn list_slots(&self, key: &CustomerKey) -> Result<Vec<SlotRecord>, ParleyError>;

    async fn delete_slot(&self, key: &CustomerKey, name: &str) -> Result<bool, ParleyError>;

    /// Appends a vector, then evicts the oldest entries beyond `capacity`.
    ///
    /// Returns how many were evicted, or `None` when an entry with the same
    /// id is already stored and nothing was written.
    async fn append_vector(
        &self,
        key: &CustomerKey,
        entry: VectorEntry,
        capacity: usize,
    ) -> Result<Option<usize>, ParleyError>;

    /// All vectors of a customer, oldest first.
    async fn list_vectors(&self, key: &CustomerKey) -> Result<Vec<VectorEntry>, ParleyError>;

    async fn clear(&self, key: &CustomerKey) -> Result<MemoryCleared, ParleyError>;
}
