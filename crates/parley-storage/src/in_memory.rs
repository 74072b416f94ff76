// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-local stores for tests and `backend = "memory"`.
//!
//! Same contracts as the SQLite stores. Conversation CAS holds the DashMap
//! shard lock for the check and the write; event claims and job claims go
//! through one mutex each.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;

use parley_core::{
    AdapterType, ClaimOutcome, Conversation, ConversationStore, CustomerKey, EventStore,
    HealthStatus, Job, JobResult, JobStatus, JobStore, MemoryBackend, MemoryCleared, ParleyError,
    PluginAdapter, SlotRecord, TurnReply, VectorEntry,
};

#[derive(Debug, Clone)]
struct EventRecord {
    seq: u64,
    claimed_at: DateTime<Utc>,
    outcome: Option<TurnReply>,
}

#[derive(Default)]
struct EventTable {
    next_seq: u64,
    records: HashMap<(String, String), EventRecord>,
}

#[derive(Default)]
struct JobTable {
    pending: VecDeque<String>,
    jobs: HashMap<String, Job>,
}

#[derive(Default)]
struct CustomerMemory {
    slots: BTreeMap<String, SlotRecord>,
    vectors: VecDeque<VectorEntry>,
}

/// In-memory implementation of every store trait.
#[derive(Default)]
pub struct InMemoryStorage {
    conversations: DashMap<String, Conversation>,
    events: Mutex<EventTable>,
    jobs: Mutex<JobTable>,
    memory: DashMap<CustomerKey, CustomerMemory>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PluginAdapter for InMemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl ConversationStore for InMemoryStorage {
    async fn load(&self, conversation_id: &str) -> Result<Option<Conversation>, ParleyError> {
        Ok(self
            .conversations
            .get(conversation_id)
            .map(|c| c.value().clone()))
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        conversation: &Conversation,
    ) -> Result<(), ParleyError> {
        if conversation.version != expected_version + 1 {
            return Err(ParleyError::Internal(format!(
                "conversation {} carries version {} for expected {}",
                conversation.conversation_id, conversation.version, expected_version
            )));
        }
        let conflict = || ParleyError::VersionConflict {
            conversation_id: conversation.conversation_id.clone(),
            expected: expected_version,
        };
        match self.conversations.entry(conversation.conversation_id.clone()) {
            Entry::Occupied(mut stored) => {
                if stored.get().version != expected_version {
                    return Err(conflict());
                }
                stored.insert(conversation.clone());
            }
            Entry::Vacant(slot) => {
                if expected_version != 0 {
                    return Err(conflict());
                }
                slot.insert(conversation.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn try_claim(
        &self,
        project_id: &str,
        message_id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome, ParleyError> {
        let mut table = self.events.lock().await;
        let key = (project_id.to_string(), message_id.to_string());
        match table.records.get_mut(&key) {
            Some(record) => match &record.outcome {
                Some(reply) => Ok(ClaimOutcome::Completed(reply.clone())),
                None if record.claimed_at < stale_before => {
                    record.claimed_at = now;
                    Ok(ClaimOutcome::Claimed)
                }
                None => Ok(ClaimOutcome::InFlight),
            },
            None => {
                let seq = table.next_seq;
                table.next_seq += 1;
                table.records.insert(
                    key,
                    EventRecord {
                        seq,
                        claimed_at: now,
                        outcome: None,
                    },
                );
                Ok(ClaimOutcome::Claimed)
            }
        }
    }

    async fn complete(
        &self,
        project_id: &str,
        message_id: &str,
        outcome: &TurnReply,
        now: DateTime<Utc>,
    ) -> Result<(), ParleyError> {
        let mut table = self.events.lock().await;
        let seq = table.next_seq;
        let record = table
            .records
            .entry((project_id.to_string(), message_id.to_string()))
            .or_insert(EventRecord {
                seq,
                claimed_at: now,
                outcome: None,
            });
        record.outcome = Some(outcome.clone());
        if record.seq == seq {
            table.next_seq += 1;
        }
        Ok(())
    }

    async fn release(&self, project_id: &str, message_id: &str) -> Result<(), ParleyError> {
        let mut table = self.events.lock().await;
        let key = (project_id.to_string(), message_id.to_string());
        if table.records.get(&key).is_some_and(|r| r.outcome.is_none()) {
            table.records.remove(&key);
        }
        Ok(())
    }

    async fn outcome(
        &self,
        project_id: &str,
        message_id: &str,
    ) -> Result<Option<TurnReply>, ParleyError> {
        let table = self.events.lock().await;
        Ok(table
            .records
            .get(&(project_id.to_string(), message_id.to_string()))
            .and_then(|r| r.outcome.clone()))
    }

    async fn evict_oldest(&self, project_id: &str, keep: usize) -> Result<usize, ParleyError> {
        let mut table = self.events.lock().await;
        let total = table.records.keys().filter(|(p, _)| p == project_id).count();
        if total <= keep {
            return Ok(0);
        }
        let mut completed: Vec<_> = table
            .records
            .iter()
            .filter(|((p, _), r)| p == project_id && r.outcome.is_some())
            .map(|(k, r)| (r.seq, k.clone()))
            .collect();
        completed.sort_by_key(|(seq, _)| *seq);
        let victims: Vec<_> = completed
            .into_iter()
            .take(total - keep)
            .map(|(_, k)| k)
            .collect();
        for key in &victims {
            table.records.remove(key);
        }
        Ok(victims.len())
    }

    async fn count(&self, project_id: &str) -> Result<usize, ParleyError> {
        let table = self.events.lock().await;
        Ok(table.records.keys().filter(|(p, _)| p == project_id).count())
    }
}

#[async_trait]
impl JobStore for InMemoryStorage {
    async fn insert(&self, job: &Job) -> Result<(), ParleyError> {
        let mut table = self.jobs.lock().await;
        if table.jobs.contains_key(&job.job_id) {
            return Err(ParleyError::Internal(format!("duplicate job id {}", job.job_id)));
        }
        if job.status == JobStatus::Pending {
            table.pending.push_back(job.job_id.clone());
        }
        table.jobs.insert(job.job_id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, ParleyError> {
        Ok(self.jobs.lock().await.jobs.get(job_id).cloned())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<Job>, ParleyError> {
        let mut table = self.jobs.lock().await;
        while let Some(job_id) = table.pending.pop_front() {
            if let Some(job) = table.jobs.get_mut(&job_id)
                && job.status == JobStatus::Pending
            {
                job.status = JobStatus::Running;
                job.started_at = Some(now);
                return Ok(Some(job.clone()));
            }
        }
        Ok(None)
    }

    async fn finish(
        &self,
        job_id: &str,
        result: &JobResult,
        now: DateTime<Utc>,
    ) -> Result<bool, ParleyError> {
        let mut table = self.jobs.lock().await;
        match table.jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = result.status();
                job.result = Some(result.clone());
                job.completed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_callback(
        &self,
        job_id: &str,
        attempts: u32,
        delivered: bool,
    ) -> Result<(), ParleyError> {
        let mut table = self.jobs.lock().await;
        if let Some(job) = table.jobs.get_mut(job_id) {
            job.callback_attempts = attempts;
            job.callback_delivered = delivered;
        }
        Ok(())
    }

    async fn requeue_running(&self) -> Result<usize, ParleyError> {
        let mut table = self.jobs.lock().await;
        let mut running: Vec<(DateTime<Utc>, String)> = table
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Running)
            .map(|job| (job.created_at, job.job_id.clone()))
            .collect();
        running.sort();
        for (_, job_id) in running.iter().rev() {
            if let Some(job) = table.jobs.get_mut(job_id) {
                job.status = JobStatus::Pending;
                job.started_at = None;
            }
            table.pending.push_front(job_id.clone());
        }
        Ok(running.len())
    }

    async fn undelivered_callbacks(&self) -> Result<Vec<Job>, ParleyError> {
        let table = self.jobs.lock().await;
        let mut jobs: Vec<Job> = table
            .jobs
            .values()
            .filter(|job| {
                job.status.is_terminal()
                    && job.callback.is_some()
                    && !job.callback_delivered
                    && job.callback_attempts == 0
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.job_id.cmp(&b.job_id)));
        Ok(jobs)
    }
}

#[async_trait]
impl MemoryBackend for InMemoryStorage {
    async fn put_slot(&self, key: &CustomerKey, slot: SlotRecord) -> Result<(), ParleyError> {
        self.memory
            .entry(key.clone())
            .or_default()
            .slots
            .insert(slot.key.clone(), slot);
        Ok(())
    }

    async fn get_slot(
        &self,
        key: &CustomerKey,
        name: &str,
    ) -> Result<Option<SlotRecord>, ParleyError> {
        Ok(self
            .memory
            .get(key)
            .and_then(|m| m.slots.get(name).cloned()))
    }

    async fn list_slots(&self, key: &CustomerKey) -> Result<Vec<SlotRecord>, ParleyError> {
        Ok(self
            .memory
            .get(key)
            .map(|m| m.slots.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_slot(&self, key: &CustomerKey, name: &str) -> Result<bool, ParleyError> {
        Ok(self
            .memory
            .get_mut(key)
            .is_some_and(|mut m| m.slots.remove(name).is_some()))
    }

    async fn append_vector(
        &self,
        key: &CustomerKey,
        entry: VectorEntry,
        capacity: usize,
    ) -> Result<Option<usize>, ParleyError> {
        let mut memory = self.memory.entry(key.clone()).or_default();
        if memory.vectors.iter().any(|v| v.id == entry.id) {
            return Ok(None);
        }
        memory.vectors.push_back(entry);
        let mut evicted = 0;
        while memory.vectors.len() > capacity {
            memory.vectors.pop_front();
            evicted += 1;
        }
        Ok(Some(evicted))
    }

    async fn list_vectors(&self, key: &CustomerKey) -> Result<Vec<VectorEntry>, ParleyError> {
        Ok(self
            .memory
            .get(key)
            .map(|m| m.vectors.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, key: &CustomerKey) -> Result<MemoryCleared, ParleyError> {
        Ok(self
            .memory
            .remove(key)
            .map(|(_, m)| MemoryCleared {
                slots: m.slots.len(),
                vectors: m.vectors.len(),
            })
            .unwrap_or_default())
    }
}
