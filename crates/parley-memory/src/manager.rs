// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The customer memory manager: TTL-checked slots and similarity recall.

use std::sync::Arc;

use chrono::Duration;
use tracing::debug;

use parley_config::model::MemoryConfig;
use parley_core::types::EmbeddingInput;
use parley_core::{
    Clock, CustomerKey, EmbeddingAdapter, MemoryBackend, MemoryCleared, ParleyError, SlotRecord,
    VectorEntry,
};

use crate::types::{MemorySnapshot, ScoredEntry, cosine_similarity};

/// Slot and vector memory for customers, over a [`MemoryBackend`].
///
/// Expiry is evaluated against the injected [`Clock`] on every read, so a
/// slot past its TTL is never returned even if the backend still holds it.
/// Expired slots are deleted lazily when a read finds them.
pub struct CustomerMemory {
    backend: Arc<dyn MemoryBackend>,
    embedder: Arc<dyn EmbeddingAdapter>,
    clock: Arc<dyn Clock>,
    config: MemoryConfig,
}

impl CustomerMemory {
    pub fn new(
        backend: Arc<dyn MemoryBackend>,
        embedder: Arc<dyn EmbeddingAdapter>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            clock,
            config,
        }
    }

    /// TTL applied to a slot name.
    pub fn ttl(&self, name: &str) -> Duration {
        let secs = self
            .config
            .slot_ttls
            .get(name)
            .copied()
            .unwrap_or(self.config.default_slot_ttl_secs);
        Duration::seconds(secs.min(i64::MAX as u64) as i64)
    }

    fn is_live(&self, slot: &SlotRecord) -> bool {
        self.clock.now() - slot.written_at <= self.ttl(&slot.key)
    }

    /// Reads a slot; absent once `now - written_at` exceeds its TTL.
    pub async fn get(&self, key: &CustomerKey, name: &str) -> Result<Option<String>, ParleyError> {
        let Some(slot) = self.backend.get_slot(key, name).await? else {
            return Ok(None);
        };
        if self.is_live(&slot) {
            return Ok(Some(slot.value));
        }
        debug!(
            project_id = %key.project_id,
            customer_id = %key.customer_id,
            slot = name,
            "slot expired"
        );
        self.backend.delete_slot(key, name).await?;
        Ok(None)
    }

    /// Writes a slot, stamping `written_at` with the current time.
    pub async fn set(
        &self,
        key: &CustomerKey,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), ParleyError> {
        let slot = SlotRecord {
            key: name.to_string(),
            value: value.into(),
            written_at: self.clock.now(),
        };
        self.backend.put_slot(key, slot).await
    }

    /// Embeds `text` and appends it to the customer's vector memory.
    ///
    /// Returns the new entry's id.
    pub async fn remember(
        &self,
        key: &CustomerKey,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<String, ParleyError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.remember_as(key, &id, text, metadata).await?;
        Ok(id)
    }

    /// Like [`remember`](Self::remember) with a caller-chosen entry id.
    ///
    /// Writing an id that is already stored is a no-op, so a re-run side
    /// effect is remembered once. Returns whether a new entry was added.
    pub async fn remember_as(
        &self,
        key: &CustomerKey,
        id: &str,
        text: &str,
        metadata: serde_json::Value,
    ) -> Result<bool, ParleyError> {
        let embedding = self.embed_one(text).await?;
        let entry = VectorEntry {
            id: id.to_string(),
            embedding,
            text: text.to_string(),
            metadata,
            created_at: self.clock.now(),
        };
        let Some(evicted) = self
            .backend
            .append_vector(key, entry, self.config.vector_capacity)
            .await?
        else {
            debug!(entry_id = id, "vector already remembered");
            return Ok(false);
        };
        debug!(
            project_id = %key.project_id,
            customer_id = %key.customer_id,
            evicted,
            "vector remembered"
        );
        Ok(true)
    }

    /// The `top_k` entries most similar to `query`, at or above the threshold.
    ///
    /// Ranked by similarity descending; equal scores put the most recent entry
    /// first. `top_k` of `None` uses the configured default.
    pub async fn recall(
        &self,
        key: &CustomerKey,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<ScoredEntry>, ParleyError> {
        let top_k = top_k.unwrap_or(self.config.default_top_k);
        let entries = self.backend.list_vectors(key).await?;
        if entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query = self.embed_one(query).await?;
        let threshold = self.config.similarity_threshold;

        // Oldest first from the backend, so position breaks created_at ties.
        let mut scored: Vec<(usize, ScoredEntry)> = entries
            .into_iter()
            .enumerate()
            .filter_map(|(position, entry)| {
                let score = cosine_similarity(&query, &entry.embedding);
                (score >= threshold).then_some((position, ScoredEntry { entry, score }))
            })
            .collect();

        scored.sort_by(|(pa, a), (pb, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
                .then_with(|| pb.cmp(pa))
        });
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, s)| s).collect())
    }

    /// Live slots and all vectors of a customer.
    pub async fn snapshot(&self, key: &CustomerKey) -> Result<MemorySnapshot, ParleyError> {
        let slots = self
            .backend
            .list_slots(key)
            .await?
            .into_iter()
            .filter(|s| self.is_live(s))
            .collect();
        let vectors = self.backend.list_vectors(key).await?;
        Ok(MemorySnapshot { slots, vectors })
    }

    /// Deletes everything held for a customer.
    pub async fn clear(&self, key: &CustomerKey) -> Result<MemoryCleared, ParleyError> {
        let cleared = self.backend.clear(key).await?;
        debug!(
            project_id = %key.project_id,
            customer_id = %key.customer_id,
            slots = cleared.slots,
            vectors = cleared.vectors,
            "customer memory cleared"
        );
        Ok(cleared)
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, ParleyError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ParleyError::Internal("embedding returned no results".to_string()))
    }
}
