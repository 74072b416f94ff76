// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recall results and vector math.

use parley_core::{SlotRecord, VectorEntry};
use serde::Serialize;

/// A recalled vector entry with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub entry: VectorEntry,
    pub score: f32,
}

/// Everything currently held for one customer, as shown to administrators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySnapshot {
    /// Live slots only; expired ones are omitted.
    pub slots: Vec<SlotRecord>,
    /// Vector entries, oldest first. Embeddings are not serialized.
    pub vectors: Vec<VectorEntry>,
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 when the lengths differ or either vector has zero norm, so
/// mismatched or empty embeddings never rank above a threshold > 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
