// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer memory for the Parley orchestration engine.
//!
//! ## Architecture
//!
//! - **CustomerMemory**: slot reads with per-key TTL, vector remember/recall
//! - **HashingEmbedder**: deterministic local embedder, no external calls
//! - **Types**: ScoredEntry, MemorySnapshot, cosine similarity
//!
//! Recall is a brute-force cosine scan over one customer's vectors; the
//! per-customer corpus is bounded by `memory.vector_capacity`.

pub mod hashing;
pub mod manager;
pub mod types;

pub use hashing::HashingEmbedder;
pub use manager::CustomerMemory;
pub use types::{MemorySnapshot, ScoredEntry, cosine_similarity};
