// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter and store trait definitions.
//!
//! Adapters extend the [`PluginAdapter`] base trait. All traits use
//! `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod embedding;
pub mod provider;
pub mod storage;

pub use adapter::PluginAdapter;
pub use embedding::EmbeddingAdapter;
pub use provider::ProviderAdapter;
pub use storage::{ClaimOutcome, ConversationStore, EventStore, JobStore, MemoryBackend};
