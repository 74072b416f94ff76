// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley orchestration engine.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Parley workspace. Stores and external
//! adapters implement traits defined here.

pub mod clock;
pub mod conversation;
pub mod error;
pub mod job;
pub mod memory;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use clock::{Clock, ManualClock, SystemClock};
pub use conversation::{
    Conversation, HistoryEntry, InboundEvent, Role, TurnReply, conversation_id_for,
};
pub use error::ParleyError;
pub use job::{CallbackConfig, Job, JobResult, JobStatus};
pub use memory::{CustomerKey, MemoryCleared, SlotRecord, VectorEntry};
pub use types::{AdapterType, Domain, HealthStatus, ToolCall};

pub use traits::{
    ClaimOutcome, ConversationStore, EmbeddingAdapter, EventStore, JobStore, MemoryBackend,
    PluginAdapter, ProviderAdapter,
};
