// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides mock adapters and a harness that assembles the full runtime
//! against temporary storage, for deterministic tests without external
//! services.
//!
//! # Components
//!
//! - [`MockProvider`] - LLM provider answering from a scripted queue
//! - [`MockEmbedder`] - embedder returning hand-picked vectors
//! - [`TestHarness`] - assembled runtime with a manual clock

pub mod harness;
pub mod mock_embedder;
pub mod mock_provider;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_embedder::MockEmbedder;
pub use mock_provider::MockProvider;
