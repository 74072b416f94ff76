// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles the complete runtime with a manual clock, an
//! optional mock provider and either in-memory or temp-SQLite storage.
//! `send_message()` drives the full turn pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parley_config::ParleyConfig;
use parley_config::model::StorageBackend;
use parley_core::{
    Clock, EmbeddingAdapter, InboundEvent, ManualClock, ParleyError, ProviderAdapter, TurnReply,
};
use parley_orchestrator::{Adapters, Runtime};
use parley_storage::{Stores, open_stores};

use crate::mock_provider::MockProvider;

/// Customer id used by [`TestHarness::send_message`].
pub const TEST_CUSTOMER: &str = "customer-1";

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    config: ParleyConfig,
    responses: Option<Vec<String>>,
    embedder: Option<Arc<dyn EmbeddingAdapter>>,
    sqlite: bool,
    start: DateTime<Utc>,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = ParleyConfig::default();
        config.storage.backend = StorageBackend::Memory;
        Self {
            config,
            responses: None,
            embedder: None,
            sqlite: false,
            start: Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).single().unwrap_or_default(),
        }
    }

    /// Adjust the configuration before assembly.
    pub fn with_config(mut self, edit: impl FnOnce(&mut ParleyConfig)) -> Self {
        edit(&mut self.config);
        self
    }

    /// Install a [`MockProvider`] answering with these responses.
    pub fn with_mock_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.responses = Some(responses.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the hashing embedder, e.g. with a [`MockEmbedder`](crate::MockEmbedder).
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Back the stores with a SQLite file in a fresh temp directory.
    pub fn with_sqlite(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Start the manual clock at `start`.
    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    /// Build the test harness, creating all required subsystems.
    pub async fn build(mut self) -> Result<TestHarness, ParleyError> {
        let temp_dir = if self.sqlite {
            let dir =
                tempfile::TempDir::new().map_err(|e| ParleyError::Storage { source: e.into() })?;
            self.config.storage.backend = StorageBackend::Sqlite;
            self.config.storage.database_path =
                dir.path().join("parley.db").to_string_lossy().to_string();
            Some(dir)
        } else {
            None
        };
        let stores = match self.config.storage.backend {
            StorageBackend::Memory => Stores::in_memory(),
            StorageBackend::Sqlite => open_stores(&self.config.storage).await?.0,
        };

        let mut adapters = Adapters::offline(&self.config);
        let provider = self.responses.map(MockProvider::with_responses);
        if let Some(provider) = &provider {
            adapters.provider = Some(Arc::new(provider.clone()) as Arc<dyn ProviderAdapter>);
        }
        if let Some(embedder) = self.embedder {
            adapters.embedder = embedder;
        }

        let clock = Arc::new(ManualClock::new(self.start));
        let runtime = Runtime::assemble(self.config, stores, adapters, clock.clone())?;
        tracing::debug!(sqlite = temp_dir.is_some(), "test harness assembled");

        Ok(TestHarness {
            runtime,
            clock,
            provider,
            next_message: AtomicU64::new(1),
            _temp_dir: temp_dir,
        })
    }
}

/// A fully assembled runtime for tests.
pub struct TestHarness {
    pub runtime: Runtime,
    pub clock: Arc<ManualClock>,
    provider: Option<MockProvider>,
    next_message: AtomicU64,
    _temp_dir: Option<tempfile::TempDir>,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// The mock provider, when one was configured.
    pub fn provider(&self) -> Option<&MockProvider> {
        self.provider.as_ref()
    }

    /// An inbound event as a channel would deliver it.
    pub fn event(&self, message_id: &str, conversation_id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            message_id: message_id.to_string(),
            conversation_id: conversation_id.to_string(),
            project_id: self.runtime.orchestrator.default_project_id().to_string(),
            customer_id: Some(TEST_CUSTOMER.to_string()),
            customer_name: None,
            text: text.to_string(),
            received_at: self.clock.now(),
        }
    }

    /// Runs one turn under a fresh message id.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> Result<TurnReply, ParleyError> {
        let n = self.next_message.fetch_add(1, Ordering::Relaxed);
        let event = self.event(&format!("msg-{n}"), conversation_id, text);
        self.runtime.orchestrator.handle_turn(event).await
    }
}
