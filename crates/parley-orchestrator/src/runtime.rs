// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wires stores, adapters, tools, flows and jobs into one runtime.

use std::sync::Arc;

use parley_config::ParleyConfig;
use parley_config::model::{EmbeddingMode, ProviderConfig};
use parley_core::{Clock, EmbeddingAdapter, ParleyError, ProviderAdapter};
use parley_flow::{FlowEngine, planner_for};
use parley_jobs::{CallbackNotifier, JobService, WorkerPool};
use parley_memory::{CustomerMemory, HashingEmbedder};
use parley_provider::{OpenAiEmbedder, OpenAiProvider};
use parley_router::DomainRouter;
use parley_storage::Stores;
use parley_tools::builtin::{BookingDesk, ClaimDesk};
use parley_tools::ToolSuite;
use tracing::{info, warn};

use crate::guard::IdempotencyGuard;
use crate::turn::Orchestrator;

/// External model adapters.
#[derive(Clone)]
pub struct Adapters {
    pub provider: Option<Arc<dyn ProviderAdapter>>,
    pub embedder: Arc<dyn EmbeddingAdapter>,
}

impl Adapters {
    /// Adapters for the configured provider.
    ///
    /// Embedding falls back to the local hashing embedder when the provider
    /// mode is selected but no provider is configured.
    pub fn from_config(config: &ParleyConfig) -> Result<Self, ParleyError> {
        let provider = OpenAiProvider::from_config(&config.provider)?
            .map(|p| Arc::new(p) as Arc<dyn ProviderAdapter>);
        let embedder = Self::embedder(config, &config.provider)?;
        Ok(Self { provider, embedder })
    }

    fn embedder(
        config: &ParleyConfig,
        provider: &ProviderConfig,
    ) -> Result<Arc<dyn EmbeddingAdapter>, ParleyError> {
        let hashing = || -> Arc<dyn EmbeddingAdapter> {
            Arc::new(HashingEmbedder::new(config.memory.hashing_dimensions))
        };
        match config.memory.embedding {
            EmbeddingMode::Hashing => Ok(hashing()),
            EmbeddingMode::Provider => match OpenAiEmbedder::from_config(provider)? {
                Some(embedder) => Ok(Arc::new(embedder)),
                None => {
                    warn!("memory.embedding = provider but no provider is configured, using hashing");
                    Ok(hashing())
                }
            },
        }
    }

    /// Only the local hashing embedder, no provider.
    pub fn offline(config: &ParleyConfig) -> Self {
        Self {
            provider: None,
            embedder: Arc::new(HashingEmbedder::new(config.memory.hashing_dimensions)),
        }
    }
}

/// Everything a server needs to answer turns.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<ParleyConfig>,
    pub stores: Stores,
    pub adapters: Adapters,
    pub clock: Arc<dyn Clock>,
    pub memory: Arc<CustomerMemory>,
    pub orchestrator: Arc<Orchestrator>,
    pub jobs: JobService,
    pub bookings: Arc<BookingDesk>,
    pub claims: Arc<ClaimDesk>,
}

impl Runtime {
    pub fn assemble(
        config: ParleyConfig,
        stores: Stores,
        adapters: Adapters,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ParleyError> {
        let memory = Arc::new(CustomerMemory::new(
            Arc::clone(&stores.memory),
            Arc::clone(&adapters.embedder),
            Arc::clone(&clock),
            config.memory.clone(),
        ));
        let tools = ToolSuite::from_config(&config, Arc::clone(&memory), Arc::clone(&clock))?;
        let router = Arc::new(DomainRouter::new(
            config.router.clone(),
            adapters.provider.clone(),
        )?);
        let planner = planner_for(&config.flows, adapters.provider.clone());
        let flows = Arc::new(FlowEngine::new(
            Arc::clone(&tools.gateway),
            Arc::clone(&memory),
            planner,
            Arc::clone(&clock),
            config.flows.clone(),
            &config.router,
            config.conversation.context_window,
        ));
        let guard = IdempotencyGuard::new(
            Arc::clone(&stores.events),
            Arc::clone(&clock),
            config.idempotency.clone(),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&stores.conversations),
            guard,
            router,
            flows,
            Arc::clone(&memory),
            Arc::clone(&clock),
            config.conversation.clone(),
        ));
        let jobs = JobService::new(Arc::clone(&stores.jobs), Arc::clone(&clock));

        info!(
            llm = adapters.provider.is_some(),
            planner = ?config.flows.purchases_planner,
            llm_router = config.router.llm_fallback,
            "runtime assembled"
        );
        Ok(Self {
            config: Arc::new(config),
            stores,
            adapters,
            clock,
            memory,
            orchestrator,
            jobs,
            bookings: tools.bookings,
            claims: tools.claims,
        })
    }

    /// Worker pool running jobs through the orchestrator, with callbacks.
    pub fn worker_pool(&self) -> Result<WorkerPool, ParleyError> {
        let notifier = CallbackNotifier::new(
            &self.config.jobs,
            Arc::clone(&self.stores.jobs),
            Arc::clone(&self.clock),
        )?;
        Ok(WorkerPool::new(
            &self.config.jobs,
            Arc::clone(&self.stores.jobs),
            self.orchestrator.clone(),
            Arc::clone(&self.clock),
            self.jobs.wake_handle(),
        )
        .with_notifier(Arc::new(notifier)))
    }
}
