// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-turn pipeline.
//!
//! `dedup -> load -> route -> flow -> commit`. The flow runs on a copy of the
//! loaded conversation; only a completed turn is committed, via
//! compare-and-swap on `version`. A lost race reloads and re-runs the whole
//! turn, up to `max_cas_retries` times. Tool side effects are keyed by a
//! request key derived from the message, so a re-run does not repeat them.

use std::sync::Arc;

use async_trait::async_trait;
use parley_config::model::ConversationConfig;
use parley_core::{
    Clock, Conversation, ConversationStore, InboundEvent, ParleyError, Role, TurnReply,
};
use parley_flow::{FlowEngine, TRY_AGAIN};
use parley_jobs::TurnRunner;
use parley_memory::CustomerMemory;
use parley_router::DomainRouter;
use parley_tools::ToolContext;
use tracing::{debug, info, warn};

use crate::guard::{Admission, IdempotencyGuard};

const CUSTOMER_NAME_SLOT: &str = "customer_name";

pub struct Orchestrator {
    conversations: Arc<dyn ConversationStore>,
    guard: IdempotencyGuard,
    router: Arc<DomainRouter>,
    flows: Arc<FlowEngine>,
    memory: Arc<CustomerMemory>,
    clock: Arc<dyn Clock>,
    config: ConversationConfig,
}

impl Orchestrator {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        guard: IdempotencyGuard,
        router: Arc<DomainRouter>,
        flows: Arc<FlowEngine>,
        memory: Arc<CustomerMemory>,
        clock: Arc<dyn Clock>,
        config: ConversationConfig,
    ) -> Self {
        Self {
            conversations,
            guard,
            router,
            flows,
            memory,
            clock,
            config,
        }
    }

    pub fn default_project_id(&self) -> &str {
        &self.config.default_project_id
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Stored conversation, for inspection.
    pub async fn conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, ParleyError> {
        self.conversations.load(conversation_id).await
    }

    /// Processes one inbound event exactly once and returns its reply.
    ///
    /// A duplicate delivery returns the recorded reply. A duplicate of an
    /// event still being processed fails with [`ParleyError::EventInFlight`]
    /// once the guard's wait budget runs out.
    pub async fn handle_turn(&self, event: InboundEvent) -> Result<TurnReply, ParleyError> {
        let claimed = match self.guard.admit(&event.project_id, &event.message_id).await {
            Admission::Replay(reply) => return Ok(reply),
            Admission::Busy => return Err(IdempotencyGuard::busy_error(&event.message_id)),
            Admission::Proceed { claimed } => claimed,
        };

        match self.run_with_retries(&event).await {
            Ok(reply) => {
                if claimed {
                    self.guard
                        .record(&event.project_id, &event.message_id, &reply)
                        .await;
                }
                Ok(reply)
            }
            Err(e) => {
                if claimed {
                    self.guard.release(&event.project_id, &event.message_id).await;
                }
                Err(e)
            }
        }
    }

    async fn run_with_retries(&self, event: &InboundEvent) -> Result<TurnReply, ParleyError> {
        self.remember_customer_name(event).await;

        let mut attempt = 0;
        loop {
            match self.run_once(event).await {
                Err(ParleyError::VersionConflict {
                    conversation_id,
                    expected,
                }) => {
                    if attempt >= self.config.max_cas_retries {
                        warn!(
                            conversation_id = %conversation_id,
                            message_id = %event.message_id,
                            attempts = attempt + 1,
                            "giving up after repeated version conflicts"
                        );
                        return Err(ParleyError::VersionConflict {
                            conversation_id,
                            expected,
                        });
                    }
                    attempt += 1;
                    debug!(
                        conversation_id = %conversation_id,
                        expected,
                        attempt,
                        "version conflict, re-running turn"
                    );
                }
                other => return other,
            }
        }
    }

    /// One attempt: load, route, run the flow on a copy, commit.
    async fn run_once(&self, event: &InboundEvent) -> Result<TurnReply, ParleyError> {
        let now = self.clock.now();
        let base = match self.conversations.load(&event.conversation_id).await? {
            Some(conversation) => conversation,
            None => {
                let mut fresh = Conversation::new(&event.conversation_id, &event.project_id, now);
                fresh.customer_id = event.customer_id.clone();
                fresh
            }
        };

        let ctx = ToolContext {
            project_id: base.project_id.clone(),
            customer_id: event
                .customer_id
                .clone()
                .or_else(|| base.customer_id.clone())
                .unwrap_or_else(|| base.conversation_id.clone()),
            conversation_id: base.conversation_id.clone(),
            request_key: format!("{}:{}", base.conversation_id, event.message_id),
        };

        let decision = self.router.route(&base, &event.text).await;
        debug!(
            conversation_id = %base.conversation_id,
            target = ?decision.target,
            source = ?decision.source,
            reason = %decision.reason,
            "routed"
        );

        let mut working = base.clone();
        let (mut committed, response_text, domain) =
            match self.flows.run(&mut working, &decision, &ctx).await {
                Ok(reply) => (working, reply.text, reply.domain),
                Err(e) if e.is_adapter_failure() => {
                    warn!(
                        conversation_id = %base.conversation_id,
                        message_id = %event.message_id,
                        error = %e,
                        "adapter failure, stage not advanced"
                    );
                    let domain = base.active_domain;
                    (base, TRY_AGAIN.to_string(), domain)
                }
                Err(e) => return Err(e),
            };

        if committed.customer_id.is_none() {
            committed.customer_id = event.customer_id.clone();
        }
        let cap = self.config.history_cap;
        committed.push_message(Role::User, event.text.clone(), event.received_at, cap);
        committed.push_message(Role::Assistant, response_text.clone(), now, cap);
        let expected = committed.prepare_commit(now);
        self.conversations
            .compare_and_swap(expected, &committed)
            .await?;

        info!(
            conversation_id = %committed.conversation_id,
            message_id = %event.message_id,
            version = committed.version,
            domain = ?domain,
            "turn committed"
        );
        Ok(TurnReply {
            conversation_id: committed.conversation_id,
            message_id: event.message_id.clone(),
            response_text,
            domain,
            version: committed.version,
        })
    }

    async fn remember_customer_name(&self, event: &InboundEvent) {
        let (Some(customer_id), Some(name)) = (&event.customer_id, &event.customer_name) else {
            return;
        };
        let key = parley_core::CustomerKey::new(&event.project_id, customer_id);
        if let Err(e) = self.memory.set(&key, CUSTOMER_NAME_SLOT, name).await {
            warn!(error = %e, "failed to store customer name");
        }
    }
}

#[async_trait]
impl TurnRunner for Orchestrator {
    async fn run_turn(&self, input: InboundEvent) -> Result<TurnReply, ParleyError> {
        self.handle_turn(input).await
    }
}
