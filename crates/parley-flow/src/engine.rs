// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow engine: applies a routing decision to a conversation.
//!
//! The engine mutates the conversation it is given (active domain and the
//! per-domain state document) and returns the reply text. Callers run it on a
//! copy and commit only when it returns `Ok`, so a failed tool call never
//! leaves a half-advanced stage behind.

use std::sync::Arc;

use parley_config::model::{FlowsConfig, RouterConfig};
use parley_core::{Clock, Conversation, Domain, ParleyError};
use parley_memory::CustomerMemory;
use parley_router::{RouteDecision, RouteSource, RouteTarget};
use parley_tools::{ToolContext, ToolGateway};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::bookings::{self, BookingStage};
use crate::claims::{self, ClaimStage};
use crate::planner::Planner;
use crate::purchases::{LAST_ORDER_SLOT, PlanningLoop};
use crate::replies::Replies;
use crate::transition::Transition;

/// Reply produced by one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowReply {
    pub text: String,
    /// Domain that handled the turn, `None` for control and clarification replies.
    pub domain: Option<Domain>,
}

pub struct FlowEngine {
    gateway: Arc<ToolGateway>,
    memory: Arc<CustomerMemory>,
    planner: Arc<dyn Planner>,
    clock: Arc<dyn Clock>,
    config: FlowsConfig,
    replies: Replies,
    history_window: usize,
}

impl FlowEngine {
    pub fn new(
        gateway: Arc<ToolGateway>,
        memory: Arc<CustomerMemory>,
        planner: Arc<dyn Planner>,
        clock: Arc<dyn Clock>,
        config: FlowsConfig,
        router: &RouterConfig,
        history_window: usize,
    ) -> Self {
        Self {
            gateway,
            memory,
            planner,
            clock,
            config,
            replies: Replies::from_router(router),
            history_window,
        }
    }

    pub fn replies(&self) -> &Replies {
        &self.replies
    }

    /// Runs one turn.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
        decision: &RouteDecision,
        ctx: &ToolContext,
    ) -> Result<FlowReply, ParleyError> {
        let domain = match decision.target {
            RouteTarget::Menu => {
                conversation.active_domain = None;
                conversation.state.clear();
                return Ok(control_reply(self.replies.menu()));
            }
            RouteTarget::Exit => {
                if let Some(active) = conversation.active_domain.take() {
                    conversation.clear_domain_state(active);
                }
                return Ok(control_reply(self.replies.goodbye()));
            }
            RouteTarget::Clarify => return Ok(control_reply(self.replies.clarify())),
            RouteTarget::Domain(domain) => domain,
        };

        let switching = conversation.active_domain != Some(domain)
            || decision.source == RouteSource::ActivationCode;
        if switching {
            conversation.clear_domain_state(domain);
        }
        let fresh = switching || conversation.domain_state(domain).is_none();
        conversation.active_domain = Some(domain);
        debug!(
            conversation_id = %conversation.conversation_id,
            domain = %domain,
            fresh,
            "running flow"
        );

        let text = match domain {
            Domain::Bookings => self.bookings(conversation, &decision.text, fresh, ctx).await?,
            Domain::Claims => self.claims(conversation, &decision.text, fresh, ctx).await?,
            Domain::Purchases => {
                let history_start = conversation.history.len().saturating_sub(self.history_window);
                let planning = PlanningLoop {
                    gateway: &self.gateway,
                    memory: &self.memory,
                    planner: self.planner.as_ref(),
                    max_steps: self.config.max_planner_steps,
                };
                let history = &conversation.history[history_start..];
                let reply = if decision.text.trim().is_empty() {
                    crate::planner::PURCHASES_HELP.to_string()
                } else {
                    planning.run(ctx, &decision.text, history).await?
                };
                conversation.set_domain_state(domain, serde_json::json!({ "stage": "planning" }));
                reply
            }
        };
        Ok(FlowReply {
            text,
            domain: Some(domain),
        })
    }

    async fn bookings(
        &self,
        conversation: &mut Conversation,
        input: &str,
        fresh: bool,
        ctx: &ToolContext,
    ) -> Result<String, ParleyError> {
        let stage: BookingStage =
            load_stage(conversation, Domain::Bookings).unwrap_or_else(bookings::initial_stage);
        let today = self.clock.now().date_naive();
        let (next, reply) = match bookings::transition(
            &stage,
            input,
            fresh,
            today,
            &self.config.booking_services,
            &ctx.request_key,
        ) {
            Transition::Reply { next, reply } => (next, reply),
            Transition::Effect(effect) => {
                bookings::apply_effect(&self.gateway, ctx, &stage, effect).await?
            }
        };
        store_stage(conversation, Domain::Bookings, next)?;
        Ok(reply)
    }

    async fn claims(
        &self,
        conversation: &mut Conversation,
        input: &str,
        fresh: bool,
        ctx: &ToolContext,
    ) -> Result<String, ParleyError> {
        let stage: ClaimStage =
            load_stage(conversation, Domain::Claims).unwrap_or_else(claims::initial_stage);
        let last_order = self.memory.get(&ctx.customer_key(), LAST_ORDER_SLOT).await?;
        let (next, reply) = match claims::transition(
            &stage,
            input,
            fresh,
            last_order.as_deref(),
            &ctx.request_key,
        ) {
            Transition::Reply { next, reply } => (next, reply),
            Transition::Effect(effect) => {
                claims::apply_effect(&self.gateway, &self.memory, ctx, &stage, effect).await?
            }
        };
        store_stage(conversation, Domain::Claims, next)?;
        Ok(reply)
    }
}

fn control_reply(text: impl Into<String>) -> FlowReply {
    FlowReply {
        text: text.into(),
        domain: None,
    }
}

fn load_stage<S: DeserializeOwned>(conversation: &Conversation, domain: Domain) -> Option<S> {
    let raw = conversation.domain_state(domain)?;
    match serde_json::from_value(raw.clone()) {
        Ok(stage) => Some(stage),
        Err(e) => {
            warn!(
                conversation_id = %conversation.conversation_id,
                domain = %domain,
                error = %e,
                "unreadable flow state, starting over"
            );
            None
        }
    }
}

/// Persists the next stage; `None` completes the flow and releases the domain.
fn store_stage<S: Serialize>(
    conversation: &mut Conversation,
    domain: Domain,
    next: Option<S>,
) -> Result<(), ParleyError> {
    match next {
        Some(stage) => {
            let value = serde_json::to_value(&stage)
                .map_err(|e| ParleyError::Internal(format!("flow state encoding: {e}")))?;
            conversation.set_domain_state(domain, value);
        }
        None => {
            conversation.clear_domain_state(domain);
            conversation.active_domain = None;
            debug!(conversation_id = %conversation.conversation_id, domain = %domain, "flow completed");
        }
    }
    Ok(())
}
