// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Purchases planning loop.
//!
//! Each round the planner proposes calls, the gateway runs them, and the
//! results are folded into the observations and the customer's order slots.
//! The loop ends when the planner returns a final reply or after
//! `max_planner_steps` rounds.

use parley_core::{Domain, HistoryEntry, ParleyError};
use parley_memory::CustomerMemory;
use parley_tools::{ToolContext, ToolGateway, ToolOutcome};
use serde_json::Value;
use tracing::{debug, warn};

use crate::planner::{MAX_CALLS_PER_PLAN, Observation, PlanContext, Planner, summarize};

pub const LAST_ORDER_SLOT: &str = "last_order_id";
pub const LAST_TRACKING_SLOT: &str = "last_tracking_id";

/// Collaborators of one planning turn.
pub struct PlanningLoop<'a> {
    pub gateway: &'a ToolGateway,
    pub memory: &'a CustomerMemory,
    pub planner: &'a dyn Planner,
    pub max_steps: usize,
}

impl PlanningLoop<'_> {
    pub async fn run(
        &self,
        ctx: &ToolContext,
        text: &str,
        history: &[HistoryEntry],
    ) -> Result<String, ParleyError> {
        let key = ctx.customer_key();
        let tools = self.gateway.definitions(Domain::Purchases);
        let mut observations: Vec<Observation> = Vec::new();

        for step in 0..self.max_steps.max(1) {
            let plan_ctx = PlanContext {
                text,
                history,
                last_order_id: self.memory.get(&key, LAST_ORDER_SLOT).await?,
                last_tracking_id: self.memory.get(&key, LAST_TRACKING_SLOT).await?,
                observations: &observations,
                tools: &tools,
            };
            let plan = self.planner.propose(&plan_ctx).await?;
            debug!(
                planner = self.planner.name(),
                step,
                calls = plan.tool_calls.len(),
                conversation_id = %ctx.conversation_id,
                "plan proposed"
            );
            if plan.is_final() {
                return Ok(plan
                    .reply
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| summarize(&observations)));
            }

            for call in plan.tool_calls.iter().take(MAX_CALLS_PER_PLAN) {
                let observation = match self.gateway.execute(Domain::Purchases, call, ctx).await {
                    Ok(ToolOutcome::Success(result)) => {
                        self.fold_slots(ctx, &result).await;
                        Observation::success(call, result)
                    }
                    Ok(ToolOutcome::Failed(reason)) => Observation::failure(call, reason),
                    Ok(ToolOutcome::Uncertain { reason }) => Observation::failure(call, reason),
                    Err(ParleyError::ToolRejected { reason, .. }) => {
                        Observation::failure(call, format!("not available ({reason})"))
                    }
                    Err(e) => return Err(e),
                };
                observations.push(observation);
            }
        }

        warn!(
            conversation_id = %ctx.conversation_id,
            max_steps = self.max_steps,
            "planner step budget exhausted"
        );
        if observations.is_empty() {
            Ok(crate::planner::PURCHASES_HELP.to_string())
        } else {
            Ok(summarize(&observations))
        }
    }

    /// Remembers order and tracking ids seen in a result.
    async fn fold_slots(&self, ctx: &ToolContext, result: &Value) {
        let key = ctx.customer_key();
        let order = &result["order"];
        let shipment = &result["shipment"];
        let order_id = order["order_id"].as_str().or(shipment["order_id"].as_str());
        let tracking_id = shipment["tracking_id"]
            .as_str()
            .or(order["tracking_id"].as_str());
        for (slot, value) in [(LAST_ORDER_SLOT, order_id), (LAST_TRACKING_SLOT, tracking_id)] {
            if let Some(value) = value
                && let Err(e) = self.memory.set(&key, slot, value).await
            {
                warn!(error = %e, slot, "failed to update order slot");
            }
        }
    }
}
