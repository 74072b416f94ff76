// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transition results shared by the staged flows, and the creating-call helper.

use parley_core::{Domain, ParleyError, ToolCall};
use parley_tools::{ToolContext, ToolGateway, ToolOutcome};
use serde_json::Value;
use tracing::warn;

/// Result of feeding one user message to a staged flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S, E> {
    /// Move to `next` and reply. `None` ends the flow.
    Reply { next: Option<S>, reply: String },
    /// Perform a side effect; the next stage depends on its outcome.
    Effect(E),
}

impl<S, E> Transition<S, E> {
    pub fn stay(stage: S, reply: impl Into<String>) -> Self {
        Transition::Reply {
            next: Some(stage),
            reply: reply.into(),
        }
    }

    pub fn finish(reply: impl Into<String>) -> Self {
        Transition::Reply {
            next: None,
            reply: reply.into(),
        }
    }
}

/// Final outcome of a creating call after any re-check.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    Done(Value),
    Refused(String),
    /// Still unknown after a lookup and one retry.
    Unknown,
}

/// Runs a non-idempotent call with query-before-retry.
///
/// On an uncertain outcome the tool's lookup is asked whether the call took
/// effect under the turn's request key; only when it did not is the call
/// repeated, once.
pub async fn create_with_recheck(
    gateway: &ToolGateway,
    domain: Domain,
    call: &ToolCall,
    ctx: &ToolContext,
) -> Result<Created, ParleyError> {
    for attempt in 0..2 {
        match gateway.execute(domain, call, ctx).await? {
            ToolOutcome::Success(value) => return Ok(Created::Done(value)),
            ToolOutcome::Failed(reason) => return Ok(Created::Refused(reason)),
            ToolOutcome::Uncertain { reason } => {
                warn!(
                    tool = %call.tool_name,
                    request_key = %ctx.request_key,
                    attempt,
                    reason = %reason,
                    "checking whether uncertain call took effect"
                );
                if let Some(found) = gateway.recheck(domain, call, ctx).await? {
                    return Ok(Created::Done(found));
                }
            }
        }
    }
    Ok(Created::Unknown)
}
