// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Claims flow: order reference, description, confirmation, then `open_claim`.
//!
//! Like bookings, the confirmation stage pins the request key of the turn
//! that entered it, and a filed claim is remembered under an entry id derived
//! from that key.

use std::sync::LazyLock;

use parley_core::{Domain, ParleyError, ToolCall};
use parley_memory::CustomerMemory;
use parley_tools::{ToolContext, ToolGateway, ToolOutcome};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::transition::Transition;

static ORDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ORDER-\d+)\b").expect("literal order pattern"));

const MIN_DESCRIPTION: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ClaimStage {
    Order,
    Description { order_id: String },
    Confirm {
        order_id: String,
        description: String,
        #[serde(default)]
        request_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimEffect {
    /// Check the order exists before asking for details.
    VerifyOrder { order_id: String },
    File {
        order_id: String,
        description: String,
        request_key: String,
    },
}

pub fn initial_stage() -> ClaimStage {
    ClaimStage::Order
}

const ORDER_PROMPT: &str = "Which order is this about? Please send the order id, for example ORDER-123.";

/// Finds the order a message refers to; "last order" falls back to the
/// customer's `last_order_id` slot.
pub fn order_reference(input: &str, last_order_id: Option<&str>) -> Option<String> {
    if let Some(caps) = ORDER_PATTERN.captures(input) {
        return Some(caps[1].to_uppercase());
    }
    let lowered = input.to_lowercase();
    if lowered.contains("last order") || lowered.contains("same order") {
        return last_order_id.map(str::to_string);
    }
    None
}

fn is_yes(input: &str) -> bool {
    matches!(
        input.trim().to_lowercase().as_str(),
        "yes" | "y" | "yeah" | "confirm" | "ok"
    )
}

pub fn transition(
    stage: &ClaimStage,
    input: &str,
    fresh: bool,
    last_order_id: Option<&str>,
    request_key: &str,
) -> Transition<ClaimStage, ClaimEffect> {
    let input = input.trim();
    match stage {
        ClaimStage::Order => match order_reference(input, last_order_id) {
            Some(order_id) => Transition::Effect(ClaimEffect::VerifyOrder { order_id }),
            None if fresh || input.is_empty() => Transition::stay(
                ClaimStage::Order,
                format!("Sorry to hear something went wrong. {ORDER_PROMPT}"),
            ),
            None => Transition::stay(ClaimStage::Order, ORDER_PROMPT),
        },
        ClaimStage::Description { order_id } => {
            if input.chars().count() < MIN_DESCRIPTION {
                Transition::stay(
                    stage.clone(),
                    format!("Please describe the problem with {order_id} in a sentence or two."),
                )
            } else {
                Transition::stay(
                    ClaimStage::Confirm {
                        order_id: order_id.clone(),
                        description: input.to_string(),
                        request_key: request_key.to_string(),
                    },
                    format!("File a claim for {order_id}: \"{input}\"? Reply yes or no."),
                )
            }
        }
        ClaimStage::Confirm {
            order_id,
            description,
            request_key: pinned,
        } => {
            if is_yes(input) {
                let request_key = if pinned.is_empty() { request_key } else { pinned };
                Transition::Effect(ClaimEffect::File {
                    order_id: order_id.clone(),
                    description: description.clone(),
                    request_key: request_key.to_string(),
                })
            } else {
                Transition::stay(
                    ClaimStage::Description {
                        order_id: order_id.clone(),
                    },
                    format!("Okay, please describe the problem with {order_id} again."),
                )
            }
        }
    }
}

pub async fn apply_effect(
    gateway: &ToolGateway,
    memory: &CustomerMemory,
    ctx: &ToolContext,
    stage: &ClaimStage,
    effect: ClaimEffect,
) -> Result<(Option<ClaimStage>, String), ParleyError> {
    match effect {
        ClaimEffect::VerifyOrder { order_id } => {
            let next = ClaimStage::Description {
                order_id: order_id.clone(),
            };
            let ask = format!("What went wrong with {order_id}?");
            if !gateway.allowed(Domain::Claims).contains(&"get_order") {
                return Ok((Some(next), ask));
            }
            let call = ToolCall::new("get_order", json!({ "order_id": order_id }));
            match gateway.execute(Domain::Claims, &call, ctx).await? {
                ToolOutcome::Failed(reason) => Ok((
                    Some(stage.clone()),
                    format!("I couldn't find {order_id} ({reason}). {ORDER_PROMPT}"),
                )),
                ToolOutcome::Success(_) | ToolOutcome::Uncertain { .. } => Ok((Some(next), ask)),
            }
        }
        ClaimEffect::File {
            order_id,
            description,
            request_key,
        } => {
            let ctx = ToolContext {
                request_key,
                ..ctx.clone()
            };
            let call = ToolCall::new(
                "open_claim",
                json!({ "order_id": order_id, "description": description }),
            );
            match gateway.execute(Domain::Claims, &call, &ctx).await? {
                ToolOutcome::Success(result) => {
                    let claim_id = result["claim"]["claim_id"]
                        .as_str()
                        .unwrap_or("pending")
                        .to_string();
                    let note = format!("Claim {claim_id} on {order_id}: {description}");
                    if let Err(e) = memory
                        .remember_as(
                            &ctx.customer_key(),
                            &format!("claim:{}", ctx.request_key),
                            &note,
                            json!({ "source": "claim", "claim_id": claim_id, "order_id": order_id }),
                        )
                        .await
                    {
                        warn!(error = %e, claim_id = %claim_id, "failed to remember filed claim");
                    }
                    Ok((
                        None,
                        format!("Your claim {claim_id} for {order_id} has been filed. We'll be in touch."),
                    ))
                }
                ToolOutcome::Failed(reason) => {
                    Ok((Some(stage.clone()), format!("Sorry, the claim could not be filed: {reason}.")))
                }
                ToolOutcome::Uncertain { .. } => Ok((
                    Some(stage.clone()),
                    "I couldn't confirm your claim just now. Reply yes to try again.".into(),
                )),
            }
        }
    }
}
