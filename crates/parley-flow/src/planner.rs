// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Planners for the purchases planning loop.
//!
//! A planner proposes tool calls given the user's message, recent history,
//! the customer's order slots and the results of calls already made this
//! turn. Its output is untrusted: every proposed call goes through the
//! gateway's allowlist and schema checks like any other.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use parley_core::types::ProviderRequest;
use parley_core::{HistoryEntry, ParleyError, ProviderAdapter, ToolCall};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

static ORDER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(ORDER-\d+)\b").expect("literal order pattern"));
static TRACKING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(TRK-[A-Z0-9]+)\b").expect("literal tracking pattern"));

/// Upper bound on calls taken from a single plan.
pub const MAX_CALLS_PER_PLAN: usize = 4;

pub const PURCHASES_HELP: &str = "I can look up orders and shipments. Send an order id like \
ORDER-123, a tracking id like TRK-AB12, or ask for \"my orders\".";

/// Result of one executed (or rejected) call, as shown to the planner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub tool: String,
    pub arguments: Value,
    pub ok: bool,
    /// Result document when `ok`, otherwise `{"error": ...}`.
    pub result: Value,
}

impl Observation {
    pub fn success(call: &ToolCall, result: Value) -> Self {
        Self {
            tool: call.tool_name.clone(),
            arguments: call.arguments.clone(),
            ok: true,
            result,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool: call.tool_name.clone(),
            arguments: call.arguments.clone(),
            ok: false,
            result: json!({ "error": error.into() }),
        }
    }
}

/// Everything a planner may look at.
#[derive(Debug, Clone)]
pub struct PlanContext<'a> {
    pub text: &'a str,
    pub history: &'a [HistoryEntry],
    pub last_order_id: Option<String>,
    pub last_tracking_id: Option<String>,
    pub observations: &'a [Observation],
    /// Definitions of the tools allowed in the domain.
    pub tools: &'a [Value],
}

/// A planner's proposal. No calls means the plan is final.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub reply: Option<String>,
}

impl Plan {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            reply: Some(text.into()),
        }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            reply: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait Planner: Send + Sync {
    fn name(&self) -> &str;

    async fn propose(&self, ctx: &PlanContext<'_>) -> Result<Plan, ParleyError>;
}

/// Deterministic planner for order and shipment questions.
///
/// First round: turn the message into lookups. Second round: summarize the
/// observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct RulePlanner;

fn mentions_shipping(lowered: &str) -> bool {
    ["ship", "track", "deliver", "where", "arriv"]
        .iter()
        .any(|w| lowered.contains(w))
}

impl RulePlanner {
    fn first_round(&self, ctx: &PlanContext<'_>) -> Plan {
        let lowered = ctx.text.to_lowercase();

        if let Some(caps) = TRACKING_ID.captures(ctx.text) {
            return Plan::calls(vec![ToolCall::new(
                "get_shipment_by_tracking_id",
                json!({ "tracking_id": caps[1].to_uppercase() }),
            )]);
        }
        if let Some(caps) = ORDER_ID.captures(ctx.text) {
            let order_id = caps[1].to_uppercase();
            let tool = if mentions_shipping(&lowered) {
                "get_shipment_by_order_id"
            } else {
                "get_order"
            };
            return Plan::calls(vec![ToolCall::new(tool, json!({ "order_id": order_id }))]);
        }
        if lowered.contains("my orders") || lowered.contains("recent orders") {
            return Plan::calls(vec![ToolCall::new("list_orders", json!({ "limit": 5 }))]);
        }
        if let Some(order_id) = &ctx.last_order_id {
            if mentions_shipping(&lowered) {
                return Plan::calls(vec![ToolCall::new(
                    "get_shipment_by_order_id",
                    json!({ "order_id": order_id }),
                )]);
            }
            if lowered.contains("status") || lowered.contains("that order") {
                return Plan::calls(vec![ToolCall::new("get_order", json!({ "order_id": order_id }))]);
            }
        }
        if let Some(tracking_id) = &ctx.last_tracking_id
            && mentions_shipping(&lowered)
        {
            return Plan::calls(vec![ToolCall::new(
                "get_shipment_by_tracking_id",
                json!({ "tracking_id": tracking_id }),
            )]);
        }
        Plan::reply(PURCHASES_HELP)
    }
}

#[async_trait]
impl Planner for RulePlanner {
    fn name(&self) -> &str {
        "rules"
    }

    async fn propose(&self, ctx: &PlanContext<'_>) -> Result<Plan, ParleyError> {
        if ctx.observations.is_empty() {
            Ok(self.first_round(ctx))
        } else {
            Ok(Plan::reply(summarize(ctx.observations)))
        }
    }
}

/// Renders observations as a customer-facing reply.
pub fn summarize(observations: &[Observation]) -> String {
    let lines: Vec<String> = observations.iter().map(describe).collect();
    lines.join("\n")
}

fn text<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn describe(obs: &Observation) -> String {
    let subject = text(&obs.arguments, "order_id")
        .or_else(|| text(&obs.arguments, "tracking_id"))
        .unwrap_or("that");
    if !obs.ok {
        let error = text(&obs.result, "error").unwrap_or("unknown error");
        return match obs.tool.as_str() {
            "list_orders" => format!("I couldn't list your orders: {error}."),
            _ => format!("I couldn't find {subject}: {error}."),
        };
    }
    match obs.tool.as_str() {
        "get_order" => {
            let order = &obs.result["order"];
            let id = text(order, "order_id").unwrap_or(subject);
            let status = text(order, "status").unwrap_or("in an unknown state");
            format!("Order {id} is {status}.")
        }
        "list_orders" => {
            let orders = obs.result["orders"].as_array().cloned().unwrap_or_default();
            if orders.is_empty() {
                return "I couldn't find any orders for you.".to_string();
            }
            let items: Vec<String> = orders
                .iter()
                .map(|o| {
                    format!(
                        "{} ({})",
                        text(o, "order_id").unwrap_or("?"),
                        text(o, "status").unwrap_or("unknown")
                    )
                })
                .collect();
            format!("Your recent orders: {}.", items.join(", "))
        }
        "get_shipment_by_order_id" | "get_shipment_by_tracking_id" => {
            let shipment = &obs.result["shipment"];
            let status = text(shipment, "status").unwrap_or("in an unknown state");
            let mut line = match text(shipment, "tracking_id") {
                Some(tracking) => format!("Shipment {tracking} for {subject} is {status}."),
                None => format!("The shipment for {subject} is {status}."),
            };
            if let Some(eta) = text(shipment, "eta") {
                line.push_str(&format!(" Expected delivery: {eta}."));
            }
            line
        }
        "remember_note" => "Noted.".to_string(),
        other => format!("Done: {other}."),
    }
}

const LLM_PLANNER_PROMPT: &str = "You help customers with orders and shipments. \
Answer with a single JSON object {\"tool_calls\": [{\"tool_name\": ..., \"arguments\": {...}}], \"reply\": string|null}. \
Propose tool calls to gather what you need; when the observations answer the question, \
return no tool calls and the reply for the customer. Only use the listed tools.";

/// Planner backed by an LLM provider.
pub struct LlmPlanner {
    provider: Arc<dyn ProviderAdapter>,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn ProviderAdapter>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    fn name(&self) -> &str {
        "llm"
    }

    async fn propose(&self, ctx: &PlanContext<'_>) -> Result<Plan, ParleyError> {
        let history: Vec<Value> = ctx
            .history
            .iter()
            .map(|h| json!({ "role": h.role, "text": h.text }))
            .collect();
        let user = json!({
            "message": ctx.text,
            "history": history,
            "slots": {
                "last_order_id": ctx.last_order_id,
                "last_tracking_id": ctx.last_tracking_id,
            },
            "tools": ctx.tools,
            "observations": ctx.observations,
        });
        let mut request = ProviderRequest::prompt(LLM_PLANNER_PROMPT, user.to_string());
        request.json_mode = true;

        let response = self.provider.complete(request).await?;
        match parse_plan(&response.content) {
            Some(mut plan) => {
                if plan.tool_calls.len() > MAX_CALLS_PER_PLAN {
                    warn!(proposed = plan.tool_calls.len(), "planner proposed too many calls, truncating");
                    plan.tool_calls.truncate(MAX_CALLS_PER_PLAN);
                }
                debug!(calls = plan.tool_calls.len(), model = %response.model, "llm plan received");
                Ok(plan)
            }
            None => {
                warn!(model = %response.model, "llm planner answer is not a plan");
                Ok(Plan::reply(
                    "Sorry, I couldn't work that out. Could you rephrase your question?",
                ))
            }
        }
    }
}

/// Parses a plan, tolerating a fenced code block around the JSON.
pub fn parse_plan(answer: &str) -> Option<Plan> {
    let trimmed = answer.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(body.trim()).ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use parley_core::types::ProviderResponse;
    use parley_core::{AdapterType, HealthStatus, PluginAdapter};

    use super::*;

    fn ctx<'a>(text: &'a str, last_order: Option<&str>, obs: &'a [Observation]) -> PlanContext<'a> {
        PlanContext {
            text,
            history: &[],
            last_order_id: last_order.map(str::to_string),
            last_tracking_id: None,
            observations: obs,
            tools: &[],
        }
    }

    #[tokio::test]
    async fn order_id_becomes_get_order() {
        let plan = RulePlanner.propose(&ctx("ORDER-100", None, &[])).await.unwrap();
        assert_eq!(
            plan.tool_calls,
            vec![ToolCall::new("get_order", json!({"order_id": "ORDER-100"}))]
        );
    }

    #[tokio::test]
    async fn shipping_question_uses_shipment_lookup() {
        let plan = RulePlanner
            .propose(&ctx("where is order-7 being shipped?", None, &[]))
            .await
            .unwrap();
        assert_eq!(plan.tool_calls[0].tool_name, "get_shipment_by_order_id");

        let plan = RulePlanner
            .propose(&ctx("track TRK-AB12 please", None, &[]))
            .await
            .unwrap();
        assert_eq!(plan.tool_calls[0].arguments["tracking_id"], "TRK-AB12");
    }

    #[tokio::test]
    async fn follow_up_uses_last_order_slot() {
        let plan = RulePlanner
            .propose(&ctx("when will it arrive?", Some("ORDER-100"), &[]))
            .await
            .unwrap();
        assert_eq!(
            plan.tool_calls,
            vec![ToolCall::new(
                "get_shipment_by_order_id",
                json!({"order_id": "ORDER-100"})
            )]
        );
    }

    #[tokio::test]
    async fn unknown_request_gets_help() {
        let plan = RulePlanner.propose(&ctx("hi", None, &[])).await.unwrap();
        assert!(plan.is_final());
        assert_eq!(plan.reply.as_deref(), Some(PURCHASES_HELP));
    }

    #[tokio::test]
    async fn second_round_summarizes() {
        let call = ToolCall::new("get_order", json!({"order_id": "ORDER-100"}));
        let obs = vec![Observation::success(
            &call,
            json!({"ok": true, "order": {"order_id": "ORDER-100", "status": "shipped"}}),
        )];
        let plan = RulePlanner.propose(&ctx("ORDER-100", None, &obs)).await.unwrap();
        assert_eq!(plan.reply.as_deref(), Some("Order ORDER-100 is shipped."));
    }

    #[test]
    fn failures_and_lists_are_described() {
        let call = ToolCall::new("get_order", json!({"order_id": "ORDER-9"}));
        assert_eq!(
            summarize(&[Observation::failure(&call, "order not found")]),
            "I couldn't find ORDER-9: order not found."
        );
        let list = ToolCall::new("list_orders", json!({"limit": 5}));
        let obs = Observation::success(
            &list,
            json!({"orders": [{"order_id": "ORDER-1", "status": "delivered"}]}),
        );
        assert_eq!(summarize(&[obs]), "Your recent orders: ORDER-1 (delivered).");
    }

    #[test]
    fn parse_plan_accepts_fenced_json() {
        let plan = parse_plan("```json\n{\"tool_calls\": [], \"reply\": \"hi\"}\n```").unwrap();
        assert_eq!(plan.reply.as_deref(), Some("hi"));
        assert!(parse_plan("not json").is_none());
    }

    struct Scripted {
        answers: Mutex<Vec<String>>,
        prompts: Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait]
    impl PluginAdapter for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn adapter_type(&self) -> AdapterType {
            AdapterType::Provider
        }

        async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl ProviderAdapter for Scripted {
        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ParleyError> {
            self.prompts.lock().unwrap().push(request);
            let content = self.answers.lock().unwrap().remove(0);
            Ok(ProviderResponse {
                content,
                model: "scripted".into(),
            })
        }
    }

    #[tokio::test]
    async fn llm_planner_parses_and_truncates_calls() {
        let calls: Vec<Value> = (0..6)
            .map(|i| json!({"tool_name": "get_order", "arguments": {"order_id": format!("ORDER-{i}")}}))
            .collect();
        let provider = Arc::new(Scripted {
            answers: Mutex::new(vec![json!({"tool_calls": calls, "reply": null}).to_string()]),
            prompts: Mutex::new(Vec::new()),
        });
        let planner = LlmPlanner::new(provider.clone());
        let plan = planner.propose(&ctx("ORDER-1", None, &[])).await.unwrap();
        assert_eq!(plan.tool_calls.len(), MAX_CALLS_PER_PLAN);

        let prompts = provider.prompts.lock().unwrap();
        assert!(prompts[0].json_mode);
        assert!(prompts[0].messages[0].content.contains("ORDER-1"));
    }

    #[tokio::test]
    async fn llm_planner_garbage_answer_is_a_final_reply() {
        let provider = Arc::new(Scripted {
            answers: Mutex::new(vec!["I think you should call get_order".into()]),
            prompts: Mutex::new(Vec::new()),
        });
        let plan = LlmPlanner::new(provider).propose(&ctx("x", None, &[])).await.unwrap();
        assert!(plan.is_final());
        assert!(plan.reply.is_some());
    }
}
