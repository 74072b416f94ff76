// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! External domain hook adapter.
//!
//! A hook is an HTTP endpoint answering `POST {action, payload}` with
//! `{ok, order?, orders?, shipment?, error?}`. When a secret is configured the
//! raw body is signed with the same timestamp + HMAC headers used for inbound
//! webhooks. [`HookClient`] makes exactly one attempt per call; retries belong
//! to the [`ToolGateway`](crate::gateway::ToolGateway).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::HookConfig;
use parley_core::{Clock, ParleyError};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Serialize)]
struct HookRequest<'a> {
    action: &'a str,
    payload: &'a Value,
}

/// Decoded hook answer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HookResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HookResponse {
    fn refused(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Signed JSON client for one hook endpoint.
pub struct HookClient {
    name: String,
    client: reqwest::Client,
    url: String,
    secret: Option<String>,
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl HookClient {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        secret: Option<String>,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Config(format!("failed to build hook HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            client,
            url: url.into(),
            secret,
            timeout,
            clock,
        })
    }

    /// Client for a configured hook, `None` when no URL is set.
    pub fn from_config(
        name: &str,
        config: &HookConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Option<Self>, ParleyError> {
        config
            .url
            .as_ref()
            .map(|url| {
                Self::new(
                    name,
                    url.clone(),
                    config.secret.clone(),
                    Duration::from_millis(config.timeout_ms),
                    clock,
                )
            })
            .transpose()
    }

    /// Sends one action.
    ///
    /// Timeouts, connection failures and 429/5xx answers are transient
    /// adapter errors. Any other non-success status is a definitive refusal
    /// and comes back as `ok: false`.
    pub async fn call(&self, action: &str, payload: &Value) -> Result<HookResponse, ParleyError> {
        let body = serde_json::to_vec(&HookRequest { action, payload })
            .map_err(|e| ParleyError::Internal(format!("hook request encoding: {e}")))?;

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(secret) = &self.secret {
            for (name, value) in parley_security::signed_headers(secret, &body, self.clock.now()) {
                request = request.header(name, value);
            }
        }

        let response = request.body(body).send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        debug!(hook = %self.name, action, status = %status, "hook answered");
        let text = response.text().await.map_err(|e| self.classify(e))?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| ParleyError::AdapterUnavailable {
                adapter: self.name.clone(),
                message: format!("malformed hook response: {e}"),
            });
        }
        if matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504) {
            return Err(ParleyError::AdapterUnavailable {
                adapter: self.name.clone(),
                message: format!("hook returned {status}"),
            });
        }
        Ok(serde_json::from_str::<HookResponse>(&text)
            .ok()
            .filter(|r| !r.ok)
            .unwrap_or_else(|| HookResponse::refused(format!("hook returned {status}"))))
    }

    fn classify(&self, e: reqwest::Error) -> ParleyError {
        if e.is_timeout() {
            ParleyError::AdapterTimeout {
                adapter: self.name.clone(),
                duration: self.timeout,
            }
        } else {
            ParleyError::AdapterUnavailable {
                adapter: self.name.clone(),
                message: e.to_string(),
            }
        }
    }
}

/// Order and shipment lookups served by the purchases hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    GetOrder,
    ListOrders,
    GetShipmentByOrderId,
    GetShipmentByTrackingId,
}

impl HookAction {
    pub const ALL: [HookAction; 4] = [
        HookAction::GetOrder,
        HookAction::ListOrders,
        HookAction::GetShipmentByOrderId,
        HookAction::GetShipmentByTrackingId,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HookAction::GetOrder => "get_order",
            HookAction::ListOrders => "list_orders",
            HookAction::GetShipmentByOrderId => "get_shipment_by_order_id",
            HookAction::GetShipmentByTrackingId => "get_shipment_by_tracking_id",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            HookAction::GetOrder => "Look up one order by its id",
            HookAction::ListOrders => "List the customer's recent orders",
            HookAction::GetShipmentByOrderId => "Shipment status for an order id",
            HookAction::GetShipmentByTrackingId => "Shipment status for a tracking id",
        }
    }

    fn schema(&self) -> Value {
        let id = json!({ "type": "string", "minLength": 1, "maxLength": 64 });
        match self {
            HookAction::GetOrder | HookAction::GetShipmentByOrderId => json!({
                "type": "object",
                "properties": { "order_id": id },
                "required": ["order_id"]
            }),
            HookAction::ListOrders => json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "minimum": 1, "maximum": 20 }
                }
            }),
            HookAction::GetShipmentByTrackingId => json!({
                "type": "object",
                "properties": { "tracking_id": id },
                "required": ["tracking_id"]
            }),
        }
    }
}

/// A [`Tool`] forwarding one [`HookAction`] to a hook.
pub struct HookTool {
    action: HookAction,
    client: Arc<HookClient>,
}

impl HookTool {
    pub fn new(action: HookAction, client: Arc<HookClient>) -> Self {
        Self { action, client }
    }

    /// One tool per purchases action, all sharing `client`.
    pub fn purchases(client: Arc<HookClient>) -> Vec<Arc<dyn Tool>> {
        HookAction::ALL
            .into_iter()
            .map(|action| Arc::new(HookTool::new(action, Arc::clone(&client))) as Arc<dyn Tool>)
            .collect()
    }
}

#[async_trait]
impl Tool for HookTool {
    fn name(&self) -> &str {
        self.action.name()
    }

    fn description(&self) -> &str {
        self.action.description()
    }

    fn parameters_schema(&self) -> Value {
        self.action.schema()
    }

    async fn invoke(&self, ctx: &ToolContext, mut args: Value) -> Result<ToolOutput, ParleyError> {
        if self.action == HookAction::ListOrders
            && let Value::Object(map) = &mut args
        {
            map.insert("customer_id".into(), Value::String(ctx.customer_id.clone()));
        }
        let response = self.client.call(self.action.name(), &args).await?;
        if !response.ok {
            return Ok(ToolOutput::error(
                response.error.unwrap_or_else(|| "not found".to_string()),
            ));
        }
        let content = serde_json::to_value(&response)
            .map_err(|e| ParleyError::Internal(format!("hook result encoding: {e}")))?;
        Ok(ToolOutput::ok(content))
    }
}
