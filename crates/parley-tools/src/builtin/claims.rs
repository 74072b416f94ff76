// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process claim intake.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parley_core::ParleyError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::tool::{Tool, ToolContext, ToolOutput};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub customer_id: String,
    pub order_id: String,
    pub description: String,
    pub status: String,
}

#[derive(Default)]
struct Intake {
    claims: Vec<Claim>,
    by_request: HashMap<String, usize>,
}

/// Files claims as `CL-1`, `CL-2`, ... One claim per request key.
#[derive(Default)]
pub struct ClaimDesk {
    intake: Mutex<Intake>,
}

impl ClaimDesk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, ctx: &ToolContext, order_id: &str, description: &str) -> Claim {
        let mut intake = self.intake.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(&idx) = intake.by_request.get(&ctx.request_key) {
            return intake.claims[idx].clone();
        }
        let claim = Claim {
            claim_id: format!("CL-{}", intake.claims.len() + 1),
            customer_id: ctx.customer_id.clone(),
            order_id: order_id.to_string(),
            description: description.to_string(),
            status: "open".to_string(),
        };
        let idx = intake.claims.len();
        intake.claims.push(claim.clone());
        intake.by_request.insert(ctx.request_key.clone(), idx);
        info!(claim_id = %claim.claim_id, order_id, "claim opened");
        claim
    }

    /// Claims filed by one customer, oldest first.
    pub fn for_customer(&self, customer_id: &str) -> Vec<Claim> {
        let intake = self.intake.lock().unwrap_or_else(|e| e.into_inner());
        intake
            .claims
            .iter()
            .filter(|c| c.customer_id == customer_id)
            .cloned()
            .collect()
    }
}

pub struct OpenClaimTool {
    desk: Arc<ClaimDesk>,
}

impl OpenClaimTool {
    pub fn new(desk: Arc<ClaimDesk>) -> Self {
        Self { desk }
    }
}

#[async_trait]
impl Tool for OpenClaimTool {
    fn name(&self) -> &str {
        "open_claim"
    }

    fn description(&self) -> &str {
        "File a claim about an order"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "order_id": { "type": "string", "minLength": 1, "maxLength": 64 },
                "description": { "type": "string", "minLength": 3, "maxLength": 2000 }
            },
            "required": ["order_id", "description"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
        let claim = self.desk.open(
            ctx,
            args["order_id"].as_str().unwrap_or_default(),
            args["description"].as_str().unwrap_or_default(),
        );
        let claim = serde_json::to_value(&claim)
            .map_err(|e| ParleyError::Internal(format!("claim encoding: {e}")))?;
        Ok(ToolOutput::ok(json!({ "claim": claim })))
    }
}
