// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector-memory tools: `remember_note` and `recall_notes`.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::ParleyError;
use parley_memory::CustomerMemory;
use serde_json::{Value, json};

use crate::tool::{Tool, ToolContext, ToolOutput};

pub struct RememberNoteTool {
    memory: Arc<CustomerMemory>,
}

impl RememberNoteTool {
    pub fn new(memory: Arc<CustomerMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RememberNoteTool {
    fn name(&self) -> &str {
        "remember_note"
    }

    fn description(&self) -> &str {
        "Store a short fact about the customer for later recall"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "minLength": 1, "maxLength": 2000 }
            },
            "required": ["text"]
        })
    }

    // Each call appends a new entry.
    fn is_idempotent(&self) -> bool {
        false
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
        let text = args["text"].as_str().unwrap_or_default();
        let id = self
            .memory
            .remember(
                &ctx.customer_key(),
                text,
                json!({ "source": "note", "conversation_id": ctx.conversation_id }),
            )
            .await?;
        Ok(ToolOutput::ok(json!({ "id": id })))
    }
}

pub struct RecallNotesTool {
    memory: Arc<CustomerMemory>,
}

impl RecallNotesTool {
    pub fn new(memory: Arc<CustomerMemory>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RecallNotesTool {
    fn name(&self) -> &str {
        "recall_notes"
    }

    fn description(&self) -> &str {
        "Find stored facts about the customer similar to a query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1 },
                "top_k": { "type": "integer", "minimum": 1, "maximum": 20 }
            },
            "required": ["query"]
        })
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
        let query = args["query"].as_str().unwrap_or_default();
        let top_k = args["top_k"].as_u64().map(|k| k as usize);
        let hits = self.memory.recall(&ctx.customer_key(), query, top_k).await?;
        let notes: Vec<Value> = hits
            .into_iter()
            .map(|hit| {
                json!({
                    "text": hit.entry.text,
                    "score": hit.score,
                    "created_at": hit.entry.created_at,
                })
            })
            .collect();
        Ok(ToolOutput::ok(json!({ "notes": notes })))
    }
}
