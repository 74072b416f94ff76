// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across adapter traits and the Parley runtime.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Business domain a conversation can be routed to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Bookings,
    Purchases,
    Claims,
}

impl Domain {
    /// Short human label used in menus and clarification replies.
    pub fn label(&self) -> &'static str {
        match self {
            Domain::Bookings => "Bookings (schedule or cancel an appointment)",
            Domain::Purchases => "Purchases (orders and shipments)",
            Domain::Claims => "Claims (report a problem with an order)",
        }
    }
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Adapter is fully operational.
    Healthy,
    /// Adapter is operational but experiencing issues.
    Degraded(String),
    /// Adapter is not operational.
    Unhealthy(String),
}

/// Identifies the kind of external adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    Provider,
    Embedding,
    Storage,
    Hook,
}

/// A proposed tool invocation, from a fixed stage or from a planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

// --- Provider types ---

/// Role of a message sent to an LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
}

/// A single message in a provider request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: String,
}

/// A request to an LLM provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system: Option<String>,
    pub messages: Vec<ProviderMessage>,
    pub max_tokens: u32,
    /// Ask the provider to answer with a single JSON object.
    pub json_mode: bool,
}

impl ProviderRequest {
    /// Single user prompt with a system instruction.
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![ProviderMessage {
                role: ProviderRole::User,
                content: user.into(),
            }],
            max_tokens: 512,
            json_mode: false,
        }
    }
}

/// A response from an LLM provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: String,
    pub model: String,
}

// --- Embedding types ---

/// Input for embedding generation.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub texts: Vec<String>,
}

/// Output from embedding generation, one vector per input text.
#[derive(Debug, Clone)]
pub struct EmbeddingOutput {
    pub embeddings: Vec<Vec<f32>>,
    pub dimensions: usize,
}
