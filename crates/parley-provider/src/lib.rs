// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM and embedding provider adapters for the Parley orchestration engine.
//!
//! Both adapters speak the OpenAI-compatible HTTP contract: `chat/completions`
//! for [`ProviderAdapter`] and `embeddings` for [`EmbeddingAdapter`]. The
//! runtime only consumes their request/response shape.

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::ProviderConfig;
use parley_core::types::{
    EmbeddingInput, EmbeddingOutput, ProviderRequest, ProviderResponse, ProviderRole,
};
use parley_core::{AdapterType, EmbeddingAdapter, HealthStatus, ParleyError, PluginAdapter, ProviderAdapter};
use tracing::{debug, info};

use crate::client::ApiClient;
use crate::types::{ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ResponseFormat};

fn client_from_config(config: &ProviderConfig) -> Result<Option<ApiClient>, ParleyError> {
    let Some(base_url) = config.base_url.as_deref() else {
        return Ok(None);
    };
    ApiClient::new(
        base_url,
        config.api_key.as_deref(),
        Duration::from_millis(config.timeout_ms),
        config.max_retries,
    )
    .map(Some)
}

/// Chat completion provider implementing [`ProviderAdapter`].
pub struct OpenAiProvider {
    client: ApiClient,
    model: String,
}

impl OpenAiProvider {
    /// Builds the provider, or `None` when `provider.base_url` is unset.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>, ParleyError> {
        let Some(client) = client_from_config(config)? else {
            return Ok(None);
        };
        info!(model = %config.model, base_url = client.base_url(), "LLM provider initialized");
        Ok(Some(Self::with_client(client, config.model.clone())))
    }

    pub fn with_client(client: ApiClient, model: String) -> Self {
        Self { client, model }
    }

    fn to_chat_request(&self, request: &ProviderRequest) -> ChatRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m| ChatMessage {
            role: role_name(m.role).into(),
            content: m.content.clone(),
        }));
        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then(|| ResponseFormat {
                type_: "json_object".into(),
            }),
        }
    }
}

fn role_name(role: ProviderRole) -> &'static str {
    match role {
        ProviderRole::System => "system",
        ProviderRole::User => "user",
        ProviderRole::Assistant => "assistant",
    }
}

#[async_trait]
impl PluginAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai-chat"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Provider
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ParleyError> {
        let body = self.to_chat_request(&request);
        let response: ChatResponse = self.client.post_json("chat/completions", &body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ParleyError::Provider {
                message: "completion returned no choices".into(),
                source: None,
            })?;
        debug!(model = %response.model, chars = content.len(), "completion received");
        Ok(ProviderResponse {
            content,
            model: if response.model.is_empty() {
                self.model.clone()
            } else {
                response.model
            },
        })
    }
}

/// Remote embedding provider implementing [`EmbeddingAdapter`].
pub struct OpenAiEmbedder {
    client: ApiClient,
    model: String,
}

impl OpenAiEmbedder {
    /// Builds the embedder, or `None` when `provider.base_url` is unset.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>, ParleyError> {
        let Some(client) = client_from_config(config)? else {
            return Ok(None);
        };
        info!(model = %config.embedding_model, "embedding provider initialized");
        Ok(Some(Self::with_client(client, config.embedding_model.clone())))
    }

    pub fn with_client(client: ApiClient, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl PluginAdapter for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai-embeddings"
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, ParleyError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl EmbeddingAdapter for OpenAiEmbedder {
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, ParleyError> {
        let expected = input.texts.len();
        let body = EmbeddingRequest {
            model: self.model.clone(),
            input: input.texts,
        };
        let mut response: EmbeddingResponse = self.client.post_json("embeddings", &body).await?;
        if response.data.len() != expected {
            return Err(ParleyError::Provider {
                message: format!(
                    "embedding count mismatch: sent {expected}, got {}",
                    response.data.len()
                ),
                source: None,
            });
        }
        response.data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}
