// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway REST API.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use parley_core::{
    CallbackConfig, CustomerKey, HealthStatus, InboundEvent, Job, JobResult, JobStatus, TurnReply,
    conversation_id_for,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{ApiError, ErrorResponse};
use crate::server::GatewayState;

/// Header naming the project of a request; absent means the default project.
pub const PROJECT_HEADER: &str = "x-project-id";
/// Header naming the customer whose memory is addressed.
pub const CUSTOMER_HEADER: &str = "x-customer-id";

/// Request body for `POST /conversations/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub text: String,
    /// Idempotency key; generated when absent.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

/// Request body for `POST /async/conversations/{id}/messages`.
#[derive(Debug, Deserialize)]
pub struct AsyncMessageRequest {
    #[serde(flatten)]
    pub message: MessageRequest,
    #[serde(default)]
    pub callback: Option<CallbackConfig>,
}

/// Request body of a channel gateway webhook.
#[derive(Debug, Deserialize)]
pub struct ChannelInbound {
    pub message_id: String,
    pub from_number: String,
    pub text: String,
    pub timestamp_iso: String,
    #[serde(default)]
    pub customer_name: Option<String>,
}

/// Response body of a channel gateway webhook.
#[derive(Debug, Serialize)]
pub struct ChannelReply {
    pub conversation_id: String,
    pub message_id: String,
    pub response_text: String,
}

/// Public view of a job. The input and callback settings stay internal.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub callback_attempts: u32,
    pub callback_delivered: bool,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            result: job.result,
            created_at: job.created_at,
            completed_at: job.completed_at,
            callback_attempts: job.callback_attempts,
            callback_delivered: job.callback_delivered,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn project_id(state: &GatewayState, headers: &HeaderMap) -> String {
    header(headers, PROJECT_HEADER)
        .unwrap_or_else(|| state.default_project())
        .to_string()
}

fn not_found(what: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse { error: what.into() }),
    )
        .into_response()
}

/// Builds the inbound event for an API message.
fn api_event(
    state: &GatewayState,
    conversation_id: String,
    headers: &HeaderMap,
    body: MessageRequest,
) -> Result<InboundEvent, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::validation("text must not be empty"));
    }
    if conversation_id.trim().is_empty() {
        return Err(ApiError::validation("conversation id must not be empty"));
    }
    Ok(InboundEvent {
        message_id: body
            .message_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        conversation_id,
        project_id: project_id(state, headers),
        customer_id: body.customer_id,
        customer_name: body.customer_name,
        text: body.text,
        received_at: state.runtime.clock.now(),
    })
}

/// POST /conversations/{conversation_id}/messages
pub async fn post_message(
    State(state): State<GatewayState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<MessageRequest>,
) -> Result<Json<TurnReply>, ApiError> {
    let event = api_event(&state, conversation_id, &headers, body)?;
    let reply = state.runtime.orchestrator.handle_turn(event).await?;
    Ok(Json(reply))
}

/// POST /async/conversations/{conversation_id}/messages
pub async fn post_async_message(
    State(state): State<GatewayState>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AsyncMessageRequest>,
) -> Result<Response, ApiError> {
    if let Some(callback) = &body.callback
        && !(callback.url.starts_with("http://") || callback.url.starts_with("https://"))
    {
        return Err(ApiError::validation("callback.url must be an http(s) URL"));
    }
    let event = api_event(&state, conversation_id, &headers, body.message)?;
    let job_id = state.runtime.jobs.submit(event, body.callback).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "job_id": job_id }))).into_response())
}

/// GET /jobs/{job_id}
pub async fn get_job(
    State(state): State<GatewayState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    let job = state.runtime.jobs.poll(&job_id).await?;
    Ok(Json(JobView::from(job)))
}

/// GET /conversations/{conversation_id}
pub async fn get_conversation(
    State(state): State<GatewayState>,
    Path(conversation_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.runtime.orchestrator.conversation(&conversation_id).await? {
        Some(conversation) => Ok(Json(conversation).into_response()),
        None => Ok(not_found(format!("conversation not found: {conversation_id}"))),
    }
}

/// POST /channels/{channel}/gateway/inbound
///
/// The signature covers the raw body, so it is checked before parsing.
pub async fn post_channel_inbound(
    State(state): State<GatewayState>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(gateway) = state.channels.get(&channel) else {
        return Ok(not_found(format!("unknown channel: {channel}")));
    };
    let now = state.runtime.clock.now();
    if let Err(e) = gateway.verify(&headers, &body, now) {
        tracing::warn!(channel = %channel, error = %e, "inbound signature rejected");
        return Err(e.into());
    }

    let inbound: ChannelInbound = serde_json::from_slice(&body)
        .map_err(|e| ApiError::validation(format!("invalid inbound body: {e}")))?;
    if inbound.text.trim().is_empty() || inbound.from_number.trim().is_empty() {
        return Err(ApiError::validation("from_number and text must not be empty"));
    }
    let received_at = DateTime::parse_from_rfc3339(&inbound.timestamp_iso)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now);

    let event = InboundEvent {
        message_id: inbound.message_id,
        conversation_id: conversation_id_for(&channel, &inbound.from_number),
        project_id: gateway
            .project_id
            .clone()
            .unwrap_or_else(|| state.default_project().to_string()),
        customer_id: Some(inbound.from_number),
        customer_name: inbound.customer_name,
        text: inbound.text,
        received_at,
    };
    let reply = state.runtime.orchestrator.handle_turn(event).await?;
    Ok(Json(ChannelReply {
        conversation_id: reply.conversation_id,
        message_id: reply.message_id,
        response_text: reply.response_text,
    })
    .into_response())
}

fn customer_key(state: &GatewayState, headers: &HeaderMap) -> Result<CustomerKey, ApiError> {
    let customer = header(headers, CUSTOMER_HEADER)
        .ok_or_else(|| ApiError::validation(format!("missing {CUSTOMER_HEADER} header")))?;
    Ok(CustomerKey::new(project_id(state, headers), customer))
}

/// GET /memory
pub async fn get_memory(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = customer_key(&state, &headers)?;
    let snapshot = state.runtime.memory.snapshot(&key).await?;
    Ok(Json(snapshot).into_response())
}

/// DELETE /memory
pub async fn delete_memory(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let key = customer_key(&state, &headers)?;
    let cleared = state.runtime.memory.clear(&key).await?;
    tracing::info!(
        project_id = %key.project_id,
        slots = cleared.slots,
        vectors = cleared.vectors,
        "customer memory cleared"
    );
    Ok(Json(cleared).into_response())
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub storage: String,
    pub uptime_secs: u64,
    pub websocket_sessions: usize,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    let (status, storage) = match state.runtime.stores.engine.health_check().await {
        Ok(HealthStatus::Healthy) => ("ok", "healthy".to_string()),
        Ok(HealthStatus::Degraded(reason)) => ("ok", format!("degraded: {reason}")),
        Ok(HealthStatus::Unhealthy(reason)) => ("degraded", format!("unhealthy: {reason}")),
        Err(e) => ("degraded", format!("unhealthy: {e}")),
    };
    Json(HealthResponse {
        status,
        storage,
        uptime_secs: state.start_time.elapsed().as_secs(),
        websocket_sessions: state.ws_sessions.iter().map(|e| *e.value()).sum(),
    })
}
