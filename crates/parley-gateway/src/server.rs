// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use dashmap::DashMap;
use parley_core::ParleyError;
use parley_orchestrator::Runtime;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, ChannelGateway, auth_middleware, channel_gateways};
use crate::handlers;
use crate::ws;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub runtime: Runtime,
    pub auth: AuthConfig,
    /// Inbound channel gateways, keyed by channel name.
    pub channels: Arc<BTreeMap<String, ChannelGateway>>,
    /// Open WebSocket connections per session id.
    pub ws_sessions: Arc<DashMap<String, usize>>,
    pub start_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(runtime: Runtime) -> Self {
        let auth = AuthConfig {
            bearer_token: runtime.config.server.bearer_token.clone(),
        };
        let channels = Arc::new(channel_gateways(&runtime.config.channels));
        Self {
            runtime,
            auth,
            channels,
            ws_sessions: Arc::new(DashMap::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Project for requests that do not name one.
    pub fn default_project(&self) -> &str {
        self.runtime.orchestrator.default_project_id()
    }
}

/// Builds the application router.
///
/// - `GET /health` (public)
/// - `POST /channels/{channel}/gateway/inbound` (HMAC per channel)
/// - conversation, job, memory and WebSocket routes (bearer when configured)
pub fn router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route(
            "/channels/{channel}/gateway/inbound",
            post(handlers::post_channel_inbound),
        )
        .with_state(state.clone());

    let api_routes = Router::new()
        .route(
            "/conversations/{conversation_id}/messages",
            post(handlers::post_message),
        )
        .route(
            "/async/conversations/{conversation_id}/messages",
            post(handlers::post_async_message),
        )
        .route("/conversations/{conversation_id}", get(handlers::get_conversation))
        .route("/jobs/{job_id}", get(handlers::get_job))
        .route(
            "/memory",
            get(handlers::get_memory).delete(handlers::delete_memory),
        )
        .route("/ws", get(ws::ws_handler))
        .route_layer(axum_middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds `host:port` and serves until `shutdown` is cancelled.
pub async fn start_server(
    host: &str,
    port: u16,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), ParleyError> {
    let app = router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ParleyError::Config(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| ParleyError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
