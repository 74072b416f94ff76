// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket gateway for the Parley engine.
//!
//! Exposes synchronous and asynchronous turn submission, job polling,
//! customer memory inspection, signed channel webhooks and web chat over
//! WebSocket. Every route funnels into the same
//! [`Orchestrator`](parley_orchestrator::Orchestrator) turn pipeline.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod ws;

pub use error::ApiError;
pub use server::{GatewayState, router, start_server};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{DateTime, TimeZone, Utc};
    use parley_config::ParleyConfig;
    use parley_config::model::ChannelConfig;
    use parley_core::ManualClock;
    use parley_orchestrator::{Adapters, Runtime};
    use parley_storage::Stores;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn state_with(config: ParleyConfig) -> GatewayState {
        let adapters = Adapters::offline(&config);
        let clock = Arc::new(ManualClock::new(now()));
        let runtime = Runtime::assemble(config, Stores::in_memory(), adapters, clock).unwrap();
        GatewayState::new(runtime)
    }

    fn state() -> GatewayState {
        state_with(ParleyConfig::default())
    }

    async fn send(state: &GatewayState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = send(&state(), Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "healthy");
    }

    #[tokio::test]
    async fn message_runs_a_turn() {
        let state = state();
        let (status, body) = send(
            &state,
            post_json(
                "/conversations/web:s1/messages",
                json!({"text": "menu", "message_id": "m1"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversation_id"], "web:s1");
        assert_eq!(body["message_id"], "m1");
        assert_eq!(body["version"], 1);
        assert!(body["response_text"].as_str().unwrap().contains("BOOK"));

        let (status, conversation) = send(
            &state,
            Request::get("/conversations/web:s1").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conversation["version"], 1);
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let (status, body) = send(
            &state(),
            post_json("/conversations/web:s1/messages", json!({"text": "   "})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("text"));
    }

    #[tokio::test]
    async fn missing_resources_are_404() {
        let state = state();
        let (status, _) = send(&state, Request::get("/jobs/job_nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &state,
            Request::get("/conversations/web:nobody").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(
            &state,
            post_json(
                "/channels/telegram/gateway/inbound",
                json!({"message_id": "w1", "from_number": "+1", "text": "hi", "timestamp_iso": "2025-01-15T09:00:00Z"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn async_message_is_accepted_as_job() {
        let state = state();
        let (status, body) = send(
            &state,
            post_json("/async/conversations/web:s1/messages", json!({"text": "menu"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().unwrap().to_string();
        assert!(job_id.starts_with("job_"));

        let (status, job) = send(
            &state,
            Request::get(format!("/jobs/{job_id}")).body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["status"], "pending");
        assert!(job.get("input").is_none());
    }

    #[tokio::test]
    async fn async_callback_url_must_be_http() {
        let (status, _) = send(
            &state(),
            post_json(
                "/async/conversations/web:s1/messages",
                json!({"text": "menu", "callback": {"url": "ftp://example.com"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn bearer_token_guards_api_routes() {
        let mut config = ParleyConfig::default();
        config.server.bearer_token = Some("tok".into());
        let state = state_with(config);

        let (status, _) = send(
            &state,
            post_json("/conversations/web:s1/messages", json!({"text": "menu"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut request = post_json("/conversations/web:s1/messages", json!({"text": "menu"}));
        request
            .headers_mut()
            .insert("authorization", "Bearer tok".parse().unwrap());
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&state, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn signed_channel_inbound() {
        let mut config = ParleyConfig::default();
        config.channels.insert(
            "whatsapp".into(),
            ChannelConfig {
                secret: Some("wa-secret".into()),
                ..ChannelConfig::default()
            },
        );
        let state = state_with(config);
        let body = json!({
            "message_id": "wamid.1",
            "from_number": "+15550001",
            "text": "menu",
            "timestamp_iso": "2025-01-15T09:00:00Z",
            "customer_name": "Ana"
        })
        .to_string();

        let unsigned = post_json("/channels/whatsapp/gateway/inbound", serde_json::from_str(&body).unwrap());
        let (status, _) = send(&state, unsigned).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let mut builder = Request::post("/channels/whatsapp/gateway/inbound")
            .header("content-type", "application/json");
        for (name, value) in parley_security::signed_headers("wa-secret", body.as_bytes(), now()) {
            builder = builder.header(name, value);
        }
        let (status, reply) = send(&state, builder.body(Body::from(body)).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["conversation_id"], "whatsapp:+15550001");
        assert_eq!(reply["message_id"], "wamid.1");
        assert!(reply["response_text"].as_str().unwrap().contains("BOOK"));
    }

    #[tokio::test]
    async fn memory_requires_customer_header() {
        let state = state();
        let (status, _) = send(&state, Request::get("/memory").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &state,
            Request::delete("/memory")
                .header(handlers::CUSTOMER_HEADER, "c1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["slots"], 0);
        assert_eq!(body["vectors"], 0);
    }
}
