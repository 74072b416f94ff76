// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turn pipeline tests against in-memory stores and a mock domain hook.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parley_config::ParleyConfig;
use parley_core::{Domain, InboundEvent, JobResult, JobStatus, ManualClock, Role};
use parley_flow::TRY_AGAIN;
use parley_orchestrator::{Adapters, Runtime};
use parley_storage::Stores;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runtime(hook_url: Option<String>) -> Runtime {
    let mut config = ParleyConfig::default();
    config.hooks.purchases.url = hook_url;
    config.hooks.purchases.backoff_ms = 1;
    let adapters = Adapters::offline(&config);
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
    ));
    Runtime::assemble(config, Stores::in_memory(), adapters, clock).unwrap()
}

fn event(message_id: &str, text: &str) -> InboundEvent {
    InboundEvent {
        message_id: message_id.into(),
        conversation_id: "web:s1".into(),
        project_id: "default".into(),
        customer_id: Some("c1".into()),
        customer_name: None,
        text: text.into(),
        received_at: Utc::now(),
    }
}

async fn order_hook(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"action": "get_order"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "ok": true,
                    "order": {"order_id": "ORDER-100", "status": "shipped"}
                }))
                .set_delay(delay),
        )
        .expect(1)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn order_lookup_replays_without_second_hook_call() {
    let hook = order_hook(Duration::ZERO).await;
    let rt = runtime(Some(hook.uri()));

    let first = rt.orchestrator.handle_turn(event("m1", "ORDER-100")).await.unwrap();
    assert_eq!(first.response_text, "Order ORDER-100 is shipped.");
    assert_eq!(first.domain, Some(Domain::Purchases));
    assert_eq!(first.version, 1);

    let replay = rt.orchestrator.handle_turn(event("m1", "ORDER-100")).await.unwrap();
    assert_eq!(replay, first);

    let stored = rt.orchestrator.conversation("web:s1").await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.history.len(), 2);
    assert_eq!(stored.history[0].role, Role::User);
    assert_eq!(stored.active_domain, Some(Domain::Purchases));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_duplicates_share_one_execution() {
    let hook = order_hook(Duration::from_millis(100)).await;
    let rt = runtime(Some(hook.uri()));

    let a = {
        let orchestrator = Arc::clone(&rt.orchestrator);
        tokio::spawn(async move { orchestrator.handle_turn(event("m1", "ORDER-100")).await })
    };
    let b = {
        let orchestrator = Arc::clone(&rt.orchestrator);
        tokio::spawn(async move { orchestrator.handle_turn(event("m1", "ORDER-100")).await })
    };
    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();
    assert_eq!(a, b);
    assert_eq!(
        rt.orchestrator.conversation("web:s1").await.unwrap().unwrap().version,
        1
    );
}

#[tokio::test]
async fn version_counts_committed_turns() {
    let rt = runtime(None);
    for (i, text) in ["hello", "menu", "BOOK"].into_iter().enumerate() {
        let reply = rt
            .orchestrator
            .handle_turn(event(&format!("m{i}"), text))
            .await
            .unwrap();
        assert_eq!(reply.version, i as u64 + 1);
    }
    let stored = rt.orchestrator.conversation("web:s1").await.unwrap().unwrap();
    assert_eq!(stored.version, 3);
    assert_eq!(stored.active_domain, Some(Domain::Bookings));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_turns_on_one_conversation_both_commit() {
    let rt = runtime(None);
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let orchestrator = Arc::clone(&rt.orchestrator);
            tokio::spawn(async move { orchestrator.handle_turn(event(&format!("m{i}"), "menu")).await })
        })
        .collect();
    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.unwrap().unwrap().version);
    }
    versions.sort_unstable();
    assert_eq!(versions, vec![1, 2, 3, 4]);

    let stored = rt.orchestrator.conversation("web:s1").await.unwrap().unwrap();
    assert_eq!(stored.version, 4);
    assert_eq!(stored.history.len(), 8);
}

#[tokio::test]
async fn unavailable_hook_yields_try_again_and_keeps_stage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let rt = runtime(Some(server.uri()));

    let reply = rt.orchestrator.handle_turn(event("m1", "ORDER-100")).await.unwrap();
    assert_eq!(reply.response_text, TRY_AGAIN);

    let stored = rt.orchestrator.conversation("web:s1").await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.active_domain, None);
    assert!(stored.state.is_empty());
    // 1 attempt + 2 retries.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn booking_flow_creates_exactly_one_booking() {
    let rt = runtime(None);
    let script = [
        ("m1", "BOOK", "Which service"),
        ("m2", "haircut", "Which date"),
        ("m3", "tomorrow", "YYYY-MM-DD"),
        ("m4", "2025-01-16", "what time"),
        ("m5", "10:30", "Reply yes or no"),
        ("m6", "yes", "BK-1"),
    ];
    for (id, text, expect) in script {
        let reply = rt.orchestrator.handle_turn(event(id, text)).await.unwrap();
        assert!(reply.response_text.contains(expect), "{id}: {}", reply.response_text);
    }
    // Redelivery of the confirming message does not book again.
    let replay = rt.orchestrator.handle_turn(event("m6", "yes")).await.unwrap();
    assert!(replay.response_text.contains("BK-1"));
    assert!(rt.bookings.get("BK-1").is_some());
    assert!(rt.bookings.get("BK-2").is_none());

    let stored = rt.orchestrator.conversation("web:s1").await.unwrap().unwrap();
    assert_eq!(stored.active_domain, None);
    assert_eq!(stored.version, 6);
}

#[tokio::test]
async fn submitted_job_runs_the_turn() {
    let rt = runtime(None);
    let job_id = rt.jobs.submit(event("m1", "menu"), None).await.unwrap();
    assert_eq!(rt.jobs.poll(&job_id).await.unwrap().status, JobStatus::Pending);

    let pool = rt.worker_pool().unwrap();
    assert!(pool.run_next().await.unwrap());

    let job = rt.jobs.poll(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    match job.result {
        Some(JobResult::Reply(reply)) => {
            assert!(reply.response_text.contains("BOOK"));
            assert_eq!(reply.version, 1);
        }
        other => panic!("unexpected result {other:?}"),
    }
}
