// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain conversation flows.
//!
//! Bookings and claims are staged flows: a pure transition
//! `(stage, input) -> (stage', reply | effect)` whose effects run through the
//! tool gateway. Purchases is a planning loop driven by a [`Planner`].
//! [`FlowEngine`] applies a routing decision to a conversation and produces
//! the reply for the turn.

pub mod bookings;
pub mod claims;
pub mod engine;
pub mod planner;
pub mod purchases;
pub mod replies;
pub mod transition;

pub use engine::{FlowEngine, FlowReply};
pub use planner::{LlmPlanner, Plan, PlanContext, Planner, RulePlanner};
pub use replies::{Replies, TRY_AGAIN};

use std::sync::Arc;

use parley_config::model::{FlowsConfig, PlannerMode};
use parley_core::{PluginAdapter, ProviderAdapter};
use tracing::{info, warn};

/// Picks the purchases planner for the configured mode.
///
/// `llm` without a configured provider degrades to the rule planner.
pub fn planner_for(
    config: &FlowsConfig,
    provider: Option<Arc<dyn ProviderAdapter>>,
) -> Arc<dyn Planner> {
    match (config.purchases_planner, provider) {
        (PlannerMode::Llm, Some(provider)) => {
            info!(provider = provider.name(), "purchases planner: llm");
            Arc::new(LlmPlanner::new(provider))
        }
        (PlannerMode::Llm, None) => {
            warn!("purchases planner set to llm but no provider is configured, using rules");
            Arc::new(RulePlanner)
        }
        (PlannerMode::Rules, _) => Arc::new(RulePlanner),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use parley_config::model::{MemoryConfig, RouterConfig};
    use parley_core::{Clock, Conversation, Domain, ManualClock, MemoryBackend, ParleyError};
    use parley_memory::{CustomerMemory, HashingEmbedder};
    use parley_router::{RouteDecision, RouteSource, RouteTarget};
    use parley_storage::InMemoryStorage;
    use parley_tools::builtin::{
        BookingDesk, CancelBookingTool, ClaimDesk, CreateBookingTool, FindBookingTool,
        register_builtins,
    };
    use parley_tools::{Tool, ToolContext, ToolGateway, ToolOutput, ToolRegistry};
    use serde_json::{Value, json};

    use super::*;

    /// Fake purchases hook with one known order.
    struct Orders {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Tool for Orders {
        fn name(&self) -> &str {
            "get_order"
        }

        fn description(&self) -> &str {
            "order lookup"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "order_id": { "type": "string" } },
                "required": ["order_id"]
            })
        }

        async fn invoke(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if args["order_id"] == "ORDER-100" {
                Ok(ToolOutput::ok(json!({
                    "ok": true,
                    "order": {"order_id": "ORDER-100", "status": "shipped", "tracking_id": "TRK-9Z"}
                })))
            } else {
                Ok(ToolOutput::error("order not found"))
            }
        }
    }

    /// Creates the booking, then loses the acknowledgement once.
    struct LostAck {
        inner: CreateBookingTool,
        dropped: AtomicU32,
    }

    #[async_trait]
    impl Tool for LostAck {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn description(&self) -> &str {
            self.inner.description()
        }

        fn parameters_schema(&self) -> Value {
            self.inner.parameters_schema()
        }

        fn is_idempotent(&self) -> bool {
            false
        }

        fn lookup_tool(&self) -> Option<&str> {
            self.inner.lookup_tool()
        }

        async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
            let out = self.inner.invoke(ctx, args).await?;
            if self.dropped.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ParleyError::AdapterTimeout {
                    adapter: "bookings".into(),
                    duration: std::time::Duration::from_secs(1),
                });
            }
            Ok(out)
        }
    }

    /// Lookup whose first call cannot reach its backend.
    struct LookupDownOnce {
        inner: FindBookingTool,
        failed: AtomicU32,
    }

    #[async_trait]
    impl Tool for LookupDownOnce {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn description(&self) -> &str {
            self.inner.description()
        }

        fn parameters_schema(&self) -> Value {
            self.inner.parameters_schema()
        }

        async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
            if self.failed.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ParleyError::AdapterUnavailable {
                    adapter: "bookings".into(),
                    message: "connection reset".into(),
                });
            }
            self.inner.invoke(ctx, args).await
        }
    }

    struct Fixture {
        engine: FlowEngine,
        desk: Arc<BookingDesk>,
        orders: Arc<Orders>,
        memory: Arc<CustomerMemory>,
    }

    fn fixture(lose_first_ack: bool) -> Fixture {
        fixture_with(lose_first_ack, false)
    }

    fn fixture_with(lose_first_ack: bool, lookup_down_once: bool) -> Fixture {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap(),
        ));
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryStorage::new());
        let memory = Arc::new(CustomerMemory::new(
            backend,
            Arc::new(HashingEmbedder::new(64)),
            Arc::clone(&clock),
            MemoryConfig::default(),
        ));
        let desk = Arc::new(BookingDesk::new());
        let claims = Arc::new(ClaimDesk::new());
        let orders = Arc::new(Orders {
            calls: AtomicU32::new(0),
        });
        let services = vec!["haircut".to_string(), "repair".to_string()];

        let mut registry = ToolRegistry::new();
        if lose_first_ack {
            registry
                .register(Arc::new(LostAck {
                    inner: CreateBookingTool::new(Arc::clone(&desk), services.clone()),
                    dropped: AtomicU32::new(0),
                }))
                .unwrap();
            let find = FindBookingTool::new(Arc::clone(&desk));
            if lookup_down_once {
                registry
                    .register(Arc::new(LookupDownOnce {
                        inner: find,
                        failed: AtomicU32::new(0),
                    }))
                    .unwrap();
            } else {
                registry.register(Arc::new(find)).unwrap();
            }
            registry
                .register(Arc::new(CancelBookingTool::new(Arc::clone(&desk))))
                .unwrap();
        } else {
            register_builtins(&mut registry, &desk, &claims, &memory, services.clone()).unwrap();
        }
        registry.register(orders.clone()).unwrap();
        let gateway = ToolGateway::new(Arc::new(registry))
            .allow(Domain::Bookings, ["create_booking", "cancel_booking", "find_booking"])
            .unwrap()
            .allow(Domain::Purchases, ["get_order"])
            .unwrap();
        let gateway = if lose_first_ack {
            gateway
        } else {
            gateway.allow(Domain::Claims, ["open_claim", "get_order"]).unwrap()
        };

        let config = FlowsConfig {
            booking_services: services,
            ..FlowsConfig::default()
        };
        let engine = FlowEngine::new(
            Arc::new(gateway),
            Arc::clone(&memory),
            Arc::new(RulePlanner),
            clock,
            config,
            &RouterConfig::default(),
            10,
        );
        Fixture {
            engine,
            desk,
            orders,
            memory,
        }
    }

    fn ctx(message_id: &str) -> ToolContext {
        ToolContext {
            project_id: "default".into(),
            customer_id: "c1".into(),
            conversation_id: "web:s1".into(),
            request_key: format!("web:s1:{message_id}"),
        }
    }

    fn to(domain: Domain, source: RouteSource, text: &str) -> RouteDecision {
        RouteDecision {
            target: RouteTarget::Domain(domain),
            source,
            text: text.into(),
            reason: "test".into(),
        }
    }

    fn conversation() -> Conversation {
        Conversation::new("web:s1", "default", Utc::now())
    }

    #[test]
    fn llm_mode_without_provider_uses_rules() {
        let config = FlowsConfig {
            purchases_planner: PlannerMode::Llm,
            ..FlowsConfig::default()
        };
        assert_eq!(planner_for(&config, None).name(), "rules");
        assert_eq!(planner_for(&FlowsConfig::default(), None).name(), "rules");
    }

    #[tokio::test]
    async fn order_id_is_looked_up_and_answered() {
        let f = fixture(false);
        let mut conv = conversation();
        let reply = f
            .engine
            .run(&mut conv, &to(Domain::Purchases, RouteSource::Rule, "ORDER-100"), &ctx("m1"))
            .await
            .unwrap();
        assert_eq!(reply.text, "Order ORDER-100 is shipped.");
        assert_eq!(reply.domain, Some(Domain::Purchases));
        assert_eq!(conv.active_domain, Some(Domain::Purchases));
        assert_eq!(f.orders.calls.load(Ordering::SeqCst), 1);

        let key = ctx("m1").customer_key();
        assert_eq!(
            f.memory.get(&key, "last_order_id").await.unwrap().as_deref(),
            Some("ORDER-100")
        );
        assert_eq!(
            f.memory.get(&key, "last_tracking_id").await.unwrap().as_deref(),
            Some("TRK-9Z")
        );
    }

    #[tokio::test]
    async fn disallowed_planner_call_becomes_an_observation() {
        let f = fixture(false);
        let mut conv = conversation();
        let reply = f
            .engine
            .run(
                &mut conv,
                &to(Domain::Purchases, RouteSource::Rule, "track TRK-AB12"),
                &ctx("m1"),
            )
            .await
            .unwrap();
        assert!(reply.text.contains("not available"), "{}", reply.text);
    }

    #[tokio::test]
    async fn booking_walkthrough_creates_one_booking_and_completes() {
        let f = fixture(false);
        let mut conv = conversation();
        let steps = [
            (RouteSource::ActivationCode, "", "Which service"),
            (RouteSource::ActiveDomain, "haircut", "Which date"),
            (RouteSource::ActiveDomain, "tomorrow", "YYYY-MM-DD"),
            (RouteSource::ActiveDomain, "2025-01-16", "what time"),
            (RouteSource::ActiveDomain, "10:30", "Reply yes or no"),
            (RouteSource::ActiveDomain, "yes", "BK-1"),
        ];
        for (i, (source, text, expect)) in steps.into_iter().enumerate() {
            let reply = f
                .engine
                .run(&mut conv, &to(Domain::Bookings, source, text), &ctx(&format!("m{i}")))
                .await
                .unwrap();
            assert!(reply.text.contains(expect), "step {i}: {}", reply.text);
        }
        assert_eq!(conv.active_domain, None);
        assert!(conv.domain_state(Domain::Bookings).is_none());
        assert!(f.desk.get("BK-1").is_some());
        assert!(f.desk.get("BK-2").is_none());
    }

    #[tokio::test]
    async fn uncertain_create_is_rechecked_not_duplicated() {
        let f = fixture(true);
        let mut conv = conversation();
        conv.active_domain = Some(Domain::Bookings);
        conv.set_domain_state(
            Domain::Bookings,
            json!({"stage": "confirm", "service": "haircut", "date": "2025-01-16", "time": "10:00:00"}),
        );
        let reply = f
            .engine
            .run(&mut conv, &to(Domain::Bookings, RouteSource::ActiveDomain, "yes"), &ctx("m9"))
            .await
            .unwrap();
        assert!(reply.text.contains("BK-1"), "{}", reply.text);
        assert!(f.desk.get("BK-2").is_none());
        assert_eq!(conv.active_domain, None);
    }

    #[tokio::test]
    async fn unsettled_create_is_rechecked_under_the_same_key_next_turn() {
        let f = fixture_with(true, true);
        let mut conv = conversation();
        conv.active_domain = Some(Domain::Bookings);
        conv.set_domain_state(
            Domain::Bookings,
            json!({
                "stage": "confirm",
                "service": "haircut",
                "date": "2025-01-16",
                "time": "10:30:00",
                "request_key": "web:s1:m7"
            }),
        );

        // The create lands but its reply is lost, and the re-check cannot run.
        let mut working = conv.clone();
        let err = f
            .engine
            .run(&mut working, &to(Domain::Bookings, RouteSource::ActiveDomain, "yes"), &ctx("m8"))
            .await
            .unwrap_err();
        assert!(err.is_adapter_failure(), "{err}");
        assert_eq!(f.desk.find_by_request("web:s1:m7").unwrap().booking_id, "BK-1");

        // The committed state is still the confirmation; the next "yes" finds BK-1.
        let reply = f
            .engine
            .run(&mut conv, &to(Domain::Bookings, RouteSource::ActiveDomain, "yes"), &ctx("m9"))
            .await
            .unwrap();
        assert!(reply.text.contains("BK-1"), "{}", reply.text);
        assert!(f.desk.get("BK-2").is_none());
        assert_eq!(conv.active_domain, None);
    }

    #[tokio::test]
    async fn menu_clears_domain_and_state() {
        let f = fixture(false);
        let mut conv = conversation();
        f.engine
            .run(&mut conv, &to(Domain::Bookings, RouteSource::Rule, "haircut"), &ctx("m1"))
            .await
            .unwrap();
        assert!(conv.domain_state(Domain::Bookings).is_some());

        let menu = RouteDecision {
            target: RouteTarget::Menu,
            source: RouteSource::ControlPhrase,
            text: String::new(),
            reason: "menu".into(),
        };
        let reply = f.engine.run(&mut conv, &menu, &ctx("m2")).await.unwrap();
        assert!(reply.text.contains("BOOK"));
        assert_eq!(reply.domain, None);
        assert_eq!(conv.active_domain, None);
        assert!(conv.state.is_empty());
    }

    #[tokio::test]
    async fn activation_code_restarts_the_flow() {
        let f = fixture(false);
        let mut conv = conversation();
        f.engine
            .run(&mut conv, &to(Domain::Bookings, RouteSource::Rule, "haircut"), &ctx("m1"))
            .await
            .unwrap();
        let reply = f
            .engine
            .run(&mut conv, &to(Domain::Bookings, RouteSource::ActivationCode, ""), &ctx("m2"))
            .await
            .unwrap();
        assert!(reply.text.starts_with("Which service"));
        assert_eq!(conv.domain_state(Domain::Bookings).unwrap()["stage"], "service");
    }

    #[tokio::test]
    async fn claim_is_filed_and_remembered() {
        let f = fixture(false);
        let mut conv = conversation();
        let steps = [
            (RouteSource::ActivationCode, "ORDER-100", "What went wrong"),
            (RouteSource::ActiveDomain, "the box arrived crushed", "Reply yes or no"),
            (RouteSource::ActiveDomain, "yes", "CL-1"),
        ];
        for (i, (source, text, expect)) in steps.into_iter().enumerate() {
            let reply = f
                .engine
                .run(&mut conv, &to(Domain::Claims, source, text), &ctx(&format!("m{i}")))
                .await
                .unwrap();
            assert!(reply.text.contains(expect), "step {i}: {}", reply.text);
        }
        let snapshot = f.memory.snapshot(&ctx("x").customer_key()).await.unwrap();
        assert_eq!(snapshot.vectors.len(), 1);
        assert!(snapshot.vectors[0].text.contains("crushed"));
    }

    #[tokio::test]
    async fn rerun_of_a_filing_turn_remembers_the_claim_once() {
        let f = fixture(false);
        let mut base = conversation();
        base.active_domain = Some(Domain::Claims);
        base.set_domain_state(
            Domain::Claims,
            json!({
                "stage": "confirm",
                "order_id": "ORDER-100",
                "description": "the box arrived crushed",
                "request_key": "web:s1:m2"
            }),
        );

        for _ in 0..2 {
            let mut working = base.clone();
            let reply = f
                .engine
                .run(&mut working, &to(Domain::Claims, RouteSource::ActiveDomain, "yes"), &ctx("m3"))
                .await
                .unwrap();
            assert!(reply.text.contains("CL-1"), "{}", reply.text);
        }

        let snapshot = f.memory.snapshot(&ctx("x").customer_key()).await.unwrap();
        assert_eq!(snapshot.vectors.len(), 1);
        assert_eq!(snapshot.vectors[0].id, "claim:web:s1:m2");
    }

    #[tokio::test]
    async fn unknown_order_in_claim_reprompts() {
        let f = fixture(false);
        let mut conv = conversation();
        let reply = f
            .engine
            .run(&mut conv, &to(Domain::Claims, RouteSource::Rule, "ORDER-5 is broken"), &ctx("m1"))
            .await
            .unwrap();
        assert!(reply.text.contains("couldn't find ORDER-5"), "{}", reply.text);
        assert_eq!(conv.domain_state(Domain::Claims).unwrap()["stage"], "order");
    }
}
