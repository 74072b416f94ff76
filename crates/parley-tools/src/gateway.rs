// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool execution gateway.
//!
//! Every tool call, whether a flow stage issued it or a planner proposed it,
//! passes through [`ToolGateway::execute`]: the per-domain allowlist and the
//! argument schema are checked before the tool runs, each attempt is bounded
//! by a timeout, and transient failures are retried only when repeating the
//! call is harmless.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parley_config::model::HookConfig;
use parley_core::{Domain, ParleyError, ToolCall};
use serde_json::Value;
use tracing::{debug, warn};

use crate::tool::{Tool, ToolContext, ToolRegistry};

/// Normalized result of an executed tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool ran and returned a result document.
    Success(Value),
    /// The tool ran and reported a failure; nothing was changed.
    Failed(String),
    /// A non-idempotent call timed out or lost its connection, so it may or
    /// may not have taken effect.
    Uncertain { reason: String },
}

/// Retry schedule for transient failures of idempotent tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }

    fn delay(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }
}

impl From<&HookConfig> for RetryPolicy {
    fn from(config: &HookConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

/// Validates and runs tool calls for the domain flows.
pub struct ToolGateway {
    registry: Arc<ToolRegistry>,
    allowlists: HashMap<Domain, BTreeSet<String>>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ToolGateway {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            allowlists: HashMap::new(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::none(),
        }
    }

    /// Allows the named tools in `domain`.
    ///
    /// Fails if a name is not registered, so a typo surfaces at startup rather
    /// than as a rejected call.
    pub fn allow<'a>(
        mut self,
        domain: Domain,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, ParleyError> {
        let entry = self.allowlists.entry(domain).or_default();
        for name in names {
            if !self.registry.contains(name) {
                return Err(ParleyError::Config(format!(
                    "tool `{name}` allowed in {domain} is not registered"
                )));
            }
            entry.insert(name.to_string());
        }
        Ok(self)
    }

    /// Upper bound on a single attempt of any tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Names of the tools allowed in `domain`, sorted.
    pub fn allowed(&self, domain: Domain) -> Vec<&str> {
        self.allowlists
            .get(&domain)
            .map(|names| names.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Planner-facing definitions of the tools allowed in `domain`.
    pub fn definitions(&self, domain: Domain) -> Vec<Value> {
        self.registry.definitions(self.allowed(domain))
    }

    /// Checks a call against the allowlist and schema without running it.
    pub fn check(
        &self,
        domain: Domain,
        call: &ToolCall,
    ) -> Result<(Arc<dyn Tool>, Value), ParleyError> {
        let allowed = self
            .allowlists
            .get(&domain)
            .is_some_and(|names| names.contains(&call.tool_name));
        if !allowed {
            return Err(ParleyError::ToolRejected {
                tool: call.tool_name.clone(),
                reason: format!("not allowed in domain {domain}"),
            });
        }
        let args = self.registry.validate(&call.tool_name, &call.arguments)?;
        let tool = self
            .registry
            .get(&call.tool_name)
            .ok_or_else(|| ParleyError::Internal(format!("tool {} vanished", call.tool_name)))?;
        Ok((tool, args))
    }

    /// Runs a call.
    ///
    /// Rejected calls return [`ParleyError::ToolRejected`] without touching
    /// the tool. Transient failures of idempotent tools are retried under the
    /// retry policy and returned as errors once exhausted; the same failures
    /// on a non-idempotent tool become [`ToolOutcome::Uncertain`].
    pub async fn execute(
        &self,
        domain: Domain,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ParleyError> {
        let (tool, args) = match self.check(domain, call) {
            Ok(checked) => checked,
            Err(e) => {
                warn!(
                    domain = %domain,
                    tool = %call.tool_name,
                    conversation_id = %ctx.conversation_id,
                    error = %e,
                    "tool call rejected"
                );
                return Err(e);
            }
        };

        let mut retry = 0;
        loop {
            let result = match tokio::time::timeout(self.timeout, tool.invoke(ctx, args.clone())).await
            {
                Ok(result) => result,
                Err(_) => Err(ParleyError::AdapterTimeout {
                    adapter: format!("tool {}", call.tool_name),
                    duration: self.timeout,
                }),
            };

            match result {
                Ok(output) => {
                    debug!(
                        tool = %call.tool_name,
                        conversation_id = %ctx.conversation_id,
                        is_error = output.is_error,
                        "tool call finished"
                    );
                    return Ok(match output.error_message() {
                        Some(message) => ToolOutcome::Failed(message.to_string()),
                        None => ToolOutcome::Success(output.content),
                    });
                }
                Err(e) if e.is_transient() && !tool.is_idempotent() => {
                    warn!(
                        tool = %call.tool_name,
                        conversation_id = %ctx.conversation_id,
                        request_key = %ctx.request_key,
                        error = %e,
                        "creating tool call outcome is uncertain"
                    );
                    return Ok(ToolOutcome::Uncertain {
                        reason: e.to_string(),
                    });
                }
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay(retry);
                    warn!(
                        tool = %call.tool_name,
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient tool failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Looks up the effect of an earlier uncertain call by its request key.
    ///
    /// Returns the found record when the tool's lookup reports one, `None`
    /// when the lookup confirms nothing was created or the tool has no lookup.
    pub async fn recheck(
        &self,
        domain: Domain,
        call: &ToolCall,
        ctx: &ToolContext,
    ) -> Result<Option<Value>, ParleyError> {
        let Some(lookup) = self
            .registry
            .get(&call.tool_name)
            .and_then(|tool| tool.lookup_tool().map(str::to_string))
        else {
            return Ok(None);
        };
        let query = ToolCall::new(
            lookup,
            serde_json::json!({ "request_key": ctx.request_key }),
        );
        match self.execute(domain, &query, ctx).await? {
            ToolOutcome::Success(found) if found.get("found") == Some(&Value::Bool(true)) => {
                debug!(tool = %call.tool_name, request_key = %ctx.request_key, "uncertain call had taken effect");
                Ok(Some(found))
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::tool::ToolOutput;

    /// Fails transiently `failures` times, then succeeds.
    struct Flaky {
        name: &'static str,
        idempotent: bool,
        failures: u32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(name: &'static str, idempotent: bool, failures: u32) -> Arc<Self> {
            Arc::new(Self {
                name,
                idempotent,
                failures,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Tool for Flaky {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "flaky test tool"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            })
        }

        fn is_idempotent(&self) -> bool {
            self.idempotent
        }

        async fn invoke(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ParleyError::AdapterUnavailable {
                    adapter: "test".into(),
                    message: "503".into(),
                });
            }
            if args["id"] == "missing" {
                return Ok(ToolOutput::error("not found"));
            }
            Ok(ToolOutput::ok(json!({ "id": args["id"] })))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow_create"
        }

        fn description(&self) -> &str {
            "never answers in time"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        fn is_idempotent(&self) -> bool {
            false
        }

        async fn invoke(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ParleyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ToolOutput::ok(json!({})))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            project_id: "default".into(),
            customer_id: "c1".into(),
            conversation_id: "web:s1".into(),
            request_key: "web:s1:m1".into(),
        }
    }

    fn gateway(tools: Vec<Arc<dyn Tool>>) -> ToolGateway {
        let mut registry = ToolRegistry::new();
        let names: Vec<String> = tools.iter().map(|t| t.name().to_string()).collect();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        ToolGateway::new(Arc::new(registry))
            .allow(Domain::Purchases, names.iter().map(String::as_str))
            .unwrap()
            .with_retry(RetryPolicy {
                max_retries: 2,
                backoff: Duration::from_millis(1),
            })
    }

    #[tokio::test]
    async fn tool_outside_domain_allowlist_is_rejected_before_invoke() {
        let tool = Flaky::new("get_order", true, 0);
        let gw = gateway(vec![tool.clone()]);
        let err = gw
            .execute(Domain::Claims, &ToolCall::new("get_order", json!({"id": "1"})), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::ToolRejected { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schema_violation_is_rejected_before_invoke() {
        let tool = Flaky::new("get_order", true, 0);
        let gw = gateway(vec![tool.clone()]);
        let err = gw
            .execute(
                Domain::Purchases,
                &ToolCall::new("get_order", json!({"id": "1", "sql": "drop"})),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ParleyError::ToolRejected { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_name_cannot_be_allowed() {
        let registry = Arc::new(ToolRegistry::new());
        assert!(ToolGateway::new(registry)
            .allow(Domain::Bookings, ["create_booking"])
            .is_err());
    }

    #[tokio::test]
    async fn idempotent_tool_is_retried_through_transient_failures() {
        let tool = Flaky::new("get_order", true, 2);
        let gw = gateway(vec![tool.clone()]);
        let outcome = gw
            .execute(Domain::Purchases, &ToolCall::new("get_order", json!({"id": "7"})), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Success(json!({"id": "7"})));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_transient_error() {
        let tool = Flaky::new("get_order", true, 10);
        let gw = gateway(vec![tool.clone()]);
        let err = gw
            .execute(Domain::Purchases, &ToolCall::new("get_order", json!({"id": "7"})), &ctx())
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_idempotent_transient_failure_is_uncertain_and_not_retried() {
        let tool = Flaky::new("create_thing", false, 1);
        let gw = gateway(vec![tool.clone()]);
        let outcome = gw
            .execute(Domain::Purchases, &ToolCall::new("create_thing", json!({"id": "7"})), &ctx())
            .await
            .unwrap();
        assert!(matches!(outcome, ToolOutcome::Uncertain { .. }));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_on_creating_call_is_uncertain() {
        let gw = gateway(vec![Arc::new(Slow)]).with_timeout(Duration::from_millis(50));
        let outcome = gw
            .execute(Domain::Purchases, &ToolCall::new("slow_create", json!({})), &ctx())
            .await
            .unwrap();
        match outcome {
            ToolOutcome::Uncertain { reason } => assert!(reason.contains("timed out")),
            other => panic!("expected uncertain, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reported_failure_is_not_retried() {
        let tool = Flaky::new("get_order", true, 0);
        let gw = gateway(vec![tool.clone()]);
        let outcome = gw
            .execute(
                Domain::Purchases,
                &ToolCall::new("get_order", json!({"id": "missing"})),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Failed("not found".into()));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recheck_without_lookup_tool_finds_nothing() {
        let gw = gateway(vec![Flaky::new("create_thing", false, 0)]);
        let found = gw
            .recheck(Domain::Purchases, &ToolCall::new("create_thing", json!({})), &ctx())
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn retry_delay_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn allowed_lists_are_sorted() {
        let gw = gateway(vec![
            Flaky::new("list_orders", true, 0),
            Flaky::new("get_order", true, 0),
        ]);
        assert_eq!(gw.allowed(Domain::Purchases), vec!["get_order", "list_orders"]);
        assert!(gw.allowed(Domain::Bookings).is_empty());
        assert_eq!(gw.definitions(Domain::Purchases).len(), 2);
    }
}
