// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tools, the schema-checked registry, and the tool execution gateway.
//!
//! Domain flows never call a tool directly. They hand a [`ToolCall`] to the
//! [`ToolGateway`], which checks the domain allowlist and the tool's argument
//! schema, then runs the tool with a timeout and the retry policy.
//!
//! Tools come in two kinds:
//! - in-process services in [`builtin`] (bookings, claims, customer notes)
//! - [`hook::HookTool`] forwarding order and shipment lookups to a signed HTTP hook
//!
//! [`ToolCall`]: parley_core::ToolCall

pub mod builtin;
pub mod gateway;
pub mod hook;
pub mod tool;

pub use gateway::{RetryPolicy, ToolGateway, ToolOutcome};
pub use hook::{HookAction, HookClient, HookTool};
pub use tool::{Tool, ToolContext, ToolOutput, ToolRegistry};

use std::sync::Arc;
use std::time::Duration;

use parley_config::ParleyConfig;
use parley_core::{Clock, Domain, ParleyError};
use parley_memory::CustomerMemory;

use crate::builtin::{BookingDesk, ClaimDesk};

const NOTE_TOOLS: [&str; 2] = ["remember_note", "recall_notes"];
const BOOKING_TOOLS: [&str; 3] = ["create_booking", "cancel_booking", "find_booking"];
const CLAIM_TOOLS: [&str; 1] = ["open_claim"];

/// The gateway together with the in-process services behind it.
pub struct ToolSuite {
    pub gateway: Arc<ToolGateway>,
    pub bookings: Arc<BookingDesk>,
    pub claims: Arc<ClaimDesk>,
}

impl ToolSuite {
    /// Registers every tool and builds the per-domain allowlists.
    ///
    /// Order lookups are allowed in purchases and claims only when the
    /// purchases hook has a URL.
    pub fn from_config(
        config: &ParleyConfig,
        memory: Arc<CustomerMemory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ParleyError> {
        let bookings = Arc::new(BookingDesk::new());
        let claims = Arc::new(ClaimDesk::new());

        let mut registry = ToolRegistry::new();
        builtin::register_builtins(
            &mut registry,
            &bookings,
            &claims,
            &memory,
            config.flows.booking_services.clone(),
        )?;

        let hook = HookClient::from_config("purchases hook", &config.hooks.purchases, clock)?;
        let hook_enabled = hook.is_some();
        if let Some(hook) = hook {
            for tool in HookTool::purchases(Arc::new(hook)) {
                registry.register(tool)?;
            }
        } else {
            tracing::warn!("no purchases hook configured, order lookups are disabled");
        }
        let order_tools: Vec<&str> = if hook_enabled {
            HookAction::ALL.iter().map(HookAction::name).collect()
        } else {
            Vec::new()
        };

        let timeout = Duration::from_millis(
            config
                .hooks
                .purchases
                .timeout_ms
                .max(config.provider.timeout_ms),
        ) + Duration::from_secs(1);

        let gateway = ToolGateway::new(Arc::new(registry))
            .allow(Domain::Bookings, BOOKING_TOOLS.into_iter().chain(NOTE_TOOLS))?
            .allow(
                Domain::Purchases,
                order_tools.iter().copied().chain(NOTE_TOOLS),
            )?
            .allow(
                Domain::Claims,
                CLAIM_TOOLS
                    .into_iter()
                    .chain(order_tools.iter().copied().filter(|n| *n == "get_order"))
                    .chain(NOTE_TOOLS),
            )?
            .with_timeout(timeout)
            .with_retry(RetryPolicy::from(&config.hooks.purchases));

        Ok(Self {
            gateway: Arc::new(gateway),
            bookings,
            claims,
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_config::model::MemoryConfig;
    use parley_core::{MemoryBackend, SystemClock};
    use parley_memory::HashingEmbedder;
    use parley_storage::InMemoryStorage;

    use super::*;

    fn memory() -> Arc<CustomerMemory> {
        let backend: Arc<dyn MemoryBackend> = Arc::new(InMemoryStorage::new());
        Arc::new(CustomerMemory::new(
            backend,
            Arc::new(HashingEmbedder::new(64)),
            Arc::new(SystemClock),
            MemoryConfig::default(),
        ))
    }

    #[test]
    fn without_hook_purchases_only_has_notes() {
        let suite =
            ToolSuite::from_config(&ParleyConfig::default(), memory(), Arc::new(SystemClock))
                .unwrap();
        assert_eq!(
            suite.gateway.allowed(Domain::Purchases),
            vec!["recall_notes", "remember_note"]
        );
        assert_eq!(
            suite.gateway.allowed(Domain::Bookings),
            vec![
                "cancel_booking",
                "create_booking",
                "find_booking",
                "recall_notes",
                "remember_note"
            ]
        );
    }

    #[test]
    fn hook_url_enables_order_tools() {
        let mut config = ParleyConfig::default();
        config.hooks.purchases.url = Some("http://127.0.0.1:9/hook".into());
        let suite = ToolSuite::from_config(&config, memory(), Arc::new(SystemClock)).unwrap();
        let purchases = suite.gateway.allowed(Domain::Purchases);
        assert!(purchases.contains(&"get_order"));
        assert!(purchases.contains(&"get_shipment_by_tracking_id"));
        let claims = suite.gateway.allowed(Domain::Claims);
        assert!(claims.contains(&"get_order"));
        assert!(!claims.contains(&"list_orders"));
    }
}
