// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks semantic constraints that serde attributes cannot express: non-zero
//! capacities, retention floors, well-formed activation codes and regexes.

use std::collections::HashMap;

use crate::diagnostic::ConfigError;
use crate::model::{DomainRoutingConfig, ParleyConfig, StorageBackend};

/// Validate a deserialized configuration for semantic correctness.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let host = config.server.host.trim();
    if host.is_empty() {
        errors.push(ConfigError::validation("server.host", "must not be empty"));
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        errors.push(ConfigError::validation(
            "server.host",
            format!("`{host}` is not a valid IP address or hostname"),
        ));
    }

    if config.storage.backend == StorageBackend::Sqlite
        && config.storage.database_path.trim().is_empty()
    {
        errors.push(ConfigError::validation(
            "storage.database_path",
            "must not be empty when the sqlite backend is selected",
        ));
    }

    if config.conversation.history_cap == 0 {
        errors.push(ConfigError::validation(
            "conversation.history_cap",
            "must be at least 1",
        ));
    }

    let idem = &config.idempotency;
    if idem.capacity == 0 {
        errors.push(ConfigError::validation(
            "idempotency.capacity",
            "must be at least 1",
        ));
    }
    if idem.min_retention > idem.capacity {
        errors.push(ConfigError::validation(
            "idempotency.min_retention",
            format!(
                "({}) must not exceed idempotency.capacity ({})",
                idem.min_retention, idem.capacity
            ),
        ));
    }
    if idem.in_flight_poll_ms == 0 {
        errors.push(ConfigError::validation(
            "idempotency.in_flight_poll_ms",
            "must be at least 1",
        ));
    }

    let memory = &config.memory;
    if memory.vector_capacity == 0 {
        errors.push(ConfigError::validation(
            "memory.vector_capacity",
            "must be at least 1",
        ));
    }
    if !(-1.0..=1.0).contains(&memory.similarity_threshold) {
        errors.push(ConfigError::validation(
            "memory.similarity_threshold",
            format!(
                "must be within [-1.0, 1.0], got {}",
                memory.similarity_threshold
            ),
        ));
    }
    if memory.hashing_dimensions == 0 {
        errors.push(ConfigError::validation(
            "memory.hashing_dimensions",
            "must be at least 1",
        ));
    }

    validate_routing(config, &mut errors);

    if config.flows.max_planner_steps == 0 {
        errors.push(ConfigError::validation(
            "flows.max_planner_steps",
            "must be at least 1",
        ));
    }
    if config.flows.booking_services.is_empty() {
        errors.push(ConfigError::validation(
            "flows.booking_services",
            "must list at least one service",
        ));
    }

    let hook = &config.hooks.purchases;
    if hook.secret.is_some() && hook.url.is_none() {
        errors.push(ConfigError::validation(
            "hooks.purchases.secret",
            "is set but hooks.purchases.url is missing",
        ));
    }
    if let Some(url) = &hook.url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ConfigError::validation(
            "hooks.purchases.url",
            format!("`{url}` must be an http(s) URL"),
        ));
    }

    if config.jobs.workers == 0 {
        errors.push(ConfigError::validation("jobs.workers", "must be at least 1"));
    }

    for (name, channel) in &config.channels {
        if channel.max_clock_drift_secs == 0 {
            errors.push(ConfigError::validation(
                format!("channels.{name}.max_clock_drift_secs"),
                "must be at least 1",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_routing(config: &ParleyConfig, errors: &mut Vec<ConfigError>) {
    let router = &config.router;
    let domains: [(&str, &DomainRoutingConfig); 3] = [
        ("bookings", &router.bookings),
        ("purchases", &router.purchases),
        ("claims", &router.claims),
    ];

    let mut codes: HashMap<&str, &str> = HashMap::new();
    for (domain, rules) in domains {
        if let Some(code) = rules.activation_code.as_deref() {
            let well_formed = !code.is_empty()
                && code.len() <= 16
                && code
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');
            if !well_formed {
                errors.push(ConfigError::validation(
                    format!("router.{domain}.activation_code"),
                    format!("`{code}` must be a short uppercase token"),
                ));
            }
            if let Some(other) = codes.insert(code, domain) {
                errors.push(ConfigError::validation(
                    format!("router.{domain}.activation_code"),
                    format!("`{code}` is already bound to {other}"),
                ));
            }
        }
        for pattern in &rules.patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(ConfigError::validation(
                    format!("router.{domain}.patterns"),
                    format!("`{pattern}` is not a valid regex: {e}"),
                ));
            }
        }
    }

    for phrase in router.menu_phrases.iter().chain(&router.exit_phrases) {
        if phrase.trim().is_empty() {
            errors.push(ConfigError::validation(
                "router",
                "menu and exit phrases must not be empty",
            ));
            break;
        }
    }
}
