// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `parley config` command implementation.

use parley_config::ParleyConfig;
use parley_core::ParleyError;
use parley_security::Redactor;

/// Every configured secret, for scrubbing rendered output.
pub fn secrets(config: &ParleyConfig) -> Vec<String> {
    let mut secrets: Vec<String> = [
        config.server.bearer_token.as_ref(),
        config.hooks.purchases.secret.as_ref(),
        config.provider.api_key.as_ref(),
        config.jobs.callback_secret.as_ref(),
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect();
    secrets.extend(config.channels.values().filter_map(|c| c.secret.clone()));
    secrets
}

/// Effective configuration as TOML with secrets replaced.
pub fn show(config: &ParleyConfig) -> Result<String, ParleyError> {
    let rendered = toml::to_string_pretty(config)
        .map_err(|e| ParleyError::Config(format!("failed to render config: {e}")))?;
    Ok(Redactor::new(secrets(config)).redact(&rendered))
}

/// One-line description of a valid configuration.
pub fn summary(config: &ParleyConfig) -> String {
    format!(
        "config ok: listen {}:{}, storage {:?}, {} channel(s), purchases hook {}",
        config.server.host,
        config.server.port,
        config.storage.backend,
        config.channels.len(),
        if config.hooks.purchases.url.is_some() {
            "enabled"
        } else {
            "disabled"
        },
    )
}
