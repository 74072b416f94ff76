// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain routing with activation codes, control phrases and fallbacks.
//!
//! Priority: activation code > control phrase > active domain > keyword
//! rules > LLM fallback > clarification.

use std::str::FromStr;
use std::sync::Arc;

use parley_config::model::RouterConfig;
use parley_core::types::ProviderRequest;
use parley_core::{Conversation, Domain, ParleyError, ProviderAdapter};
use tracing::{debug, warn};

use crate::classifier::DomainClassifier;

/// Where a turn goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTarget {
    /// Run the turn through this domain's flow.
    Domain(Domain),
    /// Clear the active domain and show the domain menu.
    Menu,
    /// Clear the active domain and end the flow.
    Exit,
    /// No domain could be determined; ask the user to pick one.
    Clarify,
}

/// Which rule produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    ActivationCode,
    ControlPhrase,
    ActiveDomain,
    Rule,
    Llm,
    Unknown,
}

/// Routing decision for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub target: RouteTarget,
    pub source: RouteSource,
    /// Text handed to the flow: the message with any activation code removed.
    pub text: String,
    /// Human-readable reason for the decision.
    pub reason: String,
}

impl RouteDecision {
    /// The routed domain, if any.
    pub fn domain(&self) -> Option<Domain> {
        match self.target {
            RouteTarget::Domain(d) => Some(d),
            _ => None,
        }
    }

    /// Whether the message was a control command rather than domain input.
    pub fn is_control_command(&self) -> bool {
        matches!(self.target, RouteTarget::Menu | RouteTarget::Exit)
    }
}

const LLM_ROUTER_PROMPT: &str = "You route customer messages for a business assistant. \
Answer with exactly one word: bookings, purchases, claims, or unknown.";

/// Selects the domain flow for each inbound message.
pub struct DomainRouter {
    config: RouterConfig,
    classifier: DomainClassifier,
    provider: Option<Arc<dyn ProviderAdapter>>,
}

impl DomainRouter {
    /// Create a router. `provider` is consulted only when
    /// `router.llm_fallback` is enabled.
    pub fn new(
        config: RouterConfig,
        provider: Option<Arc<dyn ProviderAdapter>>,
    ) -> Result<Self, ParleyError> {
        let classifier = DomainClassifier::from_config(&config)?;
        Ok(Self {
            config,
            classifier,
            provider,
        })
    }

    /// Route a message in the context of its conversation.
    ///
    /// Never fails: an LLM error degrades to [`RouteTarget::Clarify`].
    pub async fn route(&self, conversation: &Conversation, text: &str) -> RouteDecision {
        let trimmed = text.trim();

        // 1. Activation code
        if let Some((domain, rest)) = self.parse_activation_code(trimmed) {
            return decision(
                RouteTarget::Domain(domain),
                RouteSource::ActivationCode,
                rest,
                format!("activation code for {domain}"),
            );
        }

        // 2. Control phrases
        let normalized = normalize_phrase(trimmed);
        if self.config.menu_phrases.iter().any(|p| normalize_phrase(p) == normalized) {
            return decision(RouteTarget::Menu, RouteSource::ControlPhrase, "", "menu phrase".into());
        }
        if self.config.exit_phrases.iter().any(|p| normalize_phrase(p) == normalized) {
            return decision(RouteTarget::Exit, RouteSource::ControlPhrase, "", "exit phrase".into());
        }

        // 3. Active domain holds
        if let Some(domain) = conversation.active_domain {
            return decision(
                RouteTarget::Domain(domain),
                RouteSource::ActiveDomain,
                trimmed,
                format!("active domain {domain}"),
            );
        }

        // 4. Keyword rules
        if let Some(result) = self.classifier.classify(trimmed) {
            return decision(
                RouteTarget::Domain(result.domain),
                RouteSource::Rule,
                trimmed,
                result.reason,
            );
        }

        // 5. LLM fallback
        if self.config.llm_fallback
            && let Some(provider) = &self.provider
        {
            match ask_llm(provider.as_ref(), trimmed).await {
                Ok(Some(domain)) => {
                    return decision(
                        RouteTarget::Domain(domain),
                        RouteSource::Llm,
                        trimmed,
                        format!("llm chose {domain}"),
                    );
                }
                Ok(None) => debug!("llm router answer did not name a domain"),
                Err(e) => warn!(error = %e, "llm router fallback failed"),
            }
        }

        decision(
            RouteTarget::Clarify,
            RouteSource::Unknown,
            trimmed,
            "no domain matched".into(),
        )
    }

    /// Splits a leading activation code off the message.
    ///
    /// Codes are matched exactly (they are uppercase tokens), so ordinary
    /// words such as "book" never trigger them.
    pub fn parse_activation_code<'a>(&self, text: &'a str) -> Option<(Domain, &'a str)> {
        let (first, rest) = match text.split_once(char::is_whitespace) {
            Some((first, rest)) => (first, rest.trim_start()),
            None => (text, ""),
        };
        [
            (Domain::Bookings, &self.config.bookings),
            (Domain::Purchases, &self.config.purchases),
            (Domain::Claims, &self.config.claims),
        ]
        .into_iter()
        .find(|(_, rules)| rules.activation_code.as_deref() == Some(first))
        .map(|(domain, _)| (domain, rest))
    }
}

fn decision(target: RouteTarget, source: RouteSource, text: &str, reason: String) -> RouteDecision {
    debug!(?target, ?source, reason = %reason, "route decided");
    RouteDecision {
        target,
        source,
        text: text.to_string(),
        reason,
    }
}

/// Lowercases and strips surrounding punctuation so "Menu!" matches "menu".
fn normalize_phrase(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

async fn ask_llm(provider: &dyn ProviderAdapter, text: &str) -> Result<Option<Domain>, ParleyError> {
    let mut request = ProviderRequest::prompt(LLM_ROUTER_PROMPT, text);
    request.max_tokens = 8;
    let response = provider.complete(request).await?;
    Ok(parse_llm_domain(&response.content))
}

/// Extracts a domain from a free-text LLM answer. Anything but exactly one
/// domain name is treated as no answer.
pub fn parse_llm_domain(answer: &str) -> Option<Domain> {
    let word = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    Domain::from_str(&word).ok()
}
