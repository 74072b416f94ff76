// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rule-based domain classification.
//!
//! Scores each domain from its configured keywords and regex patterns.
//! No LLM pre-call, no network, no latency.

use parley_config::model::{DomainRoutingConfig, RouterConfig};
use parley_core::{Domain, ParleyError};
use regex::Regex;

/// Weight of one regex pattern hit. Identifiers such as `ORDER-100` are a
/// stronger signal than a loose keyword.
const PATTERN_WEIGHT: u32 = 2;
const KEYWORD_WEIGHT: u32 = 1;

/// Result of classifying a message into a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub domain: Domain,
    pub score: u32,
    /// Human-readable reason for the classification.
    pub reason: String,
}

struct DomainRules {
    domain: Domain,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
}

impl DomainRules {
    fn compile(domain: Domain, config: &DomainRoutingConfig) -> Result<Self, ParleyError> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    ParleyError::Config(format!("router.{domain}.patterns: invalid regex `{p}`: {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            domain,
            keywords: config.keywords.iter().map(|k| k.to_lowercase()).collect(),
            patterns,
        })
    }

    fn score(&self, words: &[String], text: &str) -> (u32, Vec<String>) {
        let mut score = 0;
        let mut hits = Vec::new();
        for keyword in &self.keywords {
            if words.iter().any(|w| w == keyword) {
                score += KEYWORD_WEIGHT;
                hits.push(keyword.clone());
            }
        }
        for pattern in &self.patterns {
            if let Some(m) = pattern.find(text) {
                score += PATTERN_WEIGHT;
                hits.push(m.as_str().to_string());
            }
        }
        (score, hits)
    }
}

/// Keyword and pattern classifier over all domains.
pub struct DomainClassifier {
    rules: Vec<DomainRules>,
}

impl DomainClassifier {
    /// Compiles the per-domain rules. Fails on an invalid regex.
    pub fn from_config(config: &RouterConfig) -> Result<Self, ParleyError> {
        Ok(Self {
            rules: vec![
                DomainRules::compile(Domain::Bookings, &config.bookings)?,
                DomainRules::compile(Domain::Purchases, &config.purchases)?,
                DomainRules::compile(Domain::Claims, &config.claims)?,
            ],
        })
    }

    /// The single best-scoring domain, or `None` if nothing matched or the
    /// top score is shared by more than one domain.
    pub fn classify(&self, text: &str) -> Option<ClassificationResult> {
        let words = words(text);
        let mut scored: Vec<(Domain, u32, Vec<String>)> = self
            .rules
            .iter()
            .map(|r| {
                let (score, hits) = r.score(&words, text);
                (r.domain, score, hits)
            })
            .filter(|(_, score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        match scored.as_slice() {
            [] => None,
            [(_, top, _), (_, second, _), ..] if top == second => None,
            [(domain, score, hits), ..] => Some(ClassificationResult {
                domain: *domain,
                score: *score,
                reason: format!("matched {}", hits.join(", ")),
            }),
        }
    }
}

/// Lowercase alphanumeric words of a message.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
