// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Secret redaction for log output and error messages.
//!
//! Two complementary mechanisms:
//! 1. **Regex-based**: known credential shapes (API keys, Bearer tokens).
//! 2. **Exact-match**: configured secrets such as hook and channel HMAC keys.

use std::sync::LazyLock;

use regex::Regex;

static REDACTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // OpenAI-style keys: sk-...
        r"sk-[a-zA-Z0-9_\-]{16,}",
        // Bearer tokens in echoed headers
        r"Bearer\s+[a-zA-Z0-9._\-]{10,}",
        // Signature headers echoed back by upstreams
        r"(?i)x-webhook-signature:\s*[A-Za-z0-9+/=]{16,}",
    ]
    .into_iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

const REDACTED: &str = "[REDACTED]";

/// Redact secrets from a string using the built-in patterns and exact values.
pub fn redact(input: &str, secrets: &[String]) -> String {
    let mut result = input.to_string();
    for pattern in REDACTION_PATTERNS.iter() {
        result = pattern.replace_all(&result, REDACTED).into_owned();
    }

    // Longest first so a secret that contains another is replaced whole.
    let mut sorted: Vec<&String> = secrets.iter().filter(|s| !s.is_empty()).collect();
    sorted.sort_by_key(|s| std::cmp::Reverse(s.len()));
    for secret in sorted {
        result = result.replace(secret.as_str(), REDACTED);
    }
    result
}

/// A fixed set of configured secrets to scrub from text.
#[derive(Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            secrets: secrets.into_iter().map(Into::into).collect(),
        }
    }

    pub fn redact(&self, input: &str) -> String {
        redact(input, &self.secrets)
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("secrets", &self.secrets.len())
            .finish()
    }
}
