// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation records, inbound events and turn replies.
//!
//! A [`Conversation`] is the unit of consistency: every turn produces exactly
//! one new version of it, committed through compare-and-swap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Domain;

/// Author of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Persisted conversation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub project_id: String,
    pub customer_id: Option<String>,
    pub active_domain: Option<Domain>,
    /// Domain flow state documents, keyed by domain name.
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Zero until first committed; then the number of committed mutations.
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// A fresh, not yet persisted conversation.
    pub fn new(
        conversation_id: impl Into<String>,
        project_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            project_id: project_id.into(),
            customer_id: None,
            active_domain: None,
            state: serde_json::Map::new(),
            history: Vec::new(),
            version: 0,
            updated_at: now,
        }
    }

    /// Appends a message, then drops the oldest entries until the history
    /// holds at most `cap` messages.
    pub fn push_message(&mut self, role: Role, text: impl Into<String>, at: DateTime<Utc>, cap: usize) {
        self.history.push(HistoryEntry {
            role,
            text: text.into(),
            at,
        });
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// The last `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    /// Prepares this record for commit: bumps the version and stamps `updated_at`.
    ///
    /// Returns the version the store must currently hold for the commit to win.
    pub fn prepare_commit(&mut self, now: DateTime<Utc>) -> u64 {
        let expected = self.version;
        self.version += 1;
        self.updated_at = now;
        expected
    }

    /// Flow state document for a domain, if any.
    pub fn domain_state(&self, domain: Domain) -> Option<&serde_json::Value> {
        self.state.get(&domain.to_string())
    }

    pub fn set_domain_state(&mut self, domain: Domain, value: serde_json::Value) {
        self.state.insert(domain.to_string(), value);
    }

    pub fn clear_domain_state(&mut self, domain: Domain) {
        self.state.remove(&domain.to_string());
    }
}

/// Builds the canonical conversation id for a channel address.
pub fn conversation_id_for(channel: &str, address: &str) -> String {
    format!("{channel}:{address}")
}

/// One inbound message, the input of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Channel-assigned identifier; the idempotency key within a project.
    pub message_id: String,
    pub conversation_id: String,
    pub project_id: String,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// The externally visible outcome of a turn. Replays return this verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnReply {
    pub conversation_id: String,
    pub message_id: String,
    pub response_text: String,
    #[serde(default)]
    pub domain: Option<Domain>,
    pub version: u64,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn new_conversation_starts_at_version_zero() {
        let conv = Conversation::new("web:abc", "default", t0());
        assert_eq!(conv.version, 0);
        assert!(conv.history.is_empty());
        assert!(conv.active_domain.is_none());
    }

    #[test]
    fn push_message_evicts_oldest_first() {
        let mut conv = Conversation::new("web:abc", "default", t0());
        for i in 0..5 {
            conv.push_message(Role::User, format!("m{i}"), t0(), 3);
        }
        let texts: Vec<_> = conv.history.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn prepare_commit_returns_base_version() {
        let mut conv = Conversation::new("web:abc", "default", t0());
        assert_eq!(conv.prepare_commit(t0()), 0);
        assert_eq!(conv.version, 1);
        assert_eq!(conv.prepare_commit(t0()), 1);
        assert_eq!(conv.version, 2);
    }

    #[test]
    fn domain_state_is_keyed_by_domain_name() {
        let mut conv = Conversation::new("web:abc", "default", t0());
        conv.set_domain_state(Domain::Bookings, serde_json::json!({"stage": "date"}));
        assert!(conv.state.contains_key("bookings"));
        assert_eq!(
            conv.domain_state(Domain::Bookings).unwrap()["stage"],
            "date"
        );
        conv.clear_domain_state(Domain::Bookings);
        assert!(conv.domain_state(Domain::Bookings).is_none());
    }

    #[test]
    fn conversation_id_joins_channel_and_address() {
        assert_eq!(conversation_id_for("whatsapp", "5511999"), "whatsapp:5511999");
    }

    proptest! {
        #[test]
        fn history_never_exceeds_cap(cap in 1usize..20, pushes in 0usize..60) {
            let mut conv = Conversation::new("web:p", "default", t0());
            for i in 0..pushes {
                conv.push_message(Role::User, i.to_string(), t0(), cap);
                prop_assert!(conv.history.len() <= cap);
            }
            if pushes > 0 {
                prop_assert_eq!(conv.history.last().unwrap().text.clone(), (pushes - 1).to_string());
            }
        }
    }
}
