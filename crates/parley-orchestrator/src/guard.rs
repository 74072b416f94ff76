// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Idempotency guard over the processed-event store.
//!
//! The first delivery of `(project_id, message_id)` claims the event and runs
//! the turn; later deliveries get the recorded reply. A duplicate that arrives
//! while the winner is still running waits briefly for its outcome and is
//! otherwise told to retry. Store failures degrade to "not seen" so an
//! unavailable store never blocks intake.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::IdempotencyConfig;
use parley_core::{ClaimOutcome, Clock, EventStore, ParleyError, TurnReply};
use tracing::{debug, warn};

/// What the guard decided for one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Run the turn. `claimed` is false when the store could not be reached,
    /// in which case nothing is recorded afterwards.
    Proceed { claimed: bool },
    /// Already processed; answer with the recorded reply.
    Replay(TurnReply),
    /// The winner has not finished within the wait budget.
    Busy,
}

pub struct IdempotencyGuard {
    events: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    config: IdempotencyConfig,
}

impl IdempotencyGuard {
    pub fn new(events: Arc<dyn EventStore>, clock: Arc<dyn Clock>, config: IdempotencyConfig) -> Self {
        Self {
            events,
            clock,
            config,
        }
    }

    /// Number of records eviction keeps per project.
    pub fn retention(&self) -> usize {
        self.config.capacity.max(self.config.min_retention)
    }

    pub async fn admit(&self, project_id: &str, message_id: &str) -> Admission {
        let wait = Duration::from_millis(self.config.in_flight_wait_ms);
        let poll = Duration::from_millis(self.config.in_flight_poll_ms.max(1));
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            let now = self.clock.now();
            let stale_before = now - chrono::Duration::seconds(self.config.stale_claim_secs as i64);
            match self
                .events
                .try_claim(project_id, message_id, now, stale_before)
                .await
            {
                Ok(ClaimOutcome::Claimed) => return Admission::Proceed { claimed: true },
                Ok(ClaimOutcome::Completed(reply)) => {
                    debug!(project_id, message_id, "duplicate event, replaying outcome");
                    return Admission::Replay(reply);
                }
                Ok(ClaimOutcome::InFlight) => {
                    if tokio::time::Instant::now() >= deadline {
                        debug!(project_id, message_id, "event still in flight");
                        return Admission::Busy;
                    }
                    tokio::time::sleep(poll).await;
                }
                Err(e) => {
                    warn!(
                        project_id,
                        message_id,
                        error = %e,
                        "idempotency store unavailable, treating event as unseen"
                    );
                    return Admission::Proceed { claimed: false };
                }
            }
        }
    }

    /// Records the outcome of a claimed event and trims the project's records.
    pub async fn record(&self, project_id: &str, message_id: &str, reply: &TurnReply) {
        if let Err(e) = self
            .events
            .complete(project_id, message_id, reply, self.clock.now())
            .await
        {
            warn!(project_id, message_id, error = %e, "failed to record event outcome");
            return;
        }
        match self.events.evict_oldest(project_id, self.retention()).await {
            Ok(0) => {}
            Ok(evicted) => debug!(project_id, evicted, "evicted processed events"),
            Err(e) => warn!(project_id, error = %e, "processed event eviction failed"),
        }
    }

    /// Drops the claim of a turn that failed so a redelivery can retry it.
    pub async fn release(&self, project_id: &str, message_id: &str) {
        if let Err(e) = self.events.release(project_id, message_id).await {
            warn!(project_id, message_id, error = %e, "failed to release event claim");
        }
    }

    /// Turns a [`Admission::Busy`] into the error surfaced to callers.
    pub fn busy_error(message_id: &str) -> ParleyError {
        ParleyError::EventInFlight {
            message_id: message_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use parley_core::{ManualClock, SystemClock};
    use parley_storage::InMemoryStorage;
    use tracing_test::traced_test;

    use super::*;

    fn reply(text: &str) -> TurnReply {
        TurnReply {
            conversation_id: "web:s1".into(),
            message_id: "m1".into(),
            response_text: text.into(),
            domain: None,
            version: 1,
        }
    }

    fn config() -> IdempotencyConfig {
        IdempotencyConfig {
            capacity: 2,
            min_retention: 1,
            in_flight_wait_ms: 50,
            in_flight_poll_ms: 5,
            stale_claim_secs: 60,
        }
    }

    fn guard(store: Arc<InMemoryStorage>) -> IdempotencyGuard {
        IdempotencyGuard::new(store, Arc::new(SystemClock), config())
    }

    #[tokio::test]
    async fn first_delivery_proceeds_and_replay_returns_outcome() {
        let guard = guard(Arc::new(InMemoryStorage::new()));
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });
        guard.record("p", "m1", &reply("hello")).await;
        assert_eq!(guard.admit("p", "m1").await, Admission::Replay(reply("hello")));
        // Same message id in another project is a different event.
        assert_eq!(guard.admit("q", "m1").await, Admission::Proceed { claimed: true });
    }

    #[tokio::test]
    async fn in_flight_duplicate_waits_then_reports_busy() {
        let guard = guard(Arc::new(InMemoryStorage::new()));
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });
        assert_eq!(guard.admit("p", "m1").await, Admission::Busy);
    }

    #[tokio::test]
    async fn duplicate_sees_outcome_recorded_while_waiting() {
        let store = Arc::new(InMemoryStorage::new());
        let guard = Arc::new(IdempotencyGuard::new(
            store,
            Arc::new(SystemClock),
            IdempotencyConfig {
                in_flight_wait_ms: 2_000,
                ..config()
            },
        ));
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });

        let winner = Arc::clone(&guard);
        let finish = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            winner.record("p", "m1", &reply("done")).await;
        });
        assert_eq!(guard.admit("p", "m1").await, Admission::Replay(reply("done")));
        finish.await.unwrap();
    }

    #[tokio::test]
    async fn released_claim_can_be_retried() {
        let guard = guard(Arc::new(InMemoryStorage::new()));
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });
        guard.release("p", "m1").await;
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });
    }

    #[tokio::test]
    async fn stale_claim_is_taken_over() {
        let store = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let guard = IdempotencyGuard::new(store, clock.clone(), config());
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: true });
    }

    #[tokio::test]
    async fn eviction_keeps_the_larger_of_capacity_and_minimum() {
        let store = Arc::new(InMemoryStorage::new());
        let guard = IdempotencyGuard::new(
            store.clone(),
            Arc::new(SystemClock),
            IdempotencyConfig {
                capacity: 1,
                min_retention: 3,
                ..config()
            },
        );
        assert_eq!(guard.retention(), 3);
        for i in 0..5 {
            let id = format!("m{i}");
            guard.admit("p", &id).await;
            guard.record("p", &id, &reply("ok")).await;
        }
        assert_eq!(store.count("p").await.unwrap(), 3);
        // Oldest went first.
        assert!(store.outcome("p", "m0").await.unwrap().is_none());
        assert!(store.outcome("p", "m4").await.unwrap().is_some());
    }

    struct Down;

    #[async_trait]
    impl EventStore for Down {
        async fn try_claim(
            &self,
            _: &str,
            _: &str,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<ClaimOutcome, ParleyError> {
            Err(ParleyError::Internal("store down".into()))
        }
        async fn complete(&self, _: &str, _: &str, _: &TurnReply, _: DateTime<Utc>) -> Result<(), ParleyError> {
            Err(ParleyError::Internal("store down".into()))
        }
        async fn release(&self, _: &str, _: &str) -> Result<(), ParleyError> {
            Ok(())
        }
        async fn outcome(&self, _: &str, _: &str) -> Result<Option<TurnReply>, ParleyError> {
            Ok(None)
        }
        async fn evict_oldest(&self, _: &str, _: usize) -> Result<usize, ParleyError> {
            Ok(0)
        }
        async fn count(&self, _: &str) -> Result<usize, ParleyError> {
            Ok(0)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn store_failure_degrades_to_unseen() {
        let guard = IdempotencyGuard::new(Arc::new(Down), Arc::new(SystemClock), config());
        assert_eq!(guard.admit("p", "m1").await, Admission::Proceed { claimed: false });
        guard.record("p", "m1", &reply("x")).await;
        assert!(logs_contain("idempotency store unavailable"));
    }
}
