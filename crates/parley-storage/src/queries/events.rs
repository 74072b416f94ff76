// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Processed-event records for inbound deduplication.

use chrono::{DateTime, Utc};
use parley_core::{ClaimOutcome, ParleyError, TurnReply};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, map_tr_err};
use crate::models::{opt_json_col, to_json, ts_to_sql};

/// Claims `(project_id, message_id)` for processing.
///
/// Runs as one immediate transaction on the writer thread, so concurrent
/// claims for the same event observe each other.
pub async fn try_claim(
    db: &Database,
    project_id: &str,
    message_id: &str,
    now: DateTime<Utc>,
    stale_before: DateTime<Utc>,
) -> Result<ClaimOutcome, ParleyError> {
    let project_id = project_id.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let existing = tx
                .query_row(
                    "SELECT status, outcome, claimed_at FROM processed_events
                     WHERE project_id = ?1 AND message_id = ?2",
                    params![project_id, message_id],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            opt_json_col::<TurnReply>(row, 1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    tx.execute(
                        "INSERT INTO processed_events (project_id, message_id, status, claimed_at)
                         VALUES (?1, ?2, 'in_flight', ?3)",
                        params![project_id, message_id, ts_to_sql(&now)],
                    )?;
                    ClaimOutcome::Claimed
                }
                Some((status, Some(reply), _)) if status == "completed" => {
                    ClaimOutcome::Completed(reply)
                }
                Some((_, _, claimed_at)) if claimed_at < ts_to_sql(&stale_before) => {
                    tx.execute(
                        "UPDATE processed_events SET claimed_at = ?3, status = 'in_flight'
                         WHERE project_id = ?1 AND message_id = ?2",
                        params![project_id, message_id, ts_to_sql(&now)],
                    )?;
                    ClaimOutcome::Claimed
                }
                Some(_) => ClaimOutcome::InFlight,
            };
            tx.commit()?;
            Ok(outcome)
        })
        .await
        .map_err(map_tr_err)
}

/// Marks a claimed event completed with its reply.
pub async fn complete(
    db: &Database,
    project_id: &str,
    message_id: &str,
    outcome: &TurnReply,
    now: DateTime<Utc>,
) -> Result<(), ParleyError> {
    let project_id = project_id.to_string();
    let message_id = message_id.to_string();
    let outcome = outcome.clone();
    db.connection()
        .call(move |conn| {
            let outcome = to_json(&outcome)?;
            let now = ts_to_sql(&now);
            conn.execute(
                "INSERT INTO processed_events
                 (project_id, message_id, status, outcome, claimed_at, completed_at)
                 VALUES (?1, ?2, 'completed', ?3, ?4, ?4)
                 ON CONFLICT (project_id, message_id) DO UPDATE
                 SET status = 'completed', outcome = excluded.outcome,
                     completed_at = excluded.completed_at",
                params![project_id, message_id, outcome, now],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Removes an unfinished claim. Completed records are left alone.
pub async fn release(db: &Database, project_id: &str, message_id: &str) -> Result<(), ParleyError> {
    let project_id = project_id.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM processed_events
                 WHERE project_id = ?1 AND message_id = ?2 AND status = 'in_flight'",
                params![project_id, message_id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// The recorded reply of a completed event.
pub async fn outcome(
    db: &Database,
    project_id: &str,
    message_id: &str,
) -> Result<Option<TurnReply>, ParleyError> {
    let project_id = project_id.to_string();
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let found = conn
                .query_row(
                    "SELECT outcome FROM processed_events
                     WHERE project_id = ?1 AND message_id = ?2 AND status = 'completed'",
                    params![project_id, message_id],
                    |row| opt_json_col::<TurnReply>(row, 0),
                )
                .optional()?;
            Ok(found.flatten())
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes the oldest completed events of a project beyond `keep`.
pub async fn evict_oldest(db: &Database, project_id: &str, keep: usize) -> Result<usize, ParleyError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let total: i64 = tx.query_row(
                "SELECT COUNT(*) FROM processed_events WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )?;
            let excess = total - keep as i64;
            let removed = if excess > 0 {
                tx.execute(
                    "DELETE FROM processed_events WHERE id IN (
                        SELECT id FROM processed_events
                        WHERE project_id = ?1 AND status = 'completed'
                        ORDER BY id ASC LIMIT ?2
                     )",
                    params![project_id, excess],
                )?
            } else {
                0
            };
            tx.commit()?;
            Ok(removed)
        })
        .await
        .map_err(map_tr_err)
}

/// Number of event records (any status) held for a project.
pub async fn count(db: &Database, project_id: &str) -> Result<usize, ParleyError> {
    let project_id = project_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM processed_events WHERE project_id = ?1",
                params![project_id],
                |row| row.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as usize)
        .map_err(map_tr_err)
}
