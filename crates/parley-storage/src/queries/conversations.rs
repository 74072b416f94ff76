// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Versioned conversation reads and compare-and-swap writes.

use std::str::FromStr;

use parley_core::{Conversation, Domain, ParleyError};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{json_col, to_json, ts_col, ts_to_sql};

const SELECT_COLUMNS: &str = "SELECT conversation_id, project_id, customer_id, active_domain, \
     state, history, version, updated_at FROM conversations";

fn row_to_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let active_domain: Option<String> = row.get(3)?;
    let active_domain = active_domain
        .map(|raw| {
            Domain::from_str(&raw)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))
        })
        .transpose()?;
    let version: i64 = row.get(6)?;
    Ok(Conversation {
        conversation_id: row.get(0)?,
        project_id: row.get(1)?,
        customer_id: row.get(2)?,
        active_domain,
        state: json_col(row, 4)?,
        history: json_col(row, 5)?,
        version: version as u64,
        updated_at: ts_col(row, 7)?,
    })
}

/// Get a conversation by id.
pub async fn get_conversation(
    db: &Database,
    conversation_id: &str,
) -> Result<Option<Conversation>, ParleyError> {
    let id = conversation_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE conversation_id = ?1"),
                params![id],
                row_to_conversation,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Writes `conversation` if the stored version equals `expected_version`.
///
/// Version zero inserts; anything else updates the matching row. Either way a
/// lost race changes no rows and surfaces as [`ParleyError::VersionConflict`].
pub async fn compare_and_swap(
    db: &Database,
    expected_version: u64,
    conversation: &Conversation,
) -> Result<(), ParleyError> {
    if conversation.version != expected_version + 1 {
        return Err(ParleyError::Internal(format!(
            "conversation {} carries version {} for expected {}",
            conversation.conversation_id, conversation.version, expected_version
        )));
    }
    let c = conversation.clone();
    let changed = db
        .connection()
        .call(move |conn| {
            let state = to_json(&c.state)?;
            let history = to_json(&c.history)?;
            let domain = c.active_domain.map(|d| d.to_string());
            let updated_at = ts_to_sql(&c.updated_at);
            if expected_version == 0 {
                conn.execute(
                    "INSERT OR IGNORE INTO conversations
                     (conversation_id, project_id, customer_id, active_domain, state, history, version, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        c.conversation_id,
                        c.project_id,
                        c.customer_id,
                        domain,
                        state,
                        history,
                        c.version as i64,
                        updated_at,
                    ],
                )
            } else {
                conn.execute(
                    "UPDATE conversations
                     SET customer_id = ?2, active_domain = ?3, state = ?4, history = ?5,
                         version = ?6, updated_at = ?7
                     WHERE conversation_id = ?1 AND version = ?8",
                    params![
                        c.conversation_id,
                        c.customer_id,
                        domain,
                        state,
                        history,
                        c.version as i64,
                        updated_at,
                        expected_version as i64,
                    ],
                )
            }
        })
        .await
        .map_err(map_tr_err)?;

    if changed == 1 {
        Ok(())
    } else {
        Err(ParleyError::VersionConflict {
            conversation_id: conversation.conversation_id.clone(),
            expected: expected_version,
        })
    }
}
