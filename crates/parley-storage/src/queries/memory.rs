// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Customer slot and vector memory rows.

use parley_core::{CustomerKey, MemoryCleared, ParleyError, SlotRecord, VectorEntry};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{blob_to_vec, json_col, to_json, ts_col, ts_to_sql, vec_to_blob};

fn row_to_slot(row: &Row<'_>) -> rusqlite::Result<SlotRecord> {
    Ok(SlotRecord {
        key: row.get(0)?,
        value: row.get(1)?,
        written_at: ts_col(row, 2)?,
    })
}

/// Insert or overwrite a slot.
pub async fn put_slot(db: &Database, key: &CustomerKey, slot: SlotRecord) -> Result<(), ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO memory_slots (project_id, customer_id, key, value, written_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (project_id, customer_id, key) DO UPDATE
                 SET value = excluded.value, written_at = excluded.written_at",
                params![
                    key.project_id,
                    key.customer_id,
                    slot.key,
                    slot.value,
                    ts_to_sql(&slot.written_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_slot(
    db: &Database,
    key: &CustomerKey,
    name: &str,
) -> Result<Option<SlotRecord>, ParleyError> {
    let key = key.clone();
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                "SELECT key, value, written_at FROM memory_slots
                 WHERE project_id = ?1 AND customer_id = ?2 AND key = ?3",
                params![key.project_id, key.customer_id, name],
                row_to_slot,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// All slots of a customer, ordered by key.
pub async fn list_slots(db: &Database, key: &CustomerKey) -> Result<Vec<SlotRecord>, ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, written_at FROM memory_slots
                 WHERE project_id = ?1 AND customer_id = ?2 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![key.project_id, key.customer_id], row_to_slot)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn delete_slot(db: &Database, key: &CustomerKey, name: &str) -> Result<bool, ParleyError> {
    let key = key.clone();
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM memory_slots WHERE project_id = ?1 AND customer_id = ?2 AND key = ?3",
                params![key.project_id, key.customer_id, name],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Appends a vector and trims the customer's oldest entries beyond `capacity`.
pub async fn append_vector(
    db: &Database,
    key: &CustomerKey,
    entry: VectorEntry,
    capacity: usize,
) -> Result<Option<usize>, ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO memory_vectors
                 (entry_id, project_id, customer_id, embedding, text, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id,
                    key.project_id,
                    key.customer_id,
                    vec_to_blob(&entry.embedding),
                    entry.text,
                    to_json(&entry.metadata)?,
                    ts_to_sql(&entry.created_at),
                ],
            )?;
            if inserted == 0 {
                return Ok(None);
            }
            let evicted = tx.execute(
                "DELETE FROM memory_vectors WHERE id IN (
                    SELECT id FROM memory_vectors
                    WHERE project_id = ?1 AND customer_id = ?2
                    ORDER BY id DESC LIMIT -1 OFFSET ?3
                 )",
                params![key.project_id, key.customer_id, capacity as i64],
            )?;
            tx.commit()?;
            Ok(Some(evicted))
        })
        .await
        .map_err(map_tr_err)
}

/// All vectors of a customer, oldest first.
pub async fn list_vectors(db: &Database, key: &CustomerKey) -> Result<Vec<VectorEntry>, ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT entry_id, embedding, text, metadata, created_at FROM memory_vectors
                 WHERE project_id = ?1 AND customer_id = ?2 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![key.project_id, key.customer_id], |row| {
                let blob: Vec<u8> = row.get(1)?;
                Ok(VectorEntry {
                    id: row.get(0)?,
                    embedding: blob_to_vec(&blob),
                    text: row.get(2)?,
                    metadata: json_col(row, 3)?,
                    created_at: ts_col(row, 4)?,
                })
            })?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Deletes every slot and vector of a customer.
pub async fn clear(db: &Database, key: &CustomerKey) -> Result<MemoryCleared, ParleyError> {
    let key = key.clone();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            let slots = tx.execute(
                "DELETE FROM memory_slots WHERE project_id = ?1 AND customer_id = ?2",
                params![key.project_id, key.customer_id],
            )?;
            let vectors = tx.execute(
                "DELETE FROM memory_vectors WHERE project_id = ?1 AND customer_id = ?2",
                params![key.project_id, key.customer_id],
            )?;
            tx.commit()?;
            Ok(MemoryCleared { slots, vectors })
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 9, 0, 0).unwrap()
    }

    fn entry(id: &str) -> VectorEntry {
        VectorEntry {
            id: id.into(),
            embedding: vec![1.0, 0.0, 0.5],
            text: format!("note {id}"),
            metadata: serde_json::json!({"source": "test"}),
            created_at: t0(),
        }
    }

    #[tokio::test]
    async fn slots_overwrite_and_delete() {
        let db = Database::open_in_memory().await.unwrap();
        let key = CustomerKey::new("p", "c1");
        let slot = |v: &str| SlotRecord {
            key: "last_order_id".into(),
            value: v.into(),
            written_at: t0(),
        };
        put_slot(&db, &key, slot("ORDER-1")).await.unwrap();
        put_slot(&db, &key, slot("ORDER-2")).await.unwrap();
        assert_eq!(get_slot(&db, &key, "last_order_id").await.unwrap().unwrap().value, "ORDER-2");
        assert_eq!(list_slots(&db, &key).await.unwrap().len(), 1);

        // Other customers are isolated.
        assert!(get_slot(&db, &CustomerKey::new("p", "c2"), "last_order_id").await.unwrap().is_none());

        assert!(delete_slot(&db, &key, "last_order_id").await.unwrap());
        assert!(!delete_slot(&db, &key, "last_order_id").await.unwrap());
    }

    #[tokio::test]
    async fn vectors_evict_oldest_beyond_capacity() {
        let db = Database::open_in_memory().await.unwrap();
        let key = CustomerKey::new("p", "c1");
        let mut evicted = 0;
        for i in 0..5 {
            evicted += append_vector(&db, &key, entry(&format!("v{i}")), 3)
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(evicted, 2);
        let ids: Vec<_> = list_vectors(&db, &key).await.unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["v2", "v3", "v4"]);
    }

    #[tokio::test]
    async fn repeated_entry_id_is_ignored() {
        let db = Database::open_in_memory().await.unwrap();
        let key = CustomerKey::new("p", "c1");
        assert_eq!(append_vector(&db, &key, entry("v0"), 10).await.unwrap(), Some(0));
        assert_eq!(append_vector(&db, &key, entry("v0"), 10).await.unwrap(), None);
        assert_eq!(list_vectors(&db, &key).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vectors_keep_embedding_bytes() {
        let db = Database::open_in_memory().await.unwrap();
        let key = CustomerKey::new("p", "c1");
        append_vector(&db, &key, entry("v0"), 10).await.unwrap();
        let stored = list_vectors(&db, &key).await.unwrap();
        assert_eq!(stored[0], entry("v0"));
    }

    #[tokio::test]
    async fn clear_reports_counts() {
        let db = Database::open_in_memory().await.unwrap();
        let key = CustomerKey::new("p", "c1");
        append_vector(&db, &key, entry("v0"), 10).await.unwrap();
        append_vector(&db, &key, entry("v1"), 10).await.unwrap();
        put_slot(
            &db,
            &key,
            SlotRecord {
                key: "k".into(),
                value: "v".into(),
                written_at: t0(),
            },
        )
        .await
        .unwrap();
        let cleared = clear(&db, &key).await.unwrap();
        assert_eq!(cleared, MemoryCleared { slots: 1, vectors: 2 });
        assert!(list_vectors(&db, &key).await.unwrap().is_empty());
    }
}
