// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job persistence and the FIFO pending queue.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use parley_core::{Job, JobResult, JobStatus, ParleyError};
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{json_col, opt_json_col, opt_ts_col, to_json, ts_col, ts_to_sql};

const SELECT_COLUMNS: &str = "SELECT job_id, status, input, result, callback, callback_attempts, \
     callback_delivered, created_at, started_at, completed_at FROM jobs";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let status: String = row.get(1)?;
    let status = JobStatus::from_str(&status)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let attempts: i64 = row.get(5)?;
    Ok(Job {
        job_id: row.get(0)?,
        status,
        input: json_col(row, 2)?,
        result: opt_json_col(row, 3)?,
        callback: opt_json_col(row, 4)?,
        callback_attempts: attempts as u32,
        callback_delivered: row.get(6)?,
        created_at: ts_col(row, 7)?,
        started_at: opt_ts_col(row, 8)?,
        completed_at: opt_ts_col(row, 9)?,
    })
}

/// Insert a new job.
pub async fn insert_job(db: &Database, job: &Job) -> Result<(), ParleyError> {
    let job = job.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, status, input, result, callback, callback_attempts,
                                   callback_delivered, created_at, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.job_id,
                    job.status.to_string(),
                    to_json(&job.input)?,
                    job.result.as_ref().map(to_json).transpose()?,
                    job.callback.as_ref().map(to_json).transpose()?,
                    job.callback_attempts as i64,
                    job.callback_delivered,
                    ts_to_sql(&job.created_at),
                    job.started_at.as_ref().map(ts_to_sql),
                    job.completed_at.as_ref().map(ts_to_sql),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Get a job by id.
pub async fn get_job(db: &Database, job_id: &str) -> Result<Option<Job>, ParleyError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE job_id = ?1"),
                params![job_id],
                row_to_job,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Moves the oldest pending job to `running`.
pub async fn claim_next(db: &Database, now: DateTime<Utc>) -> Result<Option<Job>, ParleyError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let next = tx
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY id ASC LIMIT 1"),
                    [],
                    row_to_job,
                )
                .optional()?;
            let Some(mut job) = next else {
                return Ok(None);
            };
            tx.execute(
                "UPDATE jobs SET status = 'running', started_at = ?2 WHERE job_id = ?1",
                params![job.job_id, ts_to_sql(&now)],
            )?;
            tx.commit()?;
            job.status = JobStatus::Running;
            job.started_at = Some(now);
            Ok(Some(job))
        })
        .await
        .map_err(map_tr_err)
}

/// Writes the terminal result of a running job. `false` if it was not running.
pub async fn finish_job(
    db: &Database,
    job_id: &str,
    result: &JobResult,
    now: DateTime<Utc>,
) -> Result<bool, ParleyError> {
    let job_id = job_id.to_string();
    let result = result.clone();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE jobs SET status = ?2, result = ?3, completed_at = ?4
                 WHERE job_id = ?1 AND status = 'running'",
                params![
                    job_id,
                    result.status().to_string(),
                    to_json(&result)?,
                    ts_to_sql(&now),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
        .map_err(map_tr_err)
}

/// Updates callback bookkeeping only.
pub async fn record_callback(
    db: &Database,
    job_id: &str,
    attempts: u32,
    delivered: bool,
) -> Result<(), ParleyError> {
    let job_id = job_id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE jobs SET callback_attempts = ?2, callback_delivered = ?3 WHERE job_id = ?1",
                params![job_id, attempts as i64, delivered],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Returns interrupted `running` jobs to the queue.
///
/// Their row ids are older than any pending job, so FIFO order is kept.
pub async fn requeue_running(db: &Database) -> Result<usize, ParleyError> {
    db.connection()
        .call(|conn| {
            let changed = conn.execute(
                "UPDATE jobs SET status = 'pending', started_at = NULL WHERE status = 'running'",
                [],
            )?;
            Ok(changed)
        })
        .await
        .map_err(map_tr_err)
}

/// Terminal jobs with a callback that no delivery attempt was made for.
pub async fn undelivered_callbacks(db: &Database) -> Result<Vec<Job>, ParleyError> {
    db.connection()
        .call(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE status IN ('succeeded', 'failed')
                   AND callback IS NOT NULL
                   AND callback_delivered = 0 AND callback_attempts = 0
                 ORDER BY id ASC"
            ))?;
            let jobs = stmt
                .query_map([], row_to_job)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(jobs)
        })
        .await
        .map_err(map_tr_err)
}
