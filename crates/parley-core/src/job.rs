// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::conversation::{InboundEvent, TurnReply};

/// Lifecycle status of a job: `pending -> running -> {succeeded, failed}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Terminal result of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobResult {
    Reply(TurnReply),
    Error { message: String },
}

impl JobResult {
    pub fn status(&self) -> JobStatus {
        match self {
            JobResult::Reply(_) => JobStatus::Succeeded,
            JobResult::Error { .. } => JobStatus::Failed,
        }
    }
}

/// Where and how to push a job's terminal result.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackConfig {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl std::fmt::Debug for CallbackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackConfig")
            .field("url", &self.url)
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// A submitted asynchronous turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub input: InboundEvent,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub callback: Option<CallbackConfig>,
    #[serde(default)]
    pub callback_attempts: u32,
    #[serde(default)]
    pub callback_delivered: bool,
}

impl Job {
    /// A new pending job.
    pub fn pending(
        job_id: impl Into<String>,
        input: InboundEvent,
        callback: Option<CallbackConfig>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            input,
            result: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            callback,
            callback_attempts: 0,
            callback_delivered: false,
        }
    }
}
