// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job submission and polling.

use std::sync::Arc;

use parley_core::{CallbackConfig, Clock, InboundEvent, Job, JobStore, ParleyError};
use tokio::sync::Notify;
use tracing::info;

/// Front door of the job subsystem.
///
/// `submit` persists a pending job and wakes one idle worker. `poll` is a
/// plain read and may be called any number of times.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            wake: Arc::new(Notify::new()),
        }
    }

    /// Handle the worker pool waits on.
    pub fn wake_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Persists a pending job for `input` and returns its id.
    pub async fn submit(
        &self,
        input: InboundEvent,
        callback: Option<CallbackConfig>,
    ) -> Result<String, ParleyError> {
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        let job = Job::pending(job_id.clone(), input, callback, self.clock.now());
        self.store.insert(&job).await?;
        info!(
            job_id = %job_id,
            conversation_id = %job.input.conversation_id,
            message_id = %job.input.message_id,
            callback = job.callback.is_some(),
            "job submitted"
        );
        self.wake.notify_one();
        Ok(job_id)
    }

    pub async fn poll(&self, job_id: &str) -> Result<Job, ParleyError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| ParleyError::JobNotFound(job_id.to_string()))
    }
}
