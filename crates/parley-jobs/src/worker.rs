// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-size worker pool draining the pending-job queue.
//!
//! Each worker claims the oldest pending job (`pending -> running`), runs the
//! synchronous turn, writes the terminal result once and then pushes the
//! callback if the job asked for one. Idle workers sleep until woken by a
//! submission or the poll interval elapses. Cancellation is checked between
//! jobs only, so a job that has started always reaches a terminal state.
//!
//! A process that dies mid-job leaves it `running`. [`WorkerPool::recover`]
//! runs before the workers start: it requeues such jobs and sends callbacks
//! that were never attempted. Re-running a job's turn is safe because the
//! idempotency guard replays a message that already completed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parley_config::model::JobsConfig;
use parley_core::{Clock, InboundEvent, Job, JobResult, JobStore, ParleyError, TurnReply};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Attempts at storing a terminal result before leaving it to [`WorkerPool::recover`].
const FINISH_ATTEMPTS: u32 = 3;

use crate::callback::CallbackNotifier;

/// Executes one synchronous turn on behalf of a job.
#[async_trait]
pub trait TurnRunner: Send + Sync + 'static {
    async fn run_turn(&self, input: InboundEvent) -> Result<TurnReply, ParleyError>;
}

pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    runner: Arc<dyn TurnRunner>,
    notifier: Option<Arc<CallbackNotifier>>,
    clock: Arc<dyn Clock>,
    wake: Arc<Notify>,
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        config: &JobsConfig,
        store: Arc<dyn JobStore>,
        runner: Arc<dyn TurnRunner>,
        clock: Arc<dyn Clock>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            runner,
            notifier: None,
            clock,
            wake,
            workers: config.workers.max(1),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<CallbackNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Spawns the workers. They exit once `shutdown` is cancelled and their
    /// current job, if any, is finished.
    pub fn spawn(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let pool = Arc::new(self);
        info!(workers = pool.workers, "starting job workers");
        (0..pool.workers)
            .map(|worker| {
                let pool = Arc::clone(&pool);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.work(worker, shutdown).await })
            })
            .collect()
    }

    async fn work(&self, worker: usize, shutdown: CancellationToken) {
        debug!(worker, "job worker started");
        while !shutdown.is_cancelled() {
            match self.run_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => warn!(worker, error = %e, "job queue read failed"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(worker, "job worker stopped");
    }

    /// Requeues jobs interrupted by an earlier process and sends the callbacks
    /// it never attempted. Call once, before [`spawn`](Self::spawn).
    ///
    /// Returns the number of requeued jobs.
    pub async fn recover(&self) -> Result<usize, ParleyError> {
        let requeued = self.store.requeue_running().await?;
        if requeued > 0 {
            warn!(requeued, "requeued jobs interrupted by a previous run");
        }
        if let Some(notifier) = &self.notifier {
            for job in self.store.undelivered_callbacks().await? {
                info!(job_id = %job.job_id, "resuming callback delivery");
                notifier.deliver(&job).await;
            }
        }
        Ok(requeued)
    }

    /// Claims and runs one pending job. Returns `false` when the queue is empty.
    pub async fn run_next(&self) -> Result<bool, ParleyError> {
        let Some(job) = self.store.claim_next(self.clock.now()).await? else {
            return Ok(false);
        };
        self.process(job).await;
        Ok(true)
    }

    async fn process(&self, job: Job) {
        debug!(job_id = %job.job_id, conversation_id = %job.input.conversation_id, "job running");
        let runner = Arc::clone(&self.runner);
        let input = job.input.clone();
        let result = match tokio::spawn(async move { runner.run_turn(input).await }).await {
            Ok(Ok(reply)) => JobResult::Reply(reply),
            Ok(Err(e)) => {
                warn!(job_id = %job.job_id, error = %e, "job turn failed");
                JobResult::Error {
                    message: e.to_string(),
                }
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "job turn panicked");
                JobResult::Error {
                    message: "internal error while processing the message".into(),
                }
            }
        };

        if !self.store_result(&job.job_id, &result).await {
            return;
        }

        if let Some(notifier) = &self.notifier
            && job.callback.is_some()
        {
            match self.store.get(&job.job_id).await {
                Ok(Some(finished)) => {
                    notifier.deliver(&finished).await;
                }
                Ok(None) => warn!(job_id = %job.job_id, "finished job disappeared before callback"),
                Err(e) => warn!(job_id = %job.job_id, error = %e, "failed to reload job for callback"),
            }
        }
    }

    /// Writes the terminal result; `true` when this call stored it.
    async fn store_result(&self, job_id: &str, result: &JobResult) -> bool {
        let mut attempt = 1;
        loop {
            match self.store.finish(job_id, result, self.clock.now()).await {
                Ok(true) => {
                    info!(job_id, status = %result.status(), "job finished");
                    return true;
                }
                Ok(false) => {
                    warn!(job_id, "job was not running, result discarded");
                    return false;
                }
                Err(e) if attempt < FINISH_ATTEMPTS => {
                    warn!(job_id, attempt, error = %e, "failed to store job result, retrying");
                    attempt += 1;
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => {
                    error!(job_id, error = %e, "failed to store job result, left for recovery");
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use parley_core::{CallbackConfig, JobStatus, SystemClock};
    use parley_storage::InMemoryStorage;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::JobService;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TurnRunner for Echo {
        async fn run_turn(&self, input: InboundEvent) -> Result<TurnReply, ParleyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input.text == "fail" {
                return Err(ParleyError::Internal("boom".into()));
            }
            Ok(TurnReply {
                conversation_id: input.conversation_id,
                message_id: input.message_id,
                response_text: format!("echo: {}", input.text),
                domain: None,
                version: 1,
            })
        }
    }

    /// Blocks inside the turn until released.
    struct Gated {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl TurnRunner for Gated {
        async fn run_turn(&self, input: InboundEvent) -> Result<TurnReply, ParleyError> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(TurnReply {
                conversation_id: input.conversation_id,
                message_id: input.message_id,
                response_text: "done".into(),
                domain: None,
                version: 1,
            })
        }
    }

    struct Panics;

    #[async_trait]
    impl TurnRunner for Panics {
        async fn run_turn(&self, _input: InboundEvent) -> Result<TurnReply, ParleyError> {
            panic!("turn exploded")
        }
    }

    fn event(id: &str, text: &str) -> InboundEvent {
        InboundEvent {
            message_id: id.into(),
            conversation_id: "web:s1".into(),
            project_id: "default".into(),
            customer_id: None,
            customer_name: None,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    fn setup() -> (JobService, WorkerPool, Arc<Echo>) {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = JobService::new(Arc::clone(&store), Arc::clone(&clock));
        let runner = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let config = JobsConfig {
            workers: 2,
            poll_interval_ms: 10,
            ..JobsConfig::default()
        };
        let pool = WorkerPool::new(&config, store, runner.clone(), clock, service.wake_handle());
        (service, pool, runner)
    }

    #[tokio::test]
    async fn run_next_moves_job_to_terminal_once() {
        let (service, pool, runner) = setup();
        let ok = service.submit(event("m1", "hi"), None).await.unwrap();
        let bad = service.submit(event("m2", "fail"), None).await.unwrap();

        assert!(pool.run_next().await.unwrap());
        assert!(pool.run_next().await.unwrap());
        assert!(!pool.run_next().await.unwrap());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

        let job = service.poll(&ok).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.started_at.is_some() && job.completed_at.is_some());
        match job.result {
            Some(JobResult::Reply(reply)) => assert_eq!(reply.response_text, "echo: hi"),
            other => panic!("unexpected result {other:?}"),
        }

        let job = service.poll(&bad).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(matches!(job.result, Some(JobResult::Error { ref message }) if message.contains("boom")));
    }

    #[tokio::test]
    async fn spawned_workers_drain_queue_and_stop_on_shutdown() {
        let (service, pool, runner) = setup();
        let shutdown = CancellationToken::new();
        let handles = pool.spawn(shutdown.clone());

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(service.submit(event(&format!("m{i}"), "hi"), None).await.unwrap());
        }

        for id in &ids {
            let mut status = JobStatus::Pending;
            for _ in 0..200 {
                status = service.poll(id).await.unwrap().status;
                if status.is_terminal() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(status, JobStatus::Succeeded);
        }
        assert_eq!(runner.calls.load(Ordering::SeqCst), 5);

        shutdown.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn terminal_job_triggers_callback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store: Arc<dyn JobStore> = Arc::new(InMemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = JobService::new(Arc::clone(&store), Arc::clone(&clock));
        let config = JobsConfig {
            callback_backoff_ms: 5,
            ..JobsConfig::default()
        };
        let notifier = Arc::new(
            CallbackNotifier::new(&config, Arc::clone(&store), Arc::clone(&clock)).unwrap(),
        );
        let pool = WorkerPool::new(
            &config,
            Arc::clone(&store),
            Arc::new(Echo {
                calls: AtomicUsize::new(0),
            }),
            clock,
            service.wake_handle(),
        )
        .with_notifier(notifier);

        let callback = CallbackConfig {
            url: format!("{}/done", server.uri()),
            secret: Some("s".into()),
            timeout_ms: None,
            max_retries: None,
        };
        let id = service.submit(event("m1", "hi"), Some(callback)).await.unwrap();
        assert!(pool.run_next().await.unwrap());

        let job = service.poll(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.callback_delivered);
        assert_eq!(job.callback_attempts, 1);
    }

    #[tokio::test]
    async fn poll_sees_running_then_a_stable_result() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = JobService::new(Arc::clone(&store), Arc::clone(&clock));
        let gate = Arc::new(Gated {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let pool = Arc::new(WorkerPool::new(
            &JobsConfig::default(),
            store,
            gate.clone(),
            clock,
            service.wake_handle(),
        ));

        let id = service.submit(event("m1", "hi"), None).await.unwrap();
        assert_eq!(service.poll(&id).await.unwrap().status, JobStatus::Pending);

        let worker = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.run_next().await })
        };
        gate.entered.notified().await;

        let running = service.poll(&id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());
        assert!(running.result.is_none());

        gate.release.notify_one();
        assert!(worker.await.unwrap().unwrap());

        let first = service.poll(&id).await.unwrap();
        let second = service.poll(&id).await.unwrap();
        assert_eq!(first.status, JobStatus::Succeeded);
        assert_eq!(first.status, second.status);
        assert_eq!(first.result, second.result);
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[tokio::test]
    async fn panicking_turn_fails_the_job() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = JobService::new(Arc::clone(&store), Arc::clone(&clock));
        let pool = WorkerPool::new(
            &JobsConfig::default(),
            store,
            Arc::new(Panics),
            clock,
            service.wake_handle(),
        );

        let id = service.submit(event("m1", "hi"), None).await.unwrap();
        assert!(pool.run_next().await.unwrap());
        let job = service.poll(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(matches!(job.result, Some(JobResult::Error { .. })));
    }

    #[tokio::test]
    async fn recover_requeues_interrupted_jobs_and_resumes_callbacks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store: Arc<dyn JobStore> = Arc::new(InMemoryStorage::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let service = JobService::new(Arc::clone(&store), Arc::clone(&clock));
        let callback = CallbackConfig {
            url: format!("{}/done", server.uri()),
            secret: Some("s".into()),
            timeout_ms: None,
            max_retries: None,
        };

        // Finished by an earlier run that stopped before its callback.
        let done = service.submit(event("m1", "hi"), Some(callback)).await.unwrap();
        store.claim_next(clock.now()).await.unwrap();
        let failed = JobResult::Error {
            message: "boom".into(),
        };
        assert!(store.finish(&done, &failed, clock.now()).await.unwrap());

        // Claimed by an earlier run that never finished it.
        let stuck = service.submit(event("m2", "hi"), None).await.unwrap();
        store.claim_next(clock.now()).await.unwrap();
        assert_eq!(service.poll(&stuck).await.unwrap().status, JobStatus::Running);

        let config = JobsConfig {
            callback_backoff_ms: 5,
            ..JobsConfig::default()
        };
        let notifier = Arc::new(
            CallbackNotifier::new(&config, Arc::clone(&store), Arc::clone(&clock)).unwrap(),
        );
        let runner = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let pool = WorkerPool::new(
            &config,
            Arc::clone(&store),
            runner.clone(),
            clock,
            service.wake_handle(),
        )
        .with_notifier(notifier);

        assert_eq!(pool.recover().await.unwrap(), 1);
        let delivered = service.poll(&done).await.unwrap();
        assert!(delivered.callback_delivered);
        assert_eq!(delivered.status, JobStatus::Failed);
        assert_eq!(service.poll(&stuck).await.unwrap().status, JobStatus::Pending);

        assert!(pool.run_next().await.unwrap());
        assert_eq!(service.poll(&stuck).await.unwrap().status, JobStatus::Succeeded);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        // A second recovery finds nothing left to do.
        assert_eq!(pool.recover().await.unwrap(), 0);
    }
}
