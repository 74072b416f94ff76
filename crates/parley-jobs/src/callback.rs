// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed push delivery of terminal job results.
//!
//! The body is `{job_id, status, result}`. When a secret is available (the
//! job's own, else the configured default) the request carries
//! `X-Webhook-Timestamp` and `X-Webhook-Signature` computed over
//! `timestamp + "." + body`. Transient failures are retried with doubling,
//! jittered backoff. The outcome is recorded on the job as bookkeeping only; status and
//! result are never touched.

use std::sync::Arc;
use std::time::Duration;

use parley_config::model::JobsConfig;
use parley_core::{Clock, Job, JobResult, JobStatus, JobStore, ParleyError};
use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use tracing::{debug, info, warn};

/// `base` plus up to half of it again, so retries from many jobs spread out.
fn jittered(base: Duration) -> Duration {
    let spread = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}

#[derive(Debug, Serialize)]
struct CallbackBody<'a> {
    job_id: &'a str,
    status: JobStatus,
    result: &'a JobResult,
}

/// How one delivery attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Attempt {
    Delivered,
    Transient(String),
    Rejected(StatusCode),
}

/// Delivery summary recorded on the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
    pub delivered: bool,
}

pub struct CallbackNotifier {
    client: reqwest::Client,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    max_retries: u32,
    backoff: Duration,
    default_secret: Option<String>,
}

impl CallbackNotifier {
    pub fn new(
        config: &JobsConfig,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ParleyError::Config(format!("failed to build callback HTTP client: {e}")))?;
        Ok(Self {
            client,
            store,
            clock,
            timeout: Duration::from_millis(config.callback_timeout_ms),
            max_retries: config.callback_max_retries,
            backoff: Duration::from_millis(config.callback_backoff_ms),
            default_secret: config.callback_secret.clone(),
        })
    }

    /// Delivers the terminal result of `job`, if it asked for a callback.
    ///
    /// Returns `None` when the job has no callback or is not terminal yet.
    pub async fn deliver(&self, job: &Job) -> Option<Delivery> {
        let callback = job.callback.as_ref()?;
        let result = job.result.as_ref()?;
        if !job.status.is_terminal() {
            return None;
        }

        let body = match serde_json::to_vec(&CallbackBody {
            job_id: &job.job_id,
            status: job.status,
            result,
        }) {
            Ok(body) => body,
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "callback body encoding failed");
                return None;
            }
        };
        let secret = callback.secret.as_deref().or(self.default_secret.as_deref());
        let timeout = callback
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.timeout);
        let max_retries = callback.max_retries.unwrap_or(self.max_retries);

        let mut delivery = Delivery {
            attempts: 0,
            delivered: false,
        };
        loop {
            delivery.attempts += 1;
            match self.attempt(&callback.url, secret, &body, timeout).await {
                Attempt::Delivered => {
                    delivery.delivered = true;
                    info!(job_id = %job.job_id, attempts = delivery.attempts, "callback delivered");
                    break;
                }
                Attempt::Rejected(status) => {
                    warn!(job_id = %job.job_id, status = %status, "callback rejected, not retrying");
                    break;
                }
                Attempt::Transient(reason) => {
                    let retry = delivery.attempts - 1;
                    if retry >= max_retries {
                        warn!(
                            job_id = %job.job_id,
                            attempts = delivery.attempts,
                            reason = %reason,
                            "callback delivery gave up"
                        );
                        break;
                    }
                    let delay = jittered(self.backoff.saturating_mul(1 << retry.min(16)));
                    debug!(job_id = %job.job_id, reason = %reason, ?delay, "callback failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        if let Err(e) = self
            .store
            .record_callback(&job.job_id, delivery.attempts, delivery.delivered)
            .await
        {
            warn!(job_id = %job.job_id, error = %e, "failed to record callback outcome");
        }
        Some(delivery)
    }

    async fn attempt(
        &self,
        url: &str,
        secret: Option<&str>,
        body: &[u8],
        timeout: Duration,
    ) -> Attempt {
        let mut request = self
            .client
            .post(url)
            .timeout(timeout)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(secret) = secret {
            for (name, value) in parley_security::signed_headers(secret, body, self.clock.now()) {
                request = request.header(name, value);
            }
        }
        match request.body(body.to_vec()).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Attempt::Delivered
                } else if status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::REQUEST_TIMEOUT
                    || status.is_server_error()
                {
                    Attempt::Transient(format!("status {status}"))
                } else {
                    Attempt::Rejected(status)
                }
            }
            Err(e) if e.is_timeout() => Attempt::Transient("timed out".into()),
            Err(e) => Attempt::Transient(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parley_core::{CallbackConfig, InboundEvent, SystemClock, TurnReply};
    use parley_security::{SIGNATURE_HEADER, SignatureVerifier, TIMESTAMP_HEADER};
    use parley_storage::InMemoryStorage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn jitter_stays_within_half_again() {
        let base = Duration::from_millis(200);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d >= base && d <= Duration::from_millis(300), "{d:?}");
        }
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }

    fn config() -> JobsConfig {
        JobsConfig {
            callback_timeout_ms: 2_000,
            callback_max_retries: 2,
            callback_backoff_ms: 5,
            ..JobsConfig::default()
        }
    }

    async fn finished_job(store: &InMemoryStorage, url: String, secret: Option<&str>) -> Job {
        let input = InboundEvent {
            message_id: "m1".into(),
            conversation_id: "web:s1".into(),
            project_id: "default".into(),
            customer_id: None,
            customer_name: None,
            text: "hi".into(),
            received_at: Utc::now(),
        };
        let callback = CallbackConfig {
            url,
            secret: secret.map(str::to_string),
            timeout_ms: None,
            max_retries: None,
        };
        let job = Job::pending("job_1", input, Some(callback), Utc::now());
        store.insert(&job).await.unwrap();
        store.claim_next(Utc::now()).await.unwrap();
        let result = JobResult::Reply(TurnReply {
            conversation_id: "web:s1".into(),
            message_id: "m1".into(),
            response_text: "hello".into(),
            domain: None,
            version: 1,
        });
        assert!(store.finish("job_1", &result, Utc::now()).await.unwrap());
        store.get("job_1").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn delivers_signed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/cb"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStorage::new());
        let job = finished_job(&store, format!("{}/cb", server.uri()), Some("cb-secret")).await;
        let notifier = CallbackNotifier::new(&config(), store.clone(), Arc::new(SystemClock)).unwrap();

        let delivery = notifier.deliver(&job).await.unwrap();
        assert_eq!(
            delivery,
            Delivery {
                attempts: 1,
                delivered: true
            }
        );

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(body["job_id"], "job_1");
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["result"]["response_text"], "hello");

        let timestamp = request.headers.get(TIMESTAMP_HEADER).unwrap().to_str().unwrap();
        let signature = request.headers.get(SIGNATURE_HEADER).unwrap().to_str().unwrap();
        let verifier = SignatureVerifier::new("cb-secret", Duration::from_secs(300));
        verifier
            .verify(Some(timestamp), Some(signature), &request.body, Utc::now())
            .unwrap();

        let stored = store.get("job_1").await.unwrap().unwrap();
        assert!(stored.callback_delivered);
        assert_eq!(stored.callback_attempts, 1);
    }

    #[tokio::test]
    async fn retries_server_errors_then_gives_up_without_touching_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStorage::new());
        let job = finished_job(&store, format!("{}/cb", server.uri()), None).await;
        let notifier = CallbackNotifier::new(&config(), store.clone(), Arc::new(SystemClock)).unwrap();

        let delivery = notifier.deliver(&job).await.unwrap();
        assert_eq!(delivery.attempts, 3);
        assert!(!delivery.delivered);

        let stored = store.get("job_1").await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Succeeded);
        assert_eq!(stored.result, job.result);
        assert_eq!(stored.callback_attempts, 3);
        assert!(!stored.callback_delivered);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStorage::new());
        let job = finished_job(&store, format!("{}/cb", server.uri()), None).await;
        let notifier = CallbackNotifier::new(&config(), store.clone(), Arc::new(SystemClock)).unwrap();

        let delivery = notifier.deliver(&job).await.unwrap();
        assert_eq!(delivery.attempts, 1);
        assert!(!delivery.delivered);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let store = Arc::new(InMemoryStorage::new());
        let job = finished_job(&store, format!("{}/cb", server.uri()), None).await;
        let notifier = CallbackNotifier::new(&config(), store.clone(), Arc::new(SystemClock)).unwrap();

        let delivery = notifier.deliver(&job).await.unwrap();
        assert_eq!(
            delivery,
            Delivery {
                attempts: 2,
                delivered: true
            }
        );
    }

    #[tokio::test]
    async fn job_without_callback_is_skipped() {
        let store = Arc::new(InMemoryStorage::new());
        let notifier = CallbackNotifier::new(&config(), store.clone(), Arc::new(SystemClock)).unwrap();
        let mut job = finished_job(&store, "http://127.0.0.1:9/cb".into(), None).await;
        job.callback = None;
        assert!(notifier.deliver(&job).await.is_none());
    }
}
