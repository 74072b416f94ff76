// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible APIs.
//!
//! Provides [`ApiClient`] which handles authentication, the per-request
//! timeout, and retry of transient failures with exponential backoff.

use std::time::Duration;

use parley_core::ParleyError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::ApiErrorResponse;

/// Name used in adapter errors.
const ADAPTER: &str = "provider";

/// Base delay before the first retry; doubles on every further attempt.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// HTTP client shared by the chat and embedding adapters.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ApiClient {
    /// Creates a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(
        base_url: &str,
        api_key: Option<&str>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, ParleyError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| ParleyError::Config(format!("invalid API key header value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| ParleyError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Overrides the base retry delay.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POSTs `body` as JSON to `{base_url}/{path}` and decodes the JSON answer.
    ///
    /// Timeouts, connection failures and 429/5xx answers are retried up to
    /// `max_retries` times. Once exhausted they surface as
    /// [`ParleyError::AdapterTimeout`] or [`ParleyError::AdapterUnavailable`].
    /// Any other failure is a [`ParleyError::Provider`] and is not retried.
    pub async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, ParleyError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut attempt = 0;
        loop {
            match self.try_once(&url, body).await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_delay * 2u32.saturating_pow(attempt);
                    warn!(attempt, error = %err, ?delay, "transient provider error, will retry");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn try_once<Req, Resp>(&self, url: &str, body: &Req) -> Result<Resp, ParleyError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        debug!(status = %status, url, "provider response received");

        let text = response.text().await.map_err(|e| self.classify(e))?;
        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| ParleyError::Provider {
                message: format!("failed to parse API response: {e}"),
                source: Some(Box::new(e)),
            });
        }

        let detail = match serde_json::from_str::<ApiErrorResponse>(&text) {
            Ok(api_err) => match api_err.error.type_ {
                Some(kind) => format!("API error ({kind}): {}", api_err.error.message),
                None => format!("API error: {}", api_err.error.message),
            },
            Err(_) => format!("API returned {status}: {text}"),
        };
        if is_transient_status(status) {
            Err(ParleyError::AdapterUnavailable {
                adapter: ADAPTER.to_string(),
                message: detail,
            })
        } else {
            Err(ParleyError::Provider {
                message: detail,
                source: None,
            })
        }
    }

    fn classify(&self, e: reqwest::Error) -> ParleyError {
        if e.is_timeout() {
            ParleyError::AdapterTimeout {
                adapter: ADAPTER.to_string(),
                duration: self.timeout,
            }
        } else if e.is_connect() || e.is_request() {
            ParleyError::AdapterUnavailable {
                adapter: ADAPTER.to_string(),
                message: e.to_string(),
            }
        } else {
            ParleyError::Provider {
                message: format!("HTTP request failed: {e}"),
                source: Some(Box::new(e)),
            }
        }
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn test_client(base_url: &str, max_retries: u32) -> ApiClient {
        ApiClient::new(base_url, Some("test-api-key"), Duration::from_millis(500), max_retries)
            .unwrap()
            .with_retry_delay(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn post_json_success_sends_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/echo"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/v1/", server.uri()), 0);
        let resp: Value = client.post_json("/echo", &json!({})).await.unwrap();
        assert_eq!(resp["ok"], true);
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(
                json!({"error": {"type": "rate_limit", "message": "slow down"}}),
            ))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"n": 2})))
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        let resp: Value = client.post_json("x", &json!({})).await.unwrap();
        assert_eq!(resp["n"], 2);
    }

    #[tokio::test]
    async fn exhausted_503_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(
                json!({"error": {"type": "overloaded", "message": "busy"}}),
            ))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        let err = client.post_json::<_, Value>("x", &json!({})).await.unwrap_err();
        assert!(matches!(err, ParleyError::AdapterUnavailable { .. }), "got: {err}");
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(
                json!({"error": {"type": "invalid_request_error", "message": "bad model"}}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 3);
        let err = client.post_json::<_, Value>("x", &json!({})).await.unwrap_err();
        assert!(matches!(err, ParleyError::Provider { .. }));
        assert!(err.to_string().contains("invalid_request_error"), "got: {err}");
    }

    #[tokio::test]
    async fn slow_answer_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = ApiClient::new(&server.uri(), None, Duration::from_millis(100), 0).unwrap();
        let err = client.post_json::<_, Value>("x", &json!({})).await.unwrap_err();
        assert!(matches!(err, ParleyError::AdapterTimeout { .. }), "got: {err}");
    }
}
