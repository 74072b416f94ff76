// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Authentication for the gateway.
//!
//! Conversation, job and memory routes take an optional bearer token
//! (`Authorization: Bearer <token>`). Channel inbound routes are
//! authenticated by HMAC instead, see [`ChannelGateway`].

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use parley_config::model::ChannelConfig;
use parley_core::ParleyError;
use parley_security::{SIGNATURE_HEADER, SignatureVerifier, TIMESTAMP_HEADER};

/// Bearer configuration for the API routes.
#[derive(Clone)]
pub struct AuthConfig {
    /// Expected bearer token. `None` leaves the API routes open.
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

/// Rejects requests without the configured bearer token.
pub async fn auth_middleware(
    State(auth): State<AuthConfig>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = auth.bearer_token.as_deref() else {
        return Ok(next.run(request).await);
    };
    let provided = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(next.run(request).await)
    } else {
        tracing::debug!(path = %request.uri().path(), "bearer auth rejected");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Inbound settings of one named channel.
#[derive(Clone, Debug)]
pub struct ChannelGateway {
    pub verifier: Option<SignatureVerifier>,
    pub project_id: Option<String>,
}

impl ChannelGateway {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            verifier: config.secret.as_ref().map(|secret| {
                SignatureVerifier::new(
                    secret.clone(),
                    Duration::from_secs(config.max_clock_drift_secs),
                )
            }),
            project_id: config.project_id.clone(),
        }
    }

    /// Checks the webhook headers against the raw body when a secret is set.
    pub fn verify(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), ParleyError> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        verifier.verify(header(TIMESTAMP_HEADER), header(SIGNATURE_HEADER), body, now)
    }
}

/// Channel gateways keyed by channel name.
pub fn channel_gateways(channels: &BTreeMap<String, ChannelConfig>) -> BTreeMap<String, ChannelGateway> {
    channels
        .iter()
        .map(|(name, config)| (name.clone(), ChannelGateway::from_config(config)))
        .collect()
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use chrono::Utc;

    use super::*;

    #[test]
    fn auth_config_debug_redacts_token() {
        let config = AuthConfig {
            bearer_token: Some("secret-token".to_string()),
        };
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains("secret-token"));
        assert!(debug_output.contains("[redacted]"));
    }

    #[test]
    fn unsigned_channel_accepts_anything() {
        let gateway = ChannelGateway::from_config(&ChannelConfig::default());
        assert!(gateway.verify(&HeaderMap::new(), b"{}", Utc::now()).is_ok());
    }

    #[test]
    fn signed_channel_checks_headers() {
        let gateway = ChannelGateway::from_config(&ChannelConfig {
            secret: Some("wa-secret".into()),
            ..ChannelConfig::default()
        });
        let body = br#"{"text":"hi"}"#;
        let now = Utc::now();

        let err = gateway.verify(&HeaderMap::new(), body, now).unwrap_err();
        assert!(matches!(err, ParleyError::SignatureVerificationFailed(_)));

        let mut headers = HeaderMap::new();
        for (name, value) in parley_security::signed_headers("wa-secret", body, now) {
            headers.insert(name, HeaderValue::from_str(&value).unwrap());
        }
        gateway.verify(&headers, body, now).unwrap();
        assert!(gateway.verify(&headers, br#"{"text":"hi!"}"#, now).is_err());
    }
}
