// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HMAC-SHA256 webhook signatures.
//!
//! The same scheme is used in every direction: inbound channel gateways,
//! outbound domain hooks and job callbacks. The signed payload is
//! `timestamp + "." + raw_body`; the signature is the standard base64 of the
//! MAC. Timestamps are Unix seconds.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parley_core::ParleyError;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signing timestamp (Unix seconds).
pub const TIMESTAMP_HEADER: &str = "X-Webhook-Timestamp";

/// Header carrying `base64(HMAC_SHA256(secret, timestamp + "." + body))`.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Computes the base64 signature of `body` at `timestamp`.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    STANDARD.encode(mac_for(secret, timestamp, body).finalize().into_bytes())
}

/// Timestamp and signature header pairs for an outbound request.
pub fn signed_headers(
    secret: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> [(&'static str, String); 2] {
    let timestamp = now.timestamp().to_string();
    let signature = sign(secret, &timestamp, body);
    [(TIMESTAMP_HEADER, timestamp), (SIGNATURE_HEADER, signature)]
}

/// Verifies inbound signatures against one secret with a clock-drift bound.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    max_drift: chrono::Duration,
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, max_drift: std::time::Duration) -> Self {
        Self {
            secret: secret.into(),
            max_drift: chrono::Duration::from_std(max_drift)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    /// Checks the headers of a request against its raw body.
    ///
    /// Fails if either header is missing, the timestamp is unparseable or
    /// further than the allowed drift from `now` in either direction, or the
    /// signature does not match. The MAC comparison is constant time.
    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<(), ParleyError> {
        let timestamp = timestamp
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| reject(format!("missing {TIMESTAMP_HEADER} header")))?;
        let signature = signature
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| reject(format!("missing {SIGNATURE_HEADER} header")))?;

        let signed_at = parse_timestamp(timestamp)
            .ok_or_else(|| reject(format!("unparseable timestamp `{timestamp}`")))?;
        let drift = (now - signed_at).abs();
        if drift > self.max_drift {
            return Err(reject(format!(
                "timestamp outside allowed drift ({}s > {}s)",
                drift.num_seconds(),
                self.max_drift.num_seconds()
            )));
        }

        let provided = STANDARD
            .decode(signature)
            .map_err(|_| reject("signature is not valid base64".to_string()))?;
        mac_for(&self.secret, timestamp, body)
            .verify_slice(&provided)
            .map_err(|_| reject("signature mismatch".to_string()))
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("max_drift", &self.max_drift)
            .finish()
    }
}

fn reject(reason: String) -> ParleyError {
    tracing::debug!(reason = %reason, "signature rejected");
    ParleyError::SignatureVerificationFailed(reason)
}

/// Accepts Unix seconds or an RFC 3339 timestamp.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
