// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Security primitives for the Parley orchestration engine.
//!
//! Provides HMAC-SHA256 webhook signing shared by inbound channel
//! verification, outbound hook calls and job callbacks, plus secret redaction
//! for error messages built from upstream responses.

pub mod redact;
pub mod signing;

pub use redact::{Redactor, redact};
pub use signing::{SIGNATURE_HEADER, SignatureVerifier, TIMESTAMP_HEADER, sign, signed_headers};
