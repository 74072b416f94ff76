// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley orchestration engine.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Parley stores, adapters and the turn pipeline.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Malformed stage input or tool arguments.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Another delivery of the same inbound event is still being processed.
    #[error("event {message_id} is still being processed, retry shortly")]
    EventInFlight { message_id: String },

    /// An external adapter did not answer within its deadline.
    #[error("{adapter} timed out after {duration:?}")]
    AdapterTimeout { adapter: String, duration: Duration },

    /// An external adapter answered with a transient failure or could not be reached.
    #[error("{adapter} unavailable: {message}")]
    AdapterUnavailable { adapter: String, message: String },

    /// Inbound or callback signature did not verify.
    #[error("signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    /// A compare-and-swap lost against a concurrent writer.
    #[error("conversation {conversation_id} changed concurrently (expected version {expected})")]
    VersionConflict {
        conversation_id: String,
        expected: u64,
    },

    /// Polled job does not exist.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A tool call was refused before execution (unknown name, bad arguments).
    #[error("tool call `{tool}` rejected: {reason}")]
    ToolRejected { tool: String, reason: String },

    /// LLM or embedding provider errors that are not transient.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Wraps any error as a storage failure.
    pub fn storage<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            source: Box::new(err),
        }
    }

    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AdapterTimeout { .. } | Self::AdapterUnavailable { .. }
        )
    }

    /// Whether this error should be shown to the end user as a "try again" reply
    /// rather than failing the turn.
    pub fn is_adapter_failure(&self) -> bool {
        self.is_transient() || matches!(self, Self::Provider { .. })
    }
}
