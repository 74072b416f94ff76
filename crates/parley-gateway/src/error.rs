// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mapping from engine errors to HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use parley_core::ParleyError;
use serde::Serialize;

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A [`ParleyError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub ParleyError);

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self(ParleyError::Validation {
            message: message.into(),
        })
    }

    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ParleyError::Validation { .. } | ParleyError::ToolRejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            ParleyError::SignatureVerificationFailed(_) => StatusCode::UNAUTHORIZED,
            ParleyError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ParleyError::EventInFlight { .. } | ParleyError::VersionConflict { .. } => {
                StatusCode::CONFLICT
            }
            ParleyError::AdapterTimeout { .. }
            | ParleyError::AdapterUnavailable { .. }
            | ParleyError::Provider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ParleyError::Config(_) | ParleyError::Storage { .. } | ParleyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ParleyError> for ApiError {
    fn from(e: ParleyError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self.0, "request failed");
            "internal error".to_string()
        } else {
            tracing::debug!(error = %self.0, status = %status, "request rejected");
            self.0.to_string()
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
