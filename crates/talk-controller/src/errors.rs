//! Talk controller error types.
//!
//! Errors fall into three categories:
//!
//! - **Caller input** (`NotFound`, `InvalidRole`, `Unauthorized`, `InvalidState`, ...):
//!   surfaced immediately, never retried automatically.
//! - **Resource exhaustion** (`InsufficientPoints`, `NoTeacherAvailable`, ...):
//!   surfaced to the caller, who may retry later. No internal queueing.
//! - **Internal** (`InvariantViolation`, `Internal`, `Draining`): logged server-side,
//!   the offending operation is rejected before any state is mutated.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients never carry internal details.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Talk controller error type.
///
/// Maps to HTTP status codes:
/// - `NotFound`: 404
/// - `Unauthorized`: 401
/// - `InvalidRole`: 403
/// - `InvalidRequest`: 400
/// - `InvalidState`, `NotAvailable`, `AlreadyInSession`, `InvalidTransition`: 409
/// - `InsufficientPoints`, `InsufficientBalance`: 402
/// - `NoTeacherAvailable`, `Draining`: 503
/// - `InvariantViolation`, `Internal`: 500
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TalkError {
    /// User or session does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User has the wrong role for the operation (e.g. a teacher calling find-match).
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Caller is not a participant of the session, or no identity was supplied.
    #[error("Unauthorized")]
    Unauthorized,

    /// Session is not in a state that allows the operation.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Request payload failed validation.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// User is not `available` and cannot be matched.
    #[error("User is not available")]
    NotAvailable,

    /// User is currently in a session.
    #[error("User is already in a session")]
    AlreadyInSession,

    /// Availability transition is not allowed from the current state.
    #[error("Invalid availability transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Student cannot afford another session attempt.
    #[error("Insufficient points: balance {balance}, required {required}")]
    InsufficientPoints { balance: u64, required: u64 },

    /// Ledger debit would take the balance below zero.
    #[error("Insufficient balance: balance {balance}, required {required}")]
    InsufficientBalance { balance: u64, required: u64 },

    /// No compatible teacher is available right now.
    #[error("No teacher available")]
    NoTeacherAvailable,

    /// An internal invariant would have been broken (e.g. double match).
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Coordinator is shutting down.
    #[error("Controller is draining")]
    Draining,

    /// Internal error (channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error category, used for logging and retry guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input from the caller. Never retried automatically.
    CallerInput,
    /// A scarce resource is exhausted. The caller may retry later.
    ResourceExhausted,
    /// Internal failure. Logged, operation rejected.
    Internal,
}

impl TalkError {
    /// Returns the category for this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            TalkError::NotFound(_)
            | TalkError::InvalidRole(_)
            | TalkError::Unauthorized
            | TalkError::InvalidState(_)
            | TalkError::InvalidRequest(_)
            | TalkError::NotAvailable
            | TalkError::AlreadyInSession
            | TalkError::InvalidTransition { .. } => ErrorCategory::CallerInput,
            TalkError::InsufficientPoints { .. }
            | TalkError::InsufficientBalance { .. }
            | TalkError::NoTeacherAvailable
            | TalkError::Draining => ErrorCategory::ResourceExhausted,
            TalkError::InvariantViolation(_) | TalkError::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Returns the stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            TalkError::NotFound(_) => "NOT_FOUND",
            TalkError::InvalidRole(_) => "INVALID_ROLE",
            TalkError::Unauthorized => "UNAUTHORIZED",
            TalkError::InvalidState(_) => "INVALID_STATE",
            TalkError::InvalidRequest(_) => "INVALID_REQUEST",
            TalkError::NotAvailable => "NOT_AVAILABLE",
            TalkError::AlreadyInSession => "ALREADY_IN_SESSION",
            TalkError::InvalidTransition { .. } => "INVALID_TRANSITION",
            TalkError::InsufficientPoints { .. } => "INSUFFICIENT_POINTS",
            TalkError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            TalkError::NoTeacherAvailable => "NO_TEACHER_AVAILABLE",
            TalkError::Draining => "DRAINING",
            TalkError::InvariantViolation(_) | TalkError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            TalkError::NotFound(_) => StatusCode::NOT_FOUND,
            TalkError::Unauthorized => StatusCode::UNAUTHORIZED,
            TalkError::InvalidRole(_) => StatusCode::FORBIDDEN,
            TalkError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            TalkError::InvalidState(_)
            | TalkError::NotAvailable
            | TalkError::AlreadyInSession
            | TalkError::InvalidTransition { .. } => StatusCode::CONFLICT,
            TalkError::InsufficientPoints { .. } | TalkError::InsufficientBalance { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            TalkError::NoTeacherAvailable | TalkError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            TalkError::InvariantViolation(_) | TalkError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            TalkError::InvariantViolation(_) | TalkError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            TalkError::NoTeacherAvailable => {
                "No teacher is available right now, please try again later".to_string()
            }
            TalkError::Draining => "Server is shutting down, please try again".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for TalkError {
    fn into_response(self) -> Response {
        if self.category() == ErrorCategory::Internal {
            // Log actual error server-side, return generic message to client
            tracing::error!(target: "talk.http", error = %self, "Request failed with internal error");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}
