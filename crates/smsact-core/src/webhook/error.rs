//! Webhook handler error types and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors the webhook endpoint can answer with.
///
/// The mapping encodes the retry contract with the provider: only
/// `UnknownActivation` solicits a redelivery. Reconciliation halts and
/// invariant violations never appear here — those are acknowledged with
/// 200 so the provider stops retrying something that will never become
/// interesting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// The request body was not a parseable envelope or activation
    /// payload.
    #[error("malformed payload: {message}")]
    MalformedPayload {
        /// What failed to parse.
        message: String,
    },

    /// The event names an activation this instance has not persisted
    /// (yet). Answered with a retryable status: the record may still be
    /// in flight from the purchase path.
    #[error("unknown activation: {activation_id}")]
    UnknownActivation {
        /// Id the event named.
        activation_id: String,
    },

    /// The ingress rate limiter rejected the source.
    #[error("rate limit exceeded")]
    RateLimitExceeded,

    /// Storage failed while loading or saving the record.
    #[error("internal error: {message}")]
    Internal {
        /// Underlying failure.
        message: String,
    },
}

impl WebhookError {
    /// HTTP status this error answers with.
    ///
    /// - Malformed payload: 400 (surfaced, not silently swallowed)
    /// - Unknown activation: 404 (retry-soliciting — "not persisted yet,
    ///   try again")
    /// - Rate limited: 429
    /// - Internal: 500
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedPayload { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownActivation { .. } => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        // Bodies stay generic: no storage details or payload echoes leak
        // back to the caller.
        let status = self.status_code();
        let body = match &self {
            Self::MalformedPayload { .. } => "malformed payload",
            Self::UnknownActivation { .. } => "unknown activation",
            Self::RateLimitExceeded => "rate limit exceeded",
            Self::Internal { .. } => "internal error",
        };
        (status, body).into_response()
    }
}
