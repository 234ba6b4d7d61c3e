use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Canonical error kinds for the relay pipeline (spec §7).
///
/// Each variant maps to one HTTP status at the front door and to one retry
/// policy inside the orchestrator. Adaptors classify upstream failures into
/// these kinds; the orchestrator never re-derives policy from a status code
/// once an error has been classified.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("auth error: {0}")]
    Auth(String),

    #[error("permission error: {0}")]
    Permission(String),

    #[error("quota insufficient: {0}")]
    QuotaInsufficient(String),

    #[error("no available channel for group={group} model={model}")]
    NoAvailableChannel { group: String, model: String },

    #[error("tool not allowed: {0}")]
    ToolNotAllowed(String),

    #[error("tool not priced: {0}")]
    ToolNotPriced(String),

    #[error("upstream transient error: {0}")]
    UpstreamTransient(String),

    #[error("upstream permanent error: {0}")]
    UpstreamPermanent(String),

    #[error("channel fault: {0}")]
    ChannelFault(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("request canceled")]
    Canceled,

    #[error("quota invariant violation: {0}")]
    QuotaInvariantViolation(String),

    #[error("http error: {0}")]
    Http(String),

    #[error("json error: {0}")]
    Json(String),
}

impl GatewayError {
    /// HTTP status this error kind surfaces at the front door (spec §7).
    pub fn status_code(&self) -> u16 {
        match self {
            GatewayError::Auth(_) => 401,
            GatewayError::Permission(_) => 403,
            GatewayError::QuotaInsufficient(_) => 402,
            GatewayError::NoAvailableChannel { .. } => 503,
            GatewayError::ToolNotAllowed(_) | GatewayError::ToolNotPriced(_) => 400,
            GatewayError::UpstreamTransient(_) => 502,
            GatewayError::UpstreamPermanent(_) => 502,
            GatewayError::ChannelFault(_) => 502,
            GatewayError::Internal(_) | GatewayError::QuotaInvariantViolation(_) => 500,
            GatewayError::Canceled => 499,
            GatewayError::Http(_) => 502,
            GatewayError::Json(_) => 500,
        }
    }

    /// Whether the orchestrator may retry this error on a different channel.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::UpstreamTransient(_) | GatewayError::ChannelFault(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Json(format!("{err} at line {} column {}", err.line(), err.column()))
    }
}

impl From<http::Error> for GatewayError {
    fn from(err: http::Error) -> Self {
        GatewayError::Http(err.to_string())
    }
}

impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::Internal(format!("invalid url: {err}"))
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Internal(format!("store error: {err}"))
    }
}

/// Front-door envelope (spec §6): `{success, message, data}` with the status
/// code named per-variant in [`GatewayError::status_code`].
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "success": false,
            "message": self.to_string(),
            "data": null,
        }));
        (status, body).into_response()
    }
}
