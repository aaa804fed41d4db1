//! HTTP-facing errors.
//!
//! Every handler returns [`ObserverError`]; orchestrator failures convert
//! into it so control endpoints can use `?`. Responses carry a JSON body
//! `{"error": "...", "status": 409}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use society_core::clock::ClockError;
use society_core::orchestrator::OrchestratorError;

/// Errors that can occur in the Observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An invalid query parameter or request body was provided.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request conflicts with the simulation's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A collaborator the endpoint needs is not configured.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<OrchestratorError> for ObserverError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::UnknownAgent { .. } => Self::NotFound(err.to_string()),
            OrchestratorError::Clock {
                source: ClockError::InvalidSpeed { .. },
            } => Self::InvalidRequest(err.to_string()),
            OrchestratorError::TickReceiverUnavailable => Self::Internal(err.to_string()),
            OrchestratorError::AgentExists { .. }
            | OrchestratorError::NotRunning
            | OrchestratorError::StepAbandoned { .. }
            | OrchestratorError::Clock { .. } => Self::Conflict(err.to_string()),
        }
    }
}

impl ObserverError {
    /// The HTTP status this error is reported with.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Serialization(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            Self::NotFound(msg)
            | Self::InvalidRequest(msg)
            | Self::Conflict(msg)
            | Self::Unavailable(msg)
            | Self::Internal(msg) => msg,
            Self::Serialization(e) => format!("JSON error: {e}"),
        };
        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });
        (status, axum::Json(body)).into_response()
    }
}
