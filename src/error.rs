use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{
        guess::GuessRejection,
        round::InvalidRoundTransition,
        state_machine::{ApplyError, InvalidTransition},
    },
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Command is not legal in the current phase.
    #[error("{0}")]
    InvalidTransition(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A concurrent write won and retrying did not help.
    #[error("concurrent update: {0}")]
    Conflict(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict { message } => ServiceError::Conflict(message),
            StorageError::Rejected { message } => ServiceError::InvalidInput(message),
            other => ServiceError::Unavailable(other),
        }
    }
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        ServiceError::InvalidTransition(err.to_string())
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        ServiceError::Conflict(err.to_string())
    }
}

impl From<InvalidRoundTransition> for ServiceError {
    fn from(err: InvalidRoundTransition) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<GuessRejection> for ServiceError {
    fn from(err: GuessRejection) -> Self {
        match err {
            GuessRejection::OutOfRange { .. } | GuessRejection::NegativeOverride => {
                ServiceError::InvalidInput(err.to_string())
            }
            _ => ServiceError::InvalidState(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidTransition(message)
            | ServiceError::InvalidState(message)
            | ServiceError::Conflict(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::GamePhase;
    use crate::state::state_machine::GameEvent;

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn engine_errors_map_to_http_status() {
        let invalid = InvalidTransition {
            from: GamePhase::Results,
            event: GameEvent::ScoreRound,
        };
        assert_eq!(status_of(invalid.into()), StatusCode::CONFLICT);
        assert_eq!(
            status_of(StorageError::conflict("version").into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(GuessRejection::DeadlinePassed.into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(GuessRejection::NegativeOverride.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StorageError::rejected("balance overflow").into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(ServiceError::NotFound("game".into())),
            StatusCode::NOT_FOUND
        );
    }
}
