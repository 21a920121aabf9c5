use crate::config::ConfigError;
use crate::registration::{RegistrationServiceError, StoreError};
use crate::telemetry::TelemetryError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Store(StoreError),
    Registration(RegistrationServiceError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(err) => write!(f, "configuration error: {}", err),
            AppError::Telemetry(err) => write!(f, "telemetry error: {}", err),
            AppError::Io(err) => write!(f, "io error: {}", err),
            AppError::Store(err) => write!(f, "store error: {}", err),
            AppError::Registration(err) => write!(f, "registration error: {}", err),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Config(err) => Some(err),
            AppError::Telemetry(err) => Some(err),
            AppError::Io(err) => Some(err),
            AppError::Store(err) => Some(err),
            AppError::Registration(err) => Some(err),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Registration(RegistrationServiceError::InvalidDid(_)) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Registration(RegistrationServiceError::AlreadyRegistered { .. }) => {
                StatusCode::CONFLICT
            }
            AppError::Registration(RegistrationServiceError::UnknownDid(_))
            | AppError::Store(StoreError::NotFound(_))
            | AppError::Registration(RegistrationServiceError::Store(StoreError::NotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            AppError::Store(StoreError::Unavailable(_))
            | AppError::Registration(RegistrationServiceError::Store(StoreError::Unavailable(
                _,
            ))) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Config(_)
            | AppError::Telemetry(_)
            | AppError::Io(_)
            | AppError::Store(_)
            | AppError::Registration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Registration(
                err @ RegistrationServiceError::AlreadyRegistered { participant_id, .. },
            ) => json!({
                "error": err.to_string(),
                "participant_id": participant_id,
            }),
            AppError::Registration(err) => json!({ "error": err.to_string() }),
            AppError::Store(err) => json!({ "error": err.to_string() }),
            other => json!({ "error": other.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for AppError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for AppError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<RegistrationServiceError> for AppError {
    fn from(value: RegistrationServiceError) -> Self {
        Self::Registration(value)
    }
}
