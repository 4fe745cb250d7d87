// Translation of controller errors into HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::controller::ControllerError;
use crate::envelope::OperationError;
use crate::types::FieldError;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] ControllerError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            err if err.is_conflict() => StatusCode::CONFLICT,
            err if err.validation().is_some() => StatusCode::BAD_REQUEST,
            ControllerError::BypassNotAllowed { .. } => StatusCode::BAD_REQUEST,
            ControllerError::Unsupported { .. } => StatusCode::NOT_FOUND,
            ControllerError::Operation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            match &self.0 {
                ControllerError::Operation(OperationError::Panicked { message, backtrace }) => {
                    error!(panic = %message, backtrace = %backtrace, "Request failed with a panic")
                }
                err => error!(error = %err, "Request failed"),
            }
        } else {
            debug!(status = %status, error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
            fields: self
                .0
                .validation()
                .map(|err| err.errors.clone())
                .unwrap_or_default(),
        };
        (status, Json(body)).into_response()
    }
}
