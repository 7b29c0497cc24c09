use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;

use crate::jobs::RepairError;
use crate::lifecycle::TransitionError;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `NOT_FOUND`, `CONFLICT`,
    /// `INTERNAL_ERROR`.
    pub code: &'static str,
    /// Human-readable error description.
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<TransitionError> for AppError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::NotFound(id) => AppError::NotFound(format!("Content {id} not found")),
            TransitionError::Db(e) => AppError::Internal(e.to_string()),
            other => AppError::Conflict(other.to_string()),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::SizeLimitExceeded { .. } | StorageError::InvalidHash(_) => {
                AppError::Validation(err.to_string())
            }
            StorageError::NotFound(what) => AppError::NotFound(what),
            StorageError::Io(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<RepairError> for AppError {
    fn from(err: RepairError) -> Self {
        match err {
            RepairError::Invalid(msg) => AppError::Validation(msg),
            RepairError::NotFound(id) => AppError::NotFound(format!("Content {id} not found")),
            RepairError::PieceNotFound(id) => {
                AppError::NotFound(format!("Piece commitment {id} not found"))
            }
            RepairError::InFlight { .. } => AppError::Conflict(err.to_string()),
            RepairError::Db(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<dispatcher::DispatchError> for AppError {
    fn from(err: dispatcher::DispatchError) -> Self {
        AppError::Internal(err.to_string())
    }
}
