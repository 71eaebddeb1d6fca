pub mod intent;
pub mod ops;

pub use intent::{intent_status_handler, register_intent_handler};
pub use ops::{metrics_handler, requeue_settlement_handler};

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use xfer_bridge_domain::model::{FormatError, TransitionError};
use xfer_bridge_domain::storage::StorageError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid field: {0}")]
    InvalidField(#[from] FormatError),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("intent not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage failure: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(reason) => ApiError::Conflict(reason),
            other => ApiError::Storage(other),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        ApiError::Conflict(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidField(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}
