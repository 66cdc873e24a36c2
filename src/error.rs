use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::billing::ReconciliationError;
use crate::distribution::DistributionError;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("{0}")]
    Message(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::CompanyNotFound(_) => AppError::NotFound,
            LedgerError::InvalidAmount | LedgerError::InsufficientBalance { .. } => {
                AppError::BadRequest(err.to_string())
            }
            LedgerError::Db(err) => AppError::Db(err),
        }
    }
}

impl From<DistributionError> for AppError {
    fn from(err: DistributionError) -> Self {
        match err {
            DistributionError::QuoteNotFound(_) => AppError::NotFound,
            DistributionError::Db(err) => AppError::Db(err),
        }
    }
}

impl From<ReconciliationError> for AppError {
    fn from(err: ReconciliationError) -> Self {
        match err {
            ReconciliationError::InvalidSignature(err) => {
                AppError::InvalidSignature(err.to_string())
            }
            ReconciliationError::Payload(err) => AppError::BadRequest(err.to_string()),
            ReconciliationError::MissingField(field) => {
                AppError::BadRequest(format!("event missing `{field}`"))
            }
            ReconciliationError::Ledger(err) => AppError::Message(err.to_string()),
            ReconciliationError::Db(err) => AppError::Db(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) | AppError::InvalidSignature(_) => StatusCode::BAD_REQUEST,
            AppError::Db(_) | AppError::Message(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(?self);
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
