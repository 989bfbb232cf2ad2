use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Errors raised by a `UserStore` or `UserTx`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already taken")]
    UniqueViolation,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let unique = e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation());
        if unique {
            StoreError::UniqueViolation
        } else {
            StoreError::Backend(e.into())
        }
    }
}

/// Fixed classification of every failure the resolver can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    DuplicateUser,
    UserNotFound,
    InvalidCredentials,
    InvalidInput,
    TransactionFailure,
    ServiceError,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("already registered")]
    DuplicateUser,

    #[error("user does not exist")]
    UserNotFound,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transaction failed: {0:#}")]
    Transaction(anyhow::Error),

    #[error(transparent)]
    Service(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::DuplicateUser => ErrorKind::DuplicateUser,
            AppError::UserNotFound => ErrorKind::UserNotFound,
            AppError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AppError::InvalidInput(_) => ErrorKind::InvalidInput,
            AppError::Transaction(_) => ErrorKind::TransactionFailure,
            AppError::Service(_) => ErrorKind::ServiceError,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::DuplicateUser => StatusCode::CONFLICT,
            ErrorKind::UserNotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::TransactionFailure | ErrorKind::ServiceError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }
}

/// Reads outside a transaction surface storage failures as service errors.
impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation => AppError::DuplicateUser,
            StoreError::Backend(e) => AppError::Service(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Server-side details stay in the logs.
        let message = if self.is_client_error() {
            self.to_string()
        } else {
            "internal error".to_string()
        };
        let body = Json(json!({
            "error": message,
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}
