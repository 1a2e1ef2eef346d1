use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use log::error;
use thiserror::Error;

/// Error taxonomy for the whole service. `Validation` and `NotFound` are
/// client faults, `Auth`/`InvalidCredentials` come from the boundary only,
/// everything else surfaces as an internal fault with the detail logged.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("invalid or expired token")]
    Auth,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token error: {0}")]
    Token(String),
    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("storage error: {0}")]
    Store(#[from] mongodb::error::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Auth | ApiError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ApiError::Token(_) | ApiError::Hash(_) | ApiError::Store(_) | ApiError::Serialize(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {}", self);
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": "internal server error" }));
        }
        HttpResponse::build(status).json(serde_json::json!({ "error": self.to_string() }))
    }
}
