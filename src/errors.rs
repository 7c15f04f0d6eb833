//! HTTP-facing error type.
//!
//! Everything below the API layer surfaces typed values; this is the single
//! place where they are translated to status codes, per the propagation
//! policy: adapters never throw, the request client never throws, and
//! `send_uri_with_key` always returns an outcome.

use crate::db::DbError;
use crate::types::{ClientId, KeyId};
use crate::validate::ValidationError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range request parameter
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Request-level precondition failures that have no validator variant,
    /// e.g. a missing If-Match header
    #[error("{message}")]
    BadRequest { message: String },

    /// No benchmark client registered under this id
    #[error("unknown benchmark client {0}")]
    UnknownBenchmarkClient(ClientId),

    /// No benchmark key stored under this id
    #[error("unknown benchmark key {0}")]
    UnknownKey(KeyId),

    /// The client has not finished its first benchmark
    #[error("benchmark client {0} has no key yet")]
    NoKeyYet(ClientId),

    /// Store failure; `UnsupportedBackend` surfaces the single-writer case
    #[error(transparent)]
    Database(#[from] DbError),
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) | Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::UnknownBenchmarkClient(_) | Error::UnknownKey(_) => StatusCode::BAD_REQUEST,
            Error::NoKeyYet(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Database(DbError::NotFound) => StatusCode::BAD_REQUEST,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Database(DbError::Other(_)) => tracing::error!("internal service error: {:#}", self),
            Error::Database(_) => tracing::warn!("store error: {}", self),
            _ => tracing::debug!("client error: {}", self),
        }

        let status = self.status_code();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            Error::Validation(ValidationError::NotCronLine("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(Error::UnknownKey(KeyId(9)).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NoKeyYet(ClientId(1)).status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            Error::Database(DbError::UnsupportedBackend).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
