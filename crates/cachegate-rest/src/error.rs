//! Gateway error responses.
//!
//! Unauthorized maps to 401. Every other failure, expected or not, is a 400
//! whose body is the error message; the process stays up either way.

use axum::extract::rejection::FormRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cachegate_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("`{field}` is not valid JSON: {message}")]
    MalformedJson { field: &'static str, message: String },

    #[error("{0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(CoreError::Unauthorized) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Response body. Argument errors carry their bare message.
    pub fn message(&self) -> String {
        match self {
            ApiError::Core(CoreError::InvalidArgument(message)) => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<FormRejection> for ApiError {
    fn from(rejection: FormRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Core(
                CoreError::Unavailable(_) | CoreError::Internal(_) | CoreError::Io(_),
            ) => tracing::error!(error = %self, "Request failed"),
            _ => tracing::debug!(error = %self, "Request rejected"),
        }
        (status, self.message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(CoreError::Unauthorized).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(CoreError::not_found("entry", "a")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(CoreError::unavailable("down")).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_argument_errors_use_bare_message() {
        let err = ApiError::from(CoreError::invalid_argument("key must not be empty"));
        assert_eq!(err.message(), "key must not be empty");

        let err = ApiError::from(CoreError::not_found("entry", "a"));
        assert_eq!(err.message(), "entry `a` was not found");
    }
}
