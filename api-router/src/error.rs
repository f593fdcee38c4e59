use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream inference failed")]
    BadGateway(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Validation(_) | AppError::Load(_) | AppError::Parse(_) => {
                Self::ValidationError(err.detail())
            }
            AppError::EmptyIndex(_) | AppError::NotFound(_) => Self::NotFound(err.to_string()),
            AppError::InferenceTimeout(_) => Self::Timeout(err.to_string()),
            AppError::StoreUnavailable(_)
            | AppError::Database(_)
            | AppError::GatewayUnavailable(_) => {
                tracing::warn!(error = %err, "backing service unavailable");
                Self::Unavailable("the document index is not reachable".to_string())
            }
            AppError::Inference(_) | AppError::OpenAI(_) => {
                tracing::error!("Inference error: {:?}", err);
                Self::BadGateway("Upstream inference failed".to_string())
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// The message that is safe to show a client.
    pub fn public_message(&self) -> String {
        match self {
            Self::InternalError(message)
            | Self::ValidationError(message)
            | Self::NotFound(message)
            | Self::Unavailable(message)
            | Self::BadGateway(message)
            | Self::Timeout(message) => message.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_response = ErrorResponse {
            error: self.public_message(),
            status: "error".to_string(),
        };

        (self.status(), Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::error::StoreKind;
    use std::{fmt::Debug, time::Duration};

    // Helper to check status code
    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let not_found = AppError::NotFound("resource not found".to_string());
        let api_error = ApiError::from(not_found);
        assert!(matches!(api_error, ApiError::NotFound(_)));

        let validation = AppError::Validation("invalid input".to_string());
        let api_error = ApiError::from(validation);
        assert!(matches!(api_error, ApiError::ValidationError(msg) if msg == "invalid input"));

        let empty = AppError::EmptyIndex("tenant".to_string());
        assert!(matches!(ApiError::from(empty), ApiError::NotFound(msg) if msg.contains("tenant")));

        let load = AppError::Load("unsupported file type".to_string());
        assert!(matches!(ApiError::from(load), ApiError::ValidationError(_)));

        let internal_error =
            AppError::Io(std::io::Error::new(std::io::ErrorKind::Other, "io error"));
        let api_error = ApiError::from(internal_error);
        assert!(matches!(api_error, ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::from(AppError::Parse("empty".into())),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(
            ApiError::from(AppError::EmptyIndex("a".into())),
            StatusCode::NOT_FOUND,
        );
        assert_status_code(
            ApiError::from(AppError::InferenceTimeout(Duration::from_secs(60))),
            StatusCode::GATEWAY_TIMEOUT,
        );
        assert_status_code(
            ApiError::from(AppError::GatewayUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE,
        );
        assert_status_code(
            ApiError::from(AppError::StoreUnavailable("down".into())),
            StatusCode::SERVICE_UNAVAILABLE,
        );
        assert_status_code(
            ApiError::from(AppError::Inference("rate limited".into())),
            StatusCode::BAD_GATEWAY,
        );
        assert_status_code(
            ApiError::from(AppError::store_write(StoreKind::Vector, "disk full")),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::from(AppError::store_write(
            StoreKind::Content,
            "db password incorrect",
        ));

        assert_eq!(api_error.to_string(), "Internal server error");
        assert!(!api_error.public_message().contains("password"));
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
