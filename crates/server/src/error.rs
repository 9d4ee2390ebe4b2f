use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use carfinder::{InputError, RecognitionError, SearchError};
use index::IndexError;
use listing::ListingError;
use serde::{Deserialize, Serialize};

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Search(#[from] SearchError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Invalid listing: {0}")]
    Listing(#[from] ListingError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found")]
    NotFound,
}

/// API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ServerError {
    /// Get HTTP status code for this error
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) | ServerError::Listing(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Search(err) => search_status(err),
            ServerError::Index(IndexError::DimensionMismatch { .. })
            | ServerError::Index(IndexError::InvalidK) => StatusCode::BAD_REQUEST,
            ServerError::Index(IndexError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Index(_) | ServerError::Internal(_) | ServerError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get error code string
    fn error_code(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Search(err) => search_code(err),
            ServerError::Index(IndexError::DimensionMismatch { .. }) => "DIMENSION_MISMATCH",
            ServerError::Index(IndexError::Unavailable(_)) => "INDEX_UNAVAILABLE",
            ServerError::Index(_) => "INDEX_ERROR",
            ServerError::Listing(_) => "INVALID_LISTING",
            ServerError::Internal(_) => "INTERNAL_ERROR",
            ServerError::Config(_) => "CONFIG_ERROR",
            ServerError::NotFound => "NOT_FOUND",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            ServerError::Search(SearchError::NoResults { diagnostics }) => {
                serde_json::to_value(diagnostics)
                    .ok()
                    .map(|diagnostics| serde_json::json!({ "diagnostics": diagnostics }))
            }
            _ => None,
        }
    }
}

fn search_status(err: &SearchError) -> StatusCode {
    match err {
        SearchError::InvalidInput(InputError::ImageTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
        SearchError::InvalidInput(
            InputError::UnsupportedFormat(_) | InputError::UnknownContentType(_),
        ) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        SearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        SearchError::RecognitionFailure(RecognitionError::UnrecognizedImage) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        SearchError::RecognitionFailure(RecognitionError::InvalidConfig(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SearchError::RecognitionFailure(_) => StatusCode::BAD_GATEWAY,
        SearchError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        SearchError::NoResults { .. } => StatusCode::BAD_GATEWAY,
        SearchError::DimensionMismatch { .. } | SearchError::InvalidConfig(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn search_code(err: &SearchError) -> &'static str {
    match err {
        SearchError::InvalidInput(InputError::ImageTooLarge { .. }) => "PAYLOAD_TOO_LARGE",
        SearchError::InvalidInput(
            InputError::UnsupportedFormat(_) | InputError::UnknownContentType(_),
        ) => "UNSUPPORTED_MEDIA_TYPE",
        SearchError::InvalidInput(_) => "INVALID_INPUT",
        SearchError::RecognitionFailure(RecognitionError::UnrecognizedImage) => {
            "NO_VEHICLE_DETECTED"
        }
        SearchError::RecognitionFailure(_) => "RECOGNITION_FAILED",
        SearchError::IndexUnavailable(_) => "INDEX_UNAVAILABLE",
        SearchError::NoResults { .. } => "NO_RESULTS",
        SearchError::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
        SearchError::InvalidConfig(_) => "CONFIG_ERROR",
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<InputError> for ServerError {
    fn from(err: InputError) -> Self {
        ServerError::Search(SearchError::InvalidInput(err))
    }
}

impl From<std::net::AddrParseError> for ServerError {
    fn from(err: std::net::AddrParseError) -> Self {
        ServerError::Config(format!("Invalid address: {err}"))
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::BadRequest(format!("JSON parse error: {err}"))
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
