//! Error types shared by the stores, the index and the query interface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    /// Payload could not be decoded into a `SensorEvent`.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("point store error: {0}")]
    PointStore(String),

    #[error("analytics store error: {0}")]
    Analytics(String),

    /// Caller supplied an unusable query parameter.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A store could not be opened or its schema created.
    #[error("initialization failed: {0}")]
    Init(String),

    #[error("corrupt record under key {key}: {message}")]
    CorruptRecord { key: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl IndexError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IndexError::InvalidQuery(_) | IndexError::Decode(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sled::Error> for IndexError {
    fn from(e: sled::Error) -> Self {
        IndexError::PointStore(e.to_string())
    }
}

impl From<duckdb::Error> for IndexError {
    fn from(e: duckdb::Error) -> Self {
        IndexError::Analytics(e.to_string())
    }
}

impl From<config::ConfigError> for IndexError {
    fn from(e: config::ConfigError) -> Self {
        IndexError::Config(e.to_string())
    }
}

impl IntoResponse for IndexError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
