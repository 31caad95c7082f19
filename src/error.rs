//! Error types for hive-server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Local ingestion has fallen too far behind the upstream node.
    #[error(
        "last irreversible block ({last_irreversible_block}) - highest db block ({last_db_block}) = {diff}, > max allowable difference ({max_block_num_diff})"
    )]
    BlockLag {
        last_irreversible_block: i64,
        last_db_block: i64,
        diff: i64,
        max_block_num_diff: i64,
    },
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Upstream node error: {0}")]
    UpstreamError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::BlockLag { .. }
            | ServerError::DatabaseError(_)
            | ServerError::UpstreamError(_)
            | ServerError::IoError(_)
            | ServerError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ServerError {
    fn from(err: sqlx::Error) -> Self {
        ServerError::DatabaseError(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        ServerError::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for ServerError {
    fn from(err: reqwest::Error) -> Self {
        ServerError::UpstreamError(err.to_string())
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status_code: status.as_u16(),
            detail: None,
        }
    }
}

/// Debug rendering of the failure behind an error response. Attached as a
/// response extension so the error middleware can expose it in debug mode.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = ErrorDetail(format!("{:?}", self));

        let mut response = (status, Json(ErrorResponse::new(status, self.to_string()))).into_response();
        response.extensions_mut().insert(detail);
        response
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_lag_message_names_every_figure() {
        let err = ServerError::BlockLag {
            last_irreversible_block: 1000,
            last_db_block: 989,
            diff: 11,
            max_block_num_diff: 10,
        };
        assert_eq!(
            err.to_string(),
            "last irreversible block (1000) - highest db block (989) = 11, > max allowable difference (10)"
        );
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn into_response_carries_detail_extension() {
        let response = ServerError::UpstreamError("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = response.extensions().get::<ErrorDetail>();
        assert!(detail.is_some_and(|d| d.0.contains("UpstreamError")));
    }
}
