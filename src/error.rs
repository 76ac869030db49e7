use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Viewer write error: {0}")]
    Viewer(String),

    #[error("Viewer write timed out")]
    ViewerTimeout,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task error: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Wraps a sink error from a viewer's outbound stream.
    pub fn viewer(e: impl std::fmt::Display) -> Self {
        AppError::Viewer(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}
