use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::storage::StoreError;
use crate::uploads::UploadError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Image not found")]
    NotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Upload(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Upload(_) => StatusCode::BAD_GATEWAY,
            ApiError::Multipart(err) => err.status(),
            ApiError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Store(StoreError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed with {status}: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
