use crate::engine::EngineError;
use crate::images::ImageStoreError;
use crate::store::StoreError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Request-level failure. Client mistakes map to 4xx; everything else is a
/// failed external call and maps to 500.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("upload could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("upload could not be staged: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Images(#[from] ImageStoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                tracing::info!(message, "rejected request");
                (StatusCode::BAD_REQUEST, message).into_response()
            }
            ApiError::Multipart(err) => {
                tracing::info!(error = %err, "malformed upload");
                (err.status(), err.body_text()).into_response()
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal server error: {other}"),
                )
                    .into_response()
            }
        }
    }
}
