use crate::models::SignedUrlResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => {
                tracing::warn!("Rejected grant request: {}", msg);
                (StatusCode::BAD_REQUEST, msg)
            }
        };

        let body = Json(SignedUrlResponse {
            success: false,
            urls: None,
            error: Some(message),
        });

        (status, body).into_response()
    }
}
