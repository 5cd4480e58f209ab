use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use crm_common::hubspot::CrmError;
use crm_common::queue::QueueError;
use thiserror::Error;

use crate::pipeline::PipelineError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request signature is missing or invalid")]
    InvalidSignature,
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to enqueue message: {0}")]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Crm(#[from] CrmError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidSignature => (StatusCode::UNAUTHORIZED, self.to_string()),

            ApiError::BadRequest(_) | ApiError::Crm(CrmError::InvalidContact(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }

            ApiError::Crm(CrmError::NotFound) => (StatusCode::NOT_FOUND, self.to_string()),

            ApiError::Queue(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),

            ApiError::Crm(_) => (StatusCode::BAD_GATEWAY, self.to_string()),

            ApiError::Pipeline(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        }
        .into_response()
    }
}
