use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

use crate::api::models::uploads::UploadErrorResponse;
use crate::storage_providers::ProviderError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Malformed body, missing file field or unsupported content type
    #[error("{message}")]
    InvalidRequest { message: String },

    /// Body exceeded the configured upload limit
    #[error("{message}")]
    PayloadTooLarge { message: String },

    /// The storage provider rejected the cost query or the upload
    #[error("{message}")]
    UploadFailed { message: String },

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::UploadFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message surfaced to the caller.
    ///
    /// Provider messages are passed through verbatim so the client can show what the storage
    /// service actually said.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidRequest { message } | Error::PayloadTooLarge { message } | Error::UploadFailed { message } => {
                message.clone()
            }
            Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        let message = match err {
            ProviderError::Api { status, body } => {
                tracing::warn!(status, "Storage provider rejected the request");
                body
            }
            ProviderError::Transport(message) => {
                tracing::warn!("Storage provider request failed");
                message
            }
            other => other.to_string(),
        };
        Error::UploadFailed { message }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::UploadFailed { .. } | Error::Other(_) => {
                tracing::error!("Upload failed: {:#}", self);
            }
            Error::InvalidRequest { .. } | Error::PayloadTooLarge { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = UploadErrorResponse::new(self.user_message());
        (self.status_code(), Json(body)).into_response()
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;
