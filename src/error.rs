use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::repositories::StoreError;
use crate::services::ownership::GuardError;
use crate::services::secrets::SecretError;
use crate::services::signer::SigningError;

#[derive(Error, Debug)]
pub enum FileApiError {
    #[error("Malformed request: {0}")]
    Decode(String),
    #[error("File not found")]
    NotFound,
    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Stored record is corrupt: {0}")]
    StoreCorrupt(String),
    #[error("Secret unavailable: {0}")]
    SecretUnavailable(String),
    #[error("Secret has no string value: {0}")]
    SecretEmpty(String),
    #[error("Signing unavailable: {0}")]
    SigningUnavailable(String),
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

impl FileApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            FileApiError::NotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            FileApiError::Decode(_) => "DECODE_ERROR",
            FileApiError::NotFound => "NOT_FOUND",
            FileApiError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            FileApiError::StoreCorrupt(_) => "STORE_CORRUPT",
            FileApiError::SecretUnavailable(_) => "SECRET_UNAVAILABLE",
            FileApiError::SecretEmpty(_) => "SECRET_EMPTY",
            FileApiError::SigningUnavailable(_) => "SIGNING_UNAVAILABLE",
            FileApiError::SigningFailed(_) => "SIGNING_FAILED",
        }
    }

    /// Client-facing message. Internal detail stays in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            FileApiError::Decode(_) => "Malformed request",
            FileApiError::NotFound => "File not found",
            FileApiError::StoreUnavailable(_) => "Metadata store unavailable",
            FileApiError::StoreCorrupt(_) => "Stored file metadata is corrupt",
            FileApiError::SecretUnavailable(_) => "Secret unavailable",
            FileApiError::SecretEmpty(_) => "Secret has no usable value",
            FileApiError::SigningUnavailable(_) => "URL signing unavailable",
            FileApiError::SigningFailed(_) => "URL signing failed",
        }
    }
}

impl From<StoreError> for FileApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => FileApiError::NotFound,
            StoreError::Corrupt(msg) => FileApiError::StoreCorrupt(msg),
            StoreError::Unavailable(msg) => FileApiError::StoreUnavailable(msg),
            StoreError::InvalidTable(table) => FileApiError::StoreUnavailable(format!("invalid table {table}")),
        }
    }
}

impl From<GuardError> for FileApiError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::NotFound => FileApiError::NotFound,
            GuardError::Store(store) => store.into(),
        }
    }
}

impl From<SecretError> for FileApiError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::Empty(name) => FileApiError::SecretEmpty(name),
            unavailable => FileApiError::SecretUnavailable(unavailable.to_string()),
        }
    }
}

impl From<SigningError> for FileApiError {
    fn from(err: SigningError) -> Self {
        match err {
            SigningError::Unavailable(secret) => FileApiError::SigningUnavailable(secret.to_string()),
            SigningError::Failed(msg) => FileApiError::SigningFailed(msg),
        }
    }
}

impl IntoResponse for FileApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = Json(json!({
            "error": self.public_message(),
            "code": self.code(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
