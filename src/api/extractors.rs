use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use validator::Validate;

use crate::config::AppConfig;
use crate::database::Database;
use crate::error::FileApiError;
use crate::services::FileService;

// Application state that will be shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub file_service: Arc<FileService>,
    pub config: AppConfig,
}

/// `/{owner_id}` with the segment percent-decoded.
#[derive(Debug, Clone)]
pub struct OwnerPath {
    pub owner_id: String,
}

/// `/{owner_id}/{file_id}` with both segments percent-decoded.
#[derive(Debug, Clone)]
pub struct FilePath {
    pub owner_id: String,
    pub file_id: String,
}

impl<S: Send + Sync> FromRequestParts<S> for OwnerPath {
    type Rejection = FileApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(owner_id) = Path::<String>::from_request_parts(parts, state).await.map_err(|e| {
            debug!("Rejected owner path: {}", e.body_text());
            FileApiError::Decode(e.body_text())
        })?;

        Ok(OwnerPath { owner_id })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for FilePath {
    type Rejection = FileApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path((owner_id, file_id)) =
            Path::<(String, String)>::from_request_parts(parts, state).await.map_err(|e| {
                debug!("Rejected file path: {}", e.body_text());
                FileApiError::Decode(e.body_text())
            })?;

        Ok(FilePath { owner_id, file_id })
    }
}

/// JSON body decoded and validated. Content-Type is not required; any decode
/// or validation failure is a `Decode` error.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = FileApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| FileApiError::Decode(e.body_text()))?;

        let value: T = serde_json::from_slice(&bytes).map_err(|e| {
            debug!("Rejected request body: {}", e);
            FileApiError::Decode(e.to_string())
        })?;

        value.validate().map_err(|e| FileApiError::Decode(e.to_string()))?;

        Ok(JsonBody(value))
    }
}
