use anyhow::Result;
use axum::{
    extract::State,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use validator::Validate;

use crate::api::extractors::{AppState, FilePath, JsonBody, OwnerPath};
use crate::config::ResponseStyle;
use crate::error::FileApiError;
use crate::models::{FilePatch, FileRecord};
use crate::services::file::NewFile;
use crate::services::signer::SignedUrl;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct FileDetailsRequest {
    #[serde(rename = "FileName")]
    #[validate(length(min = 1, max = 1024))]
    pub file_name: String,
    #[serde(rename = "FirstName", default)]
    pub first_name: Option<String>,
    #[serde(rename = "LastName", default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListFilesResponse {
    #[serde(rename = "Files")]
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadFileResponse {
    #[serde(rename = "FileID")]
    pub file_id: String,
    #[serde(rename = "UploadURL")]
    pub upload_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadResponse {
    #[serde(rename = "DownloadURL")]
    pub download_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverwriteResponse {
    #[serde(rename = "PostURL")]
    pub post_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    #[serde(rename = "DeleteURL")]
    pub delete_url: String,
}

pub async fn create_router() -> Result<Router<AppState>> {
    let router = Router::new()
        .route("/", get(list_all_files))
        .route("/{owner_id}", get(list_owner_files).post(upload_file))
        .route("/{owner_id}/{file_id}", get(download_file).put(overwrite_file).delete(delete_file));

    Ok(router)
}

async fn list_all_files(State(app_state): State<AppState>) -> Result<Json<ListFilesResponse>, FileApiError> {
    if !app_state.config.files.expose_list_all {
        warn!("Unscoped file listing requested while disabled");
        return Err(FileApiError::NotFound);
    }

    let files = app_state.file_service.list_all().await?;
    Ok(Json(ListFilesResponse { files }))
}

async fn list_owner_files(
    State(app_state): State<AppState>,
    path: OwnerPath,
) -> Result<Json<ListFilesResponse>, FileApiError> {
    let files = app_state.file_service.list_for_owner(&path.owner_id).await?;
    Ok(Json(ListFilesResponse { files }))
}

async fn upload_file(
    State(app_state): State<AppState>,
    path: OwnerPath,
    JsonBody(payload): JsonBody<FileDetailsRequest>,
) -> Result<Json<UploadFileResponse>, FileApiError> {
    let new_file = NewFile {
        file_name: payload.file_name,
        first_name: payload.first_name,
        last_name: payload.last_name,
    };

    let grant = app_state.file_service.upload(&path.owner_id, new_file).await?;

    Ok(Json(UploadFileResponse { file_id: grant.file_id, upload_url: grant.upload_url.url }))
}

async fn download_file(State(app_state): State<AppState>, path: FilePath) -> Result<Response, FileApiError> {
    let signed = app_state.file_service.download(&path.owner_id, &path.file_id).await?;

    Ok(match app_state.config.files.response_style {
        ResponseStyle::Json => Json(DownloadResponse { download_url: signed.url }).into_response(),
        ResponseStyle::Redirect => redirect_to(&signed),
    })
}

async fn overwrite_file(
    State(app_state): State<AppState>,
    path: FilePath,
    JsonBody(payload): JsonBody<FileDetailsRequest>,
) -> Result<Json<OverwriteResponse>, FileApiError> {
    let patch = FilePatch {
        file_name: Some(payload.file_name),
        first_name: payload.first_name,
        last_name: payload.last_name,
    };

    let signed = app_state.file_service.overwrite(&path.owner_id, &path.file_id, patch).await?;

    Ok(Json(OverwriteResponse { post_url: signed.url }))
}

async fn delete_file(State(app_state): State<AppState>, path: FilePath) -> Result<Response, FileApiError> {
    let signed = app_state.file_service.delete(&path.owner_id, &path.file_id).await?;

    Ok(match app_state.config.files.response_style {
        ResponseStyle::Json => Json(DeleteResponse { delete_url: signed.url }).into_response(),
        ResponseStyle::Redirect => redirect_to(&signed),
    })
}

fn redirect_to(signed: &SignedUrl) -> Response {
    Redirect::temporary(&signed.url).into_response()
}
