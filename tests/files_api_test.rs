use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use filevault::api::{self, extractors::AppState, files::*};
use filevault::config::{
    AppConfig, CdnConfig, DatabaseConfig, FilesConfig, ResponseStyle, SecretsBackend, SecretsConfig, ServerConfig,
};
use filevault::models::{new_file_id, FilePatch, FileRecord};
use filevault::repositories::{FileRepository, MetadataStore, StoreError};
use filevault::services::{verify_signed_url, FileService, StaticSecretStore, UrlSigner};
use filevault::test_utils::{create_test_database, test_public_key, TEST_KEY_PAIR_ID, TEST_PRIVATE_KEY_PEM, TEST_TABLE};
use filevault::Database;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const CDN: &str = "https://cdn.example.com";
const PRIVATE_KEY_SECRET: &str = "test/signing-private-key";
const KEY_PAIR_ID_SECRET: &str = "test/signing-key-pair-id";

fn test_config(response_style: ResponseStyle, expose_list_all: bool) -> AppConfig {
    AppConfig {
        server: ServerConfig { host: "127.0.0.1".to_string(), port: 0 },
        database: DatabaseConfig { url: "sqlite::memory:".to_string(), max_connections: 1 },
        files: FilesConfig { table: TEST_TABLE.to_string(), expose_list_all, response_style },
        cdn: CdnConfig { base_url: CDN.to_string(), url_validity_secs: 3600 },
        secrets: SecretsConfig {
            backend: SecretsBackend::Env,
            endpoint: String::new(),
            token: None,
            region: None,
            cache_ttl_secs: 0,
            private_key_name: PRIVATE_KEY_SECRET.to_string(),
            key_pair_id_name: KEY_PAIR_ID_SECRET.to_string(),
        },
    }
}

fn signing_secrets() -> StaticSecretStore {
    StaticSecretStore::new()
        .with_secret(PRIVATE_KEY_SECRET, TEST_PRIVATE_KEY_PEM)
        .with_secret(KEY_PAIR_ID_SECRET, TEST_KEY_PAIR_ID)
}

struct TestApp {
    server: TestServer,
    store: Arc<FileRepository>,
}

async fn server_over(store: Arc<dyn MetadataStore>, config: AppConfig, secrets: StaticSecretStore) -> Result<TestServer> {
    let signer = UrlSigner::new(
        Arc::new(secrets),
        config.secrets.private_key_name.clone(),
        config.secrets.key_pair_id_name.clone(),
        config.cdn.url_validity(),
    );
    let file_service = Arc::new(FileService::new(store, signer, &config.cdn.base_url));

    let database = Database::from_pool(create_test_database().await?);
    let app_state = AppState { database, file_service, config };
    let app = api::create_app(app_state).await?;

    TestServer::new(app)
}

async fn setup(config: AppConfig, secrets: StaticSecretStore) -> Result<TestApp> {
    let pool = create_test_database().await?;
    let repository = FileRepository::new(pool, &config.files.table)?;
    repository.ensure_table().await?;
    let store = Arc::new(repository);

    let server = server_over(store.clone(), config, secrets).await?;
    Ok(TestApp { server, store })
}

/// Serves one record owned by `u1` for reads and rejects every write.
struct WriteFailingStore {
    record: FileRecord,
}

#[async_trait]
impl MetadataStore for WriteFailingStore {
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok((file_id == self.record.file_id).then(|| self.record.clone()))
    }

    async fn put(&self, _record: &FileRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn patch_fields(&self, _: &str, _: &FilePatch, _: chrono::DateTime<Utc>) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _file_id: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn list_all(&self) -> Result<Vec<FileRecord>, StoreError> {
        Ok(vec![self.record.clone()])
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self.list_all().await?.into_iter().filter(|r| r.owner_id == owner_id).collect())
    }
}

async fn default_app() -> Result<TestApp> {
    setup(test_config(ResponseStyle::Json, false), signing_secrets()).await
}

async fn upload(app: &TestApp, owner_id: &str, file_name: &str) -> UploadFileResponse {
    let response = app.server.post(&format!("/api/files/{owner_id}")).json(&json!({ "FileName": file_name })).await;
    assert_eq!(response.status_code(), StatusCode::OK, "{}", response.text());
    response.json::<UploadFileResponse>()
}

#[tokio::test]
async fn test_root_status_and_health() -> Result<()> {
    let app = default_app().await?;

    let root = app.server.get("/").await;
    assert_eq!(root.status_code(), StatusCode::OK);
    assert!(root.text().contains("Filevault"));

    let status = app.server.get("/api/status").await;
    assert_eq!(status.status_code(), StatusCode::OK);
    assert_eq!(status.text(), "API is running");

    let health = app.server.get("/health").await;
    assert_eq!(health.status_code(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_upload_download_delete_lifecycle() -> Result<()> {
    let app = default_app().await?;

    let uploaded = upload(&app, "u1", "report.pdf").await;
    assert_eq!(uploaded.file_id.len(), 32);
    assert!(uploaded.file_id.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(uploaded.upload_url.starts_with(CDN));

    let path = format!("/api/files/u1/{}", uploaded.file_id);

    let download = app.server.get(&path).await;
    assert_eq!(download.status_code(), StatusCode::OK);
    let download_url = download.json::<DownloadResponse>().download_url;
    let verified = verify_signed_url(&download_url, &test_public_key(), Utc::now())?;
    assert_eq!(verified.resource, format!("{CDN}/{}", uploaded.file_id));
    assert_eq!(verified.key_pair_id, TEST_KEY_PAIR_ID);

    let foreign = app.server.get(&format!("/api/files/u2/{}", uploaded.file_id)).await;
    assert_eq!(foreign.status_code(), StatusCode::NOT_FOUND);

    let delete = app.server.delete(&path).await;
    assert_eq!(delete.status_code(), StatusCode::OK);
    let delete_url = delete.json::<DeleteResponse>().delete_url;
    assert!(delete_url.starts_with(&format!("{CDN}/{}?", uploaded.file_id)));

    let after = app.server.get(&path).await;
    assert_eq!(after.status_code(), StatusCode::NOT_FOUND);
    assert!(app.store.get(&uploaded.file_id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_repeated_delete_is_not_found() -> Result<()> {
    let app = default_app().await?;
    let uploaded = upload(&app, "u1", "once.txt").await;
    let path = format!("/api/files/u1/{}", uploaded.file_id);

    assert_eq!(app.server.delete(&path).await.status_code(), StatusCode::OK);
    assert_eq!(app.server.delete(&path).await.status_code(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_missing_and_foreign_records_are_indistinguishable() -> Result<()> {
    let app = default_app().await?;
    let uploaded = upload(&app, "u1", "private.txt").await;

    let foreign = app.server.get(&format!("/api/files/u2/{}", uploaded.file_id)).await;
    let missing = app.server.get("/api/files/u2/0123456789abcdef0123456789abcdef").await;

    assert_eq!(foreign.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(foreign.text(), missing.text());

    let body = foreign.json::<Value>();
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["status"], 404);

    Ok(())
}

#[tokio::test]
async fn test_foreign_owner_cannot_mutate() -> Result<()> {
    let app = default_app().await?;
    let uploaded = upload(&app, "u1", "mine.txt").await;
    let foreign_path = format!("/api/files/u2/{}", uploaded.file_id);

    let overwrite = app.server.put(&foreign_path).json(&json!({ "FileName": "stolen.txt" })).await;
    assert_eq!(overwrite.status_code(), StatusCode::NOT_FOUND);

    let delete = app.server.delete(&foreign_path).await;
    assert_eq!(delete.status_code(), StatusCode::NOT_FOUND);

    let record = app.store.get(&uploaded.file_id).await?.expect("record should survive");
    assert_eq!(record.file_name, "mine.txt");
    assert_eq!(record.owner_id, "u1");

    Ok(())
}

#[tokio::test]
async fn test_overwrite_renames_and_returns_post_url() -> Result<()> {
    let app = default_app().await?;
    let uploaded = upload(&app, "u1", "draft.txt").await;
    let before = app.store.get(&uploaded.file_id).await?.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;

    let response = app
        .server
        .put(&format!("/api/files/u1/{}", uploaded.file_id))
        .json(&json!({ "FileName": "final.txt", "FirstName": "Ada" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let post_url = response.json::<OverwriteResponse>().post_url;
    let verified = verify_signed_url(&post_url, &test_public_key(), Utc::now())?;
    assert_eq!(verified.resource, format!("{CDN}/"));

    let after = app.store.get(&uploaded.file_id).await?.unwrap();
    assert_eq!(after.file_name, "final.txt");
    assert_eq!(after.first_name.as_deref(), Some("Ada"));
    assert_eq!(after.created_at, before.created_at);
    assert!(after.modified_at > before.modified_at);

    Ok(())
}

#[tokio::test]
async fn test_owner_listing_uses_wire_field_names() -> Result<()> {
    let app = default_app().await?;
    upload(&app, "u1", "a.txt").await;
    upload(&app, "u1", "b.txt").await;
    upload(&app, "u2", "c.txt").await;

    let response = app.server.get("/api/files/u1").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body = response.json::<Value>();
    let files = body["Files"].as_array().expect("Files array");
    assert_eq!(files.len(), 2);
    for file in files {
        assert_eq!(file["UserID"], "u1");
        assert!(file["FileID"].is_string());
        assert!(file["Uploaded"].is_string());
        assert!(file["Modified"].is_string());
    }

    let empty = app.server.get("/api/files/nobody").await.json::<ListFilesResponse>();
    assert!(empty.files.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_list_all_is_hidden_by_default() -> Result<()> {
    let app = default_app().await?;
    upload(&app, "u1", "a.txt").await;

    let response = app.server.get("/api/files").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn test_list_all_when_enabled() -> Result<()> {
    let app = setup(test_config(ResponseStyle::Json, true), signing_secrets()).await?;
    upload(&app, "u1", "a.txt").await;
    upload(&app, "u2", "b.txt").await;

    let response = app.server.get("/api/files").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<ListFilesResponse>().files.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_redirect_style_download_and_delete() -> Result<()> {
    let app = setup(test_config(ResponseStyle::Redirect, false), signing_secrets()).await?;
    let uploaded = upload(&app, "u1", "movie.mp4").await;
    let path = format!("/api/files/u1/{}", uploaded.file_id);

    let download = app.server.get(&path).await;
    assert_eq!(download.status_code(), StatusCode::TEMPORARY_REDIRECT);
    let location = download.header("location");
    let verified = verify_signed_url(location.to_str()?, &test_public_key(), Utc::now())?;
    assert_eq!(verified.resource, format!("{CDN}/{}", uploaded.file_id));

    let delete = app.server.delete(&path).await;
    assert_eq!(delete.status_code(), StatusCode::TEMPORARY_REDIRECT);
    assert!(delete.maybe_header("location").is_some());

    let foreign = app.server.get(&format!("/api/files/u2/{}", uploaded.file_id)).await;
    assert_eq!(foreign.status_code(), StatusCode::NOT_FOUND);
    assert!(foreign.maybe_header("location").is_none());

    Ok(())
}

#[tokio::test]
async fn test_malformed_bodies_are_decode_errors() -> Result<()> {
    let app = default_app().await?;

    let not_json = app.server.post("/api/files/u1").text("not json").await;
    assert_eq!(not_json.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(not_json.json::<Value>()["code"], "DECODE_ERROR");

    let missing_name = app.server.post("/api/files/u1").json(&json!({ "FirstName": "Ada" })).await;
    assert_eq!(missing_name.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let empty_name = app.server.post("/api/files/u1").json(&json!({ "FileName": "" })).await;
    assert_eq!(empty_name.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(empty_name.json::<Value>()["code"], "DECODE_ERROR");

    assert!(app.store.list_all().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_percent_encoded_owner_is_decoded() -> Result<()> {
    let app = default_app().await?;

    let response = app.server.post("/api/files/ada%40example.com").json(&json!({ "FileName": "a.txt" })).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let stored = app.store.list_by_owner("ada@example.com").await?;
    assert_eq!(stored.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_missing_signing_key_fails_upload_without_record() -> Result<()> {
    let secrets = StaticSecretStore::new().with_secret(KEY_PAIR_ID_SECRET, TEST_KEY_PAIR_ID);
    let app = setup(test_config(ResponseStyle::Json, false), secrets).await?;

    let response = app.server.post("/api/files/u1").json(&json!({ "FileName": "a.txt" })).await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response.json::<Value>();
    assert_eq!(body["code"], "SIGNING_UNAVAILABLE");
    assert!(!body["error"].as_str().unwrap_or_default().contains(PRIVATE_KEY_SECRET));

    assert!(app.store.list_by_owner("u1").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_cors_headers_present() -> Result<()> {
    let app = default_app().await?;

    let response = app.server.get("/api/files/u1").add_header("origin", "https://app.example.com").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.maybe_header("access-control-allow-origin").is_some());

    Ok(())
}

#[tokio::test]
async fn test_overwrite_of_unknown_file_is_not_found() -> Result<()> {
    let app = default_app().await?;
    let uploaded = upload(&app, "u1", "mine.txt").await;
    let body = json!({ "FileName": "renamed.txt" });

    let missing = app.server.put(&format!("/api/files/u1/{}", new_file_id())).json(&body).await;
    let foreign = app.server.put(&format!("/api/files/u2/{}", uploaded.file_id)).json(&body).await;

    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(foreign.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(missing.text(), foreign.text());
    assert_eq!(app.store.list_all().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_store_write_failures_return_no_url() -> Result<()> {
    let record = FileRecord::new("u1", "report.pdf", Utc::now());
    let store = Arc::new(WriteFailingStore { record: record.clone() });
    let server = server_over(store, test_config(ResponseStyle::Json, false), signing_secrets()).await?;
    let path = format!("/api/files/u1/{}", record.file_id);

    let responses = [
        server.post("/api/files/u1").json(&json!({ "FileName": "new.txt" })).await,
        server.put(&path).json(&json!({ "FileName": "renamed.txt" })).await,
        server.delete(&path).await,
    ];

    for response in responses {
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.json::<Value>();
        assert_eq!(body["code"], "STORE_UNAVAILABLE");
        assert!(!response.text().contains(CDN));
        for field in ["UploadURL", "PostURL", "DeleteURL"] {
            assert!(body.get(field).is_none(), "{field} must not be issued");
        }
    }

    // The guard still reads, so the signed download proves signing itself works.
    assert_eq!(server.get(&path).await.status_code(), StatusCode::OK);

    Ok(())
}
