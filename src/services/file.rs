use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::FileApiError;
use crate::models::{FilePatch, FileRecord};
use crate::repositories::MetadataStore;
use crate::services::ownership::OwnershipGuard;
use crate::services::signer::{SignedUrl, UrlSigner};

#[derive(Debug, Clone, Default)]
pub struct NewFile {
    pub file_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UploadGrant {
    pub file_id: String,
    pub upload_url: SignedUrl,
}

/// Orchestrates the per-request file operations: ownership check, then the
/// store action, then the delivery grant.
#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn MetadataStore>,
    guard: OwnershipGuard,
    signer: UrlSigner,
    cdn_base_url: String,
}

impl FileService {
    pub fn new(store: Arc<dyn MetadataStore>, signer: UrlSigner, cdn_base_url: &str) -> Self {
        Self {
            guard: OwnershipGuard::new(store.clone()),
            store,
            signer,
            cdn_base_url: cdn_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resource URL of a stored object on the CDN.
    pub fn object_url(&self, file_id: &str) -> String {
        format!("{}/{}", self.cdn_base_url, urlencoding::encode(file_id))
    }

    /// Fixed target clients post new content to.
    pub fn upload_target(&self) -> String {
        format!("{}/", self.cdn_base_url)
    }

    /// Every owner's records. Administrative use only.
    pub async fn list_all(&self) -> Result<Vec<FileRecord>, FileApiError> {
        let files = self.store.list_all().await.map_err(|e| {
            error!("Failed to list all files: {}", e);
            e
        })?;
        debug!("Listed {} files across all owners", files.len());
        Ok(files)
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, FileApiError> {
        let files = self.store.list_by_owner(owner_id).await.map_err(|e| {
            error!("Failed to list files for owner {}: {}", owner_id, e);
            e
        })?;
        debug!("Listed {} files for owner {}", files.len(), owner_id);
        Ok(files)
    }

    /// Signs before writing so a signing failure never leaves a record behind.
    /// A failed write discards the grant.
    pub async fn upload(&self, owner_id: &str, new_file: NewFile) -> Result<UploadGrant, FileApiError> {
        let upload_url = self.signer.sign(&self.upload_target()).await.map_err(|e| {
            error!("Failed to sign upload URL for owner {}: {}", owner_id, e);
            e
        })?;

        let record = FileRecord::new(owner_id, new_file.file_name, Utc::now())
            .with_uploader(new_file.first_name, new_file.last_name);

        self.store.put(&record).await.map_err(|e| {
            error!("Failed to store new file record for owner {}: {}", owner_id, e);
            e
        })?;

        info!("Created file {} for owner {}", record.file_id, owner_id);
        Ok(UploadGrant { file_id: record.file_id, upload_url })
    }

    pub async fn download(&self, owner_id: &str, file_id: &str) -> Result<SignedUrl, FileApiError> {
        let record = self.guard.authorize(file_id, owner_id).await?;

        let download_url = self.signer.sign(&self.object_url(&record.file_id)).await.map_err(|e| {
            error!("Failed to sign download URL for file {}: {}", file_id, e);
            e
        })?;

        debug!("Issued download URL for file {}", file_id);
        Ok(download_url)
    }

    /// Renames (and optionally re-attributes) a file, then grants a new upload.
    pub async fn overwrite(&self, owner_id: &str, file_id: &str, patch: FilePatch) -> Result<SignedUrl, FileApiError> {
        let record = self.guard.authorize(file_id, owner_id).await?;

        // Never stamp a modification earlier than creation, even across clock skew.
        let modified_at = Utc::now().max(record.created_at);
        self.store.patch_fields(file_id, &patch, modified_at).await.map_err(|e| {
            error!("Failed to update file {}: {}", file_id, e);
            e
        })?;

        let post_url = self.signer.sign(&self.upload_target()).await.map_err(|e| {
            error!("Failed to sign overwrite URL for file {}: {}", file_id, e);
            e
        })?;

        info!("Updated file {} for owner {}", file_id, owner_id);
        Ok(post_url)
    }

    /// The grant is only issued once the record is gone.
    pub async fn delete(&self, owner_id: &str, file_id: &str) -> Result<SignedUrl, FileApiError> {
        self.guard.authorize(file_id, owner_id).await?;

        self.store.delete(file_id).await.map_err(|e| {
            error!("Failed to delete file {}: {}", file_id, e);
            e
        })?;

        let delete_url = self.signer.sign(&self.object_url(file_id)).await.map_err(|e| {
            error!("Failed to sign delete URL for file {}: {}", file_id, e);
            e
        })?;

        info!("Deleted file {} for owner {}", file_id, owner_id);
        Ok(delete_url)
    }
}
