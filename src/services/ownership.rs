use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::FileRecord;
use crate::repositories::{MetadataStore, StoreError};

#[derive(Error, Debug)]
pub enum GuardError {
    /// Missing record and foreign owner collapse into this one outcome.
    #[error("File not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Confirms a caller owns a file record before anything reads or mutates it.
#[derive(Clone)]
pub struct OwnershipGuard {
    store: Arc<dyn MetadataStore>,
}

impl OwnershipGuard {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub async fn authorize(&self, file_id: &str, claimed_owner_id: &str) -> Result<FileRecord, GuardError> {
        match self.store.get(file_id).await? {
            Some(record) if record.owner_id == claimed_owner_id => {
                debug!("Owner {} authorized for file {}", claimed_owner_id, file_id);
                Ok(record)
            }
            Some(_) => {
                warn!("Owner {} requested file {} owned by someone else", claimed_owner_id, file_id);
                Err(GuardError::NotFound)
            }
            None => {
                debug!("File {} not found for owner {}", file_id, claimed_owner_id);
                Err(GuardError::NotFound)
            }
        }
    }
}
