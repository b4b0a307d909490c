use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use thiserror::Error;
use tracing::{debug, error};

use crate::models::{format_timestamp, parse_timestamp, FilePatch, FileRecord};

lazy_static::lazy_static! {
    static ref TABLE_NAME: Regex = Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap();
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Metadata store unavailable: {0}")]
    Unavailable(String),
    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(err.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Key-value access to file metadata, addressed by `file_id`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError>;

    /// Full upsert keyed by `record.file_id`.
    async fn put(&self, record: &FileRecord) -> Result<(), StoreError>;

    /// Update-only. Fails with `NotFound` rather than creating a new row.
    async fn patch_fields(
        &self,
        file_id: &str,
        patch: &FilePatch,
        modified_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Idempotent; deleting a missing id is not an error.
    async fn delete(&self, file_id: &str) -> Result<(), StoreError>;

    async fn list_all(&self) -> Result<Vec<FileRecord>, StoreError>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, StoreError>;
}

/// SQL-backed metadata table. One instance is bound to one table name.
pub struct FileRepository {
    pool: AnyPool,
    table: String,
}

const COLUMNS: &str = "file_id, owner_id, file_name, first_name, last_name, created_at, modified_at";

impl FileRepository {
    pub fn new(pool: AnyPool, table: &str) -> Result<Self, StoreError> {
        if !TABLE_NAME.is_match(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }

        Ok(Self { pool, table: table.to_string() })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn quoted(&self) -> String {
        format!("\"{}\"", self.table)
    }

    /// Create the table and owner index when they do not exist yet.
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                file_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                file_name TEXT NOT NULL,
                first_name TEXT,
                last_name TEXT,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL
            )
            "#,
            self.quoted()
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS \"{}_owner_id_idx\" ON {} (owner_id)",
            self.table,
            self.quoted()
        ))
        .execute(&self.pool)
        .await?;

        debug!("Ensured metadata table {}", self.table);
        Ok(())
    }

    fn record_from_row(row: &AnyRow) -> Result<FileRecord, StoreError> {
        let file_id: String = row.try_get("file_id")?;
        let created_raw: String = row.try_get("created_at")?;
        let modified_raw: String = row.try_get("modified_at")?;

        let created_at = parse_timestamp(&created_raw).map_err(|e| {
            error!("Record {} has unparseable created_at {:?}: {}", file_id, created_raw, e);
            StoreError::Corrupt(format!("created_at of {file_id}: {e}"))
        })?;
        let modified_at = parse_timestamp(&modified_raw).map_err(|e| {
            error!("Record {} has unparseable modified_at {:?}: {}", file_id, modified_raw, e);
            StoreError::Corrupt(format!("modified_at of {file_id}: {e}"))
        })?;

        Ok(FileRecord {
            owner_id: row.try_get("owner_id")?,
            file_name: row.try_get("file_name")?,
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            file_id,
            created_at,
            modified_at,
        })
    }

    fn records_from_rows(rows: &[AnyRow]) -> Result<Vec<FileRecord>, StoreError> {
        rows.iter().map(Self::record_from_row).collect()
    }
}

#[async_trait]
impl MetadataStore for FileRepository {
    async fn get(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM {} WHERE file_id = $1", COLUMNS, self.quoted()))
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn put(&self, record: &FileRecord) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (file_id) DO UPDATE SET \
             owner_id = excluded.owner_id, file_name = excluded.file_name, \
             first_name = excluded.first_name, last_name = excluded.last_name, \
             created_at = excluded.created_at, modified_at = excluded.modified_at",
            self.quoted(),
            COLUMNS
        ))
        .bind(&record.file_id)
        .bind(&record.owner_id)
        .bind(&record.file_name)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(format_timestamp(&record.created_at))
        .bind(format_timestamp(&record.modified_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn patch_fields(
        &self,
        file_id: &str,
        patch: &FilePatch,
        modified_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET \
             file_name = COALESCE($1, file_name), \
             first_name = COALESCE($2, first_name), \
             last_name = COALESCE($3, last_name), \
             modified_at = $4 \
             WHERE file_id = $5",
            self.quoted()
        ))
        .bind(&patch.file_name)
        .bind(&patch.first_name)
        .bind(&patch.last_name)
        .bind(format_timestamp(&modified_at))
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(file_id.to_string()));
        }

        Ok(())
    }

    async fn delete(&self, file_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE file_id = $1", self.quoted()))
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        debug!("Deleted {} row(s) for file {}", result.rows_affected(), file_id);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {} ORDER BY created_at ASC, file_id ASC",
            COLUMNS,
            self.quoted()
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::records_from_rows(&rows)
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM {} WHERE owner_id = $1 ORDER BY created_at ASC, file_id ASC",
            COLUMNS,
            self.quoted()
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Self::records_from_rows(&rows)
    }
}
