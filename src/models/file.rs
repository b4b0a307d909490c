use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata row for one user-owned file. The bytes themselves live on the CDN
/// origin under `file_id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FileRecord {
    #[serde(rename = "FileID")]
    pub file_id: String,
    #[serde(rename = "UserID")]
    pub owner_id: String,
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "FirstName", default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "LastName", default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(rename = "Uploaded", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "Modified", with = "timestamp")]
    pub modified_at: DateTime<Utc>,
}

impl FileRecord {
    /// Build a fresh record with a newly generated id and `created_at == modified_at`.
    pub fn new(owner_id: impl Into<String>, file_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        // Stored timestamps carry millisecond precision; truncate up front so the
        // in-memory record compares equal to what the store hands back.
        let now = truncate_to_millis(now);
        Self {
            file_id: new_file_id(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            first_name: None,
            last_name: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_uploader(mut self, first_name: Option<String>, last_name: Option<String>) -> Self {
        self.first_name = first_name;
        self.last_name = last_name;
        self
    }
}

/// Fields an overwrite may change. `modified_at` is always stamped by the store.
#[derive(Debug, Clone, Default)]
pub struct FilePatch {
    pub file_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// 128 random bits rendered as 32 lowercase hex characters.
pub fn new_file_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

pub fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
