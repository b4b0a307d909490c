use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub files: FilesConfig,
    pub cdn: CdnConfig,
    pub secrets: SecretsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    pub table: String,
    /// Mount the unscoped `GET /api/files` listing.
    pub expose_list_all: bool,
    pub response_style: ResponseStyle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    pub base_url: String,
    pub url_validity_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    pub backend: SecretsBackend,
    pub endpoint: String,
    pub token: Option<String>,
    pub region: Option<String>,
    pub cache_ttl_secs: u64,
    pub private_key_name: String,
    pub key_pair_id_name: String,
}

/// How Download and Delete hand the signed URL back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    /// 200 with the URL in a JSON body.
    Json,
    /// 307 with the URL in `Location`.
    Redirect,
}

impl FromStr for ResponseStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ResponseStyle::Json),
            "redirect" => Ok(ResponseStyle::Redirect),
            other => Err(anyhow!("Unknown response style: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    /// Remote secrets service over HTTP.
    Http,
    /// Signing material read straight from `SIGNING_PRIVATE_KEY` / `SIGNING_KEY_PAIR_ID`.
    Env,
}

impl FromStr for SecretsBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(SecretsBackend::Http),
            "env" => Ok(SecretsBackend::Env),
            other => Err(anyhow!("Unknown secrets backend: {}", other)),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = Self {
            server: ServerConfig {
                host: env_or("HOST", "0.0.0.0"),
                port: env_or("PORT", "3000").parse().unwrap_or(3000),
            },
            database: DatabaseConfig {
                url: env_or("DATABASE_URL", "sqlite::memory:"),
                max_connections: env_or("DATABASE_MAX_CONNECTIONS", "10").parse().unwrap_or(10),
            },
            files: FilesConfig {
                table: env_or("FILES_TABLE", "dev-files"),
                expose_list_all: env_or("FILES_EXPOSE_LIST_ALL", "false").to_lowercase() == "true",
                response_style: env_or("FILES_RESPONSE_STYLE", "json").parse()?,
            },
            cdn: CdnConfig {
                base_url: env_or("CDN_BASE_URL", "https://cdn.example.com"),
                // Floor of one second; a zero window would issue already-expired URLs.
                url_validity_secs: env_or("SIGNED_URL_TTL_SECS", "3600").parse::<u64>().unwrap_or(3600).max(1),
            },
            secrets: SecretsConfig {
                backend: env_or("SECRETS_BACKEND", "http").parse()?,
                endpoint: env_or("SECRETS_ENDPOINT", "http://localhost:8200"),
                token: env_opt("SECRETS_TOKEN"),
                region: env_opt("SECRETS_REGION"),
                cache_ttl_secs: env_or("SECRETS_CACHE_TTL", "300").parse().unwrap_or(300),
                private_key_name: env_or("SIGNING_PRIVATE_KEY_SECRET", "dev-file-management-private-key"),
                key_pair_id_name: env_or("SIGNING_KEY_ID_SECRET", "dev-file-management-public-id"),
            },
        };

        Ok(config)
    }
}

impl CdnConfig {
    pub fn url_validity(&self) -> Duration {
        Duration::from_secs(self.url_validity_secs)
    }
}

impl SecretsConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
