use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::{SecretsBackend, SecretsConfig};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("Secret {name} unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("Secret {0} has no string value")]
    Empty(String),
}

/// Source of named secrets (signing key material).
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError>;
}

#[derive(Debug, Deserialize)]
struct SecretValueResponse {
    #[serde(rename = "SecretString")]
    secret_string: Option<String>,
    #[serde(rename = "SecretBinary")]
    #[allow(dead_code)]
    secret_binary: Option<String>,
}

/// Reads secrets from an HTTP secrets service:
/// `GET {endpoint}/secrets/{name}` returning `{"SecretString": .., "SecretBinary": ..}`.
#[derive(Debug, Clone)]
pub struct HttpSecretStore {
    client: Client,
    endpoint: String,
    token: Option<String>,
    region: Option<String>,
}

impl HttpSecretStore {
    pub fn new(endpoint: &str, token: Option<String>, region: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent("filevault/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build secret store HTTP client: {}", e))?;

        Ok(Self { client, endpoint: endpoint.trim_end_matches('/').to_string(), token, region })
    }

    fn unavailable(name: &str, reason: impl Into<String>) -> SecretError {
        SecretError::Unavailable { name: name.to_string(), reason: reason.into() }
    }
}

#[async_trait]
impl SecretStore for HttpSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        let url = format!("{}/secrets/{}", self.endpoint, urlencoding::encode(name));

        let mut request = self.client.get(&url).query(&[("stage", "current")]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(region) = &self.region {
            request = request.header("X-Secrets-Region", region);
        }

        let response = request.send().await.map_err(|e| {
            error!("Secret store request for {} failed: {}", name, e);
            Self::unavailable(name, "request failed")
        })?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                warn!("Secret {} not found in secret store", name);
                return Err(Self::unavailable(name, "not found"));
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!("Access to secret {} denied", name);
                return Err(Self::unavailable(name, "access denied"));
            }
            status => {
                error!("Secret store returned {} for {}", status, name);
                return Err(Self::unavailable(name, format!("secret store error {}", status.as_u16())));
            }
        }

        let body: SecretValueResponse = response.json().await.map_err(|e| {
            error!("Secret store response for {} was not decodable: {}", name, e);
            Self::unavailable(name, "malformed response")
        })?;

        match body.secret_string {
            Some(value) if !value.is_empty() => {
                debug!("Retrieved secret {}", name);
                Ok(value)
            }
            _ => Err(SecretError::Empty(name.to_string())),
        }
    }
}

struct CachedSecret {
    value: String,
    fetched_at: Instant,
}

/// Wraps another store and keeps successful lookups for a bounded TTL.
/// Failures are never cached.
pub struct CachedSecretStore {
    inner: Arc<dyn SecretStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedSecret>>,
}

impl CachedSecretStore {
    pub fn new(inner: Arc<dyn SecretStore>, ttl: Duration) -> Self {
        Self { inner, ttl, entries: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl SecretStore for CachedSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        if self.ttl.is_zero() {
            return self.inner.get_secret(name).await;
        }

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(name) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.value.clone());
                }
            }
        }

        let value = self.inner.get_secret(name).await?;
        self.entries
            .write()
            .await
            .insert(name.to_string(), CachedSecret { value: value.clone(), fetched_at: Instant::now() });

        Ok(value)
    }
}

/// Fixed in-memory secrets, used for local development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(name.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<String, SecretError> {
        match self.secrets.get(name) {
            Some(value) if value.is_empty() => Err(SecretError::Empty(name.to_string())),
            Some(value) => Ok(value.clone()),
            None => Err(SecretError::Unavailable { name: name.to_string(), reason: "not found".to_string() }),
        }
    }
}

/// Build the configured secret source, wrapped in a TTL cache unless the TTL is zero.
pub fn secret_store_from_config(config: &SecretsConfig) -> anyhow::Result<Arc<dyn SecretStore>> {
    let base: Arc<dyn SecretStore> = match config.backend {
        SecretsBackend::Http => {
            info!("Using HTTP secret store at {}", config.endpoint);
            Arc::new(HttpSecretStore::new(&config.endpoint, config.token.clone(), config.region.clone())?)
        }
        SecretsBackend::Env => {
            warn!("Using signing key material from environment variables");
            let private_key = std::env::var("SIGNING_PRIVATE_KEY")
                .map_err(|_| anyhow::anyhow!("SIGNING_PRIVATE_KEY must be set when SECRETS_BACKEND=env"))?;
            let key_pair_id = std::env::var("SIGNING_KEY_PAIR_ID")
                .map_err(|_| anyhow::anyhow!("SIGNING_KEY_PAIR_ID must be set when SECRETS_BACKEND=env"))?;
            Arc::new(
                StaticSecretStore::new()
                    .with_secret(config.private_key_name.clone(), private_key)
                    .with_secret(config.key_pair_id_name.clone(), key_pair_id),
            )
        }
    };

    if config.cache_ttl().is_zero() {
        return Ok(base);
    }

    Ok(Arc::new(CachedSecretStore::new(base, config.cache_ttl())))
}
