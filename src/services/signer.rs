//! CDN signed URLs using a canned policy.
//!
//! The policy document names the exact resource URL and an epoch-seconds
//! expiry. It is signed with RSA PKCS#1 v1.5 over SHA-1 and appended to the
//! URL as `Expires`, `Signature` and `Key-Pair-Id` query parameters, which
//! the delivery network checks on its own at request time.

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use crate::services::secrets::{SecretError, SecretStore};

pub const DEFAULT_URL_VALIDITY: Duration = Duration::from_secs(60 * 60);

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Signing key material unavailable: {0}")]
    Unavailable(#[from] SecretError),
    #[error("Signing failed: {0}")]
    Failed(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Signed URL is malformed: {0}")]
    Malformed(String),
    #[error("Signature does not match")]
    BadSignature,
    #[error("Signed URL expired at {0}")]
    Expired(i64),
}

/// A time-limited access grant. Never stored; lives only in the response.
#[derive(Debug, Clone)]
pub struct SignedUrl {
    pub url: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUrl {
    pub resource: String,
    pub expires_at: DateTime<Utc>,
    pub key_pair_id: String,
}

/// Signs resource URLs with key material fetched from the secret store on
/// every call. Wrap the store in a `CachedSecretStore` to avoid the round trip.
#[derive(Clone)]
pub struct UrlSigner {
    secrets: Arc<dyn SecretStore>,
    private_key_secret: String,
    key_pair_id_secret: String,
    validity: Duration,
}

impl UrlSigner {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        private_key_secret: impl Into<String>,
        key_pair_id_secret: impl Into<String>,
        validity: Duration,
    ) -> Self {
        Self {
            secrets,
            private_key_secret: private_key_secret.into(),
            key_pair_id_secret: key_pair_id_secret.into(),
            validity,
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Sign with the configured validity window.
    pub async fn sign(&self, resource_url: &str) -> Result<SignedUrl, SigningError> {
        self.sign_for(resource_url, self.validity).await
    }

    pub async fn sign_for(&self, resource_url: &str, validity: Duration) -> Result<SignedUrl, SigningError> {
        if validity < Duration::from_secs(1) {
            return Err(SigningError::Failed("validity must be at least one second".to_string()));
        }

        let private_key_pem = self.secrets.get_secret(&self.private_key_secret).await.map_err(|e| {
            error!("Failed to retrieve signing private key {}: {}", self.private_key_secret, e);
            e
        })?;
        let key_pair_id = self.secrets.get_secret(&self.key_pair_id_secret).await.map_err(|e| {
            error!("Failed to retrieve signing key id {}: {}", self.key_pair_id_secret, e);
            e
        })?;

        let private_key = parse_private_key(&private_key_pem)?;

        let issued_at = Utc::now();
        let window = chrono::Duration::from_std(validity)
            .map_err(|e| SigningError::Failed(format!("validity out of range: {e}")))?;
        // Whole seconds, rounded down, so the grant never outlives the window.
        let expires = (issued_at + window).timestamp();

        let url = sign_canned(resource_url, &private_key, key_pair_id.trim(), expires)?;
        let expires_at = DateTime::from_timestamp(expires, 0)
            .ok_or_else(|| SigningError::Failed(format!("expiry {expires} out of range")))?;

        debug!("Signed {} until {}", resource_url, expires_at);
        Ok(SignedUrl { url, issued_at, expires_at })
    }
}

/// Accepts PKCS#1 (`BEGIN RSA PRIVATE KEY`) or PKCS#8 (`BEGIN PRIVATE KEY`) PEM.
pub fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, SigningError> {
    // Secret stores frequently hold the PEM with escaped newlines.
    let pem = pem.trim().replace("\\n", "\n");

    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| {
            error!("Signing private key is not a valid RSA PEM: {}", e);
            SigningError::Failed("private key is malformed".to_string())
        })
}

/// The delivery network rebuilds this exact byte string from the URL, so the
/// key order and spacing are fixed.
pub fn canned_policy(resource_url: &str, expires: i64) -> String {
    let resource = serde_json::Value::String(resource_url.to_string());
    format!(
        r#"{{"Statement":[{{"Resource":{resource},"Condition":{{"DateLessThan":{{"AWS:EpochTime":{expires}}}}}}}]}}"#
    )
}

/// Base64 with the three characters that are unsafe in a query string swapped out.
pub fn encode_url_safe(bytes: &[u8]) -> String {
    general_purpose::STANDARD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            '+' => '-',
            '=' => '_',
            '/' => '~',
            other => other,
        })
        .collect()
}

pub fn decode_url_safe(encoded: &str) -> Result<Vec<u8>, VerifyError> {
    let standard: String = encoded
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '=',
            '~' => '/',
            other => other,
        })
        .collect();

    general_purpose::STANDARD
        .decode(standard)
        .map_err(|e| VerifyError::Malformed(format!("signature encoding: {e}")))
}

pub fn sign_canned(
    resource_url: &str,
    private_key: &RsaPrivateKey,
    key_pair_id: &str,
    expires: i64,
) -> Result<String, SigningError> {
    let policy = canned_policy(resource_url, expires);
    let digest = Sha1::digest(policy.as_bytes());

    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
        .map_err(|e| SigningError::Failed(e.to_string()))?;

    let separator = if resource_url.contains('?') { '&' } else { '?' };
    Ok(format!(
        "{}{}Expires={}&Signature={}&Key-Pair-Id={}",
        resource_url,
        separator,
        expires,
        encode_url_safe(&signature),
        key_pair_id
    ))
}

/// Checks a signed URL the way the delivery network does.
pub fn verify_signed_url(
    signed_url: &str,
    public_key: &RsaPublicKey,
    now: DateTime<Utc>,
) -> Result<VerifiedUrl, VerifyError> {
    let start = signed_url
        .rfind("Expires=")
        .ok_or_else(|| VerifyError::Malformed("missing Expires".to_string()))?;
    let resource = signed_url[..start]
        .strip_suffix(&['?', '&'][..])
        .ok_or_else(|| VerifyError::Malformed("Expires is not a query parameter".to_string()))?;

    let mut expires = None;
    let mut signature = None;
    let mut key_pair_id = None;
    for pair in signed_url[start..].split('&') {
        match pair.split_once('=') {
            Some(("Expires", value)) => expires = Some(value),
            Some(("Signature", value)) => signature = Some(value),
            Some(("Key-Pair-Id", value)) => key_pair_id = Some(value),
            _ => return Err(VerifyError::Malformed(format!("unexpected parameter {pair}"))),
        }
    }

    let expires: i64 = expires
        .ok_or_else(|| VerifyError::Malformed("missing Expires".to_string()))?
        .parse()
        .map_err(|_| VerifyError::Malformed("Expires is not an integer".to_string()))?;
    let signature = decode_url_safe(signature.ok_or_else(|| VerifyError::Malformed("missing Signature".to_string()))?)?;
    let key_pair_id = key_pair_id.ok_or_else(|| VerifyError::Malformed("missing Key-Pair-Id".to_string()))?;

    let digest = Sha1::digest(canned_policy(resource, expires).as_bytes());
    public_key
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
        .map_err(|_| VerifyError::BadSignature)?;

    if now.timestamp() >= expires {
        return Err(VerifyError::Expired(expires));
    }

    let expires_at = DateTime::from_timestamp(expires, 0)
        .ok_or_else(|| VerifyError::Malformed(format!("expiry {expires} out of range")))?;

    Ok(VerifiedUrl { resource: resource.to_string(), expires_at, key_pair_id: key_pair_id.to_string() })
}
