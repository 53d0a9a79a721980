//! Blob storage for uploaded documents.
//!
//! The default backend is in-memory; Google Cloud Storage is available as an
//! opt-in via environment variables, authenticated with a service account
//! JWT exchanged for an OAuth2 access token. Objects are keyed by content
//! hash so re-uploading the same filing is a no-op.

use anyhow::{Context, Result};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Content-addressed key for a document: hex SHA-256 of the bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn put_bytes(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;
}

/// In-memory store used by default and in tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryStore {
    async fn put_bytes(&self, key: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let mut store = self.inner.write().unwrap();
        debug!("MemoryStore: stored '{}' ({} bytes)", key, bytes.len());
        store.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let store = self.inner.read().unwrap();
        store
            .get(key)
            .cloned()
            .with_context(|| format!("no stored object '{}'", key))
    }
}

#[derive(Clone)]
struct CachedToken {
    access_token: String,
    expires_at: u64,
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[allow(dead_code)]
    token_uri: Option<String>,
}

/// Google Cloud Storage backend.
pub struct GcsStore {
    client: reqwest::Client,
    bucket: String,
    sa_key: ServiceAccountKey,
    /// Cached OAuth2 access token.
    token_cache: Arc<Mutex<Option<CachedToken>>>,
}

impl GcsStore {
    /// Try to load from env. Returns `None` if any variable is missing
    /// (graceful opt-in), in which case callers fall back to memory.
    pub fn from_env(client: reqwest::Client) -> Option<Self> {
        let bucket = std::env::var("GCS_BUCKET").ok()?;
        let key_path = std::env::var("GCS_SA_KEY_PATH").ok()?;

        let key_json = match std::fs::read_to_string(&key_path) {
            Ok(json) => json,
            Err(e) => {
                warn!("GCS_SA_KEY_PATH={} unreadable: {}", key_path, e);
                return None;
            }
        };

        let sa_key: ServiceAccountKey = match serde_json::from_str(&key_json) {
            Ok(k) => k,
            Err(e) => {
                warn!("Failed to parse GCS service account key: {}", e);
                return None;
            }
        };

        info!("GCS storage enabled (bucket: {})", bucket);
        Some(Self {
            client,
            bucket,
            sa_key,
            token_cache: Arc::new(Mutex::new(None)),
        })
    }

    /// Get a valid OAuth2 access token, refreshing if expired.
    async fn get_access_token(&self) -> Result<String> {
        {
            let cache = self.token_cache.lock().unwrap();
            if let Some(ref cached) = *cache {
                if now_secs() < cached.expires_at.saturating_sub(60) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let now = now_secs();
        let claims = serde_json::json!({
            "iss": self.sa_key.client_email,
            "scope": STORAGE_SCOPE,
            "aud": TOKEN_URI,
            "iat": now,
            "exp": now + 3600,
        });

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        let encoding_key =
            jsonwebtoken::EncodingKey::from_rsa_pem(self.sa_key.private_key.as_bytes())
                .context("Invalid RSA private key in service account JSON")?;
        let jwt = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .context("Failed to encode JWT")?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let resp: TokenResponse = self
            .client
            .post(TOKEN_URI)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .context("Token exchange request failed")?
            .error_for_status()
            .context("Token exchange returned error")?
            .json()
            .await
            .context("Failed to parse token response")?;

        let token = resp.access_token.clone();
        {
            let mut cache = self.token_cache.lock().unwrap();
            *cache = Some(CachedToken {
                access_token: resp.access_token,
                expires_at: now + resp.expires_in,
            });
        }

        Ok(token)
    }

    fn object_url(&self, key: &str) -> String {
        // Object names ride in the path, so '/' must be escaped.
        format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}",
            self.bucket,
            key.replace('/', "%2F")
        )
    }
}

#[async_trait::async_trait]
impl BlobStore for GcsStore {
    async fn put_bytes(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let token = self.get_access_token().await?;
        let url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            key.replace('/', "%2F")
        );

        self.client
            .post(&url)
            .bearer_auth(&token)
            .header("Content-Type", content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .context("GCS upload request failed")?
            .error_for_status()
            .context("GCS upload returned error")?;

        info!("GCS: stored '{}' ({} bytes)", key, bytes.len());
        Ok(())
    }

    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let token = self.get_access_token().await?;
        let url = format!("{}?alt=media", self.object_url(key));

        let bytes = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .context("GCS download request failed")?
            .error_for_status()
            .with_context(|| format!("GCS object '{}' not retrievable", key))?
            .bytes()
            .await
            .context("Failed to read GCS response body")?;

        Ok(bytes.to_vec())
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
