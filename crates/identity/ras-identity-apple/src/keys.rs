//! Key material: the local ES256 signing key and Apple's published JWKS.

use crate::error::{AppleError, AppleResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Upper bound for a JWKS response body
const MAX_JWKS_BYTES: usize = 512 * 1024;

/// PEM encoded private key as read from disk.
///
/// The bytes are never printed; `Debug` only reports the length.
#[derive(Clone)]
pub struct PrivateKeyMaterial(Vec<u8>);

impl PrivateKeyMaterial {
    /// Wrap PEM bytes after checking they hold a key `jsonwebtoken` can read.
    ///
    /// The algorithm family is not checked here; a non-EC key is rejected when
    /// signing.
    pub fn from_pem(pem: impl Into<Vec<u8>>) -> AppleResult<Self> {
        let pem = pem.into();
        if pem.iter().all(u8::is_ascii_whitespace) {
            return Err(AppleError::KeyLoad("key file is empty".to_string()));
        }

        let parseable = EncodingKey::from_ec_pem(&pem).is_ok()
            || EncodingKey::from_rsa_pem(&pem).is_ok()
            || EncodingKey::from_ed_pem(&pem).is_ok();
        if !parseable {
            return Err(AppleError::KeyLoad(
                "content is not a PEM encoded private key".to_string(),
            ));
        }

        Ok(Self(pem))
    }

    pub fn as_pem(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PrivateKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKeyMaterial(<{} bytes redacted>)", self.0.len())
    }
}

/// Read the private key (usually Apple's `AuthKey_XXXX.p8`) from `path`.
///
/// # Errors
///
/// [`AppleError::KeyLoad`] when the path is empty, unreadable, or does not
/// contain a parseable key.
pub async fn load_local_signing_key(path: impl AsRef<Path>) -> AppleResult<PrivateKeyMaterial> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(AppleError::KeyLoad("key file path is empty".to_string()));
    }

    let pem = tokio::fs::read(path)
        .await
        .map_err(|e| AppleError::KeyLoad(format!("{}: {}", path.display(), e)))?;

    PrivateKeyMaterial::from_pem(pem)
}

/// One entry of a JSON Web Key Set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteKey {
    #[serde(default)]
    pub kid: String,
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    /// RSA exponent, base64url
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

impl RemoteKey {
    pub fn rsa(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kid: kid.into(),
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            n: Some(n.into()),
            e: Some(e.into()),
        }
    }

    fn is_rsa(&self) -> bool {
        self.kty == "RSA" && self.n.is_some() && self.e.is_some()
    }

    pub(crate) fn decoding_key(&self) -> AppleResult<DecodingKey> {
        match (&self.n, &self.e) {
            (Some(n), Some(e)) if self.kty == "RSA" => DecodingKey::from_rsa_components(n, e)
                .map_err(|e| {
                    AppleError::InvalidSignature(format!("key {} is unusable: {}", self.kid, e))
                }),
            _ => Err(AppleError::InvalidSignature(format!(
                "key {} is not an RSA key",
                self.kid
            ))),
        }
    }
}

/// Apple's public keys, in the order the endpoint listed them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteKeySet {
    pub keys: Vec<RemoteKey>,
}

impl RemoteKeySet {
    pub fn new(keys: Vec<RemoteKey>) -> Self {
        Self { keys }
    }

    pub fn find(&self, kid: &str) -> Option<&RemoteKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    /// RSA keys to try for a token carrying the `kid` hint.
    ///
    /// The key named by `kid` comes first, followed by every other RSA key in
    /// set order. A missing or unknown `kid` yields all RSA keys in set order.
    pub fn candidates(&self, kid: Option<&str>) -> Vec<&RemoteKey> {
        let mut candidates: Vec<&RemoteKey> = Vec::with_capacity(self.keys.len());

        if let Some(matched) = kid.and_then(|kid| self.find(kid)).filter(|k| k.is_rsa()) {
            candidates.push(matched);
        }

        for key in self.keys.iter().filter(|k| k.is_rsa()) {
            if !candidates.iter().any(|c| std::ptr::eq(*c, key)) {
                candidates.push(key);
            }
        }

        candidates
    }
}

/// Where the verifier obtains Apple's public keys.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the current key set.
    ///
    /// The returned set is shared and never mutated.
    async fn fetch_remote_keys(&self) -> AppleResult<Arc<RemoteKeySet>>;

    /// Fetch the key set bypassing any cache.
    ///
    /// Called when a token names a key the current set does not have, or no
    /// key verifies it, which is what a rotation looks like from here.
    async fn refresh_remote_keys(&self) -> AppleResult<Arc<RemoteKeySet>> {
        self.fetch_remote_keys().await
    }
}

/// Fetches the JWKS over HTTPS on every call.
#[derive(Clone)]
pub struct HttpKeySource {
    http_client: Client,
    endpoint: String,
}

impl HttpKeySource {
    pub fn new(http_client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch_remote_keys(&self) -> AppleResult<Arc<RemoteKeySet>> {
        let mut response = self
            .http_client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| AppleError::KeyFetch(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(AppleError::KeyFetch(format!("HTTP {}", response.status())));
        }

        let too_large = || AppleError::KeyFetch("key set response too large".to_string());
        if response
            .content_length()
            .is_some_and(|len| usize::try_from(len).map_or(true, |len| len > MAX_JWKS_BYTES))
        {
            return Err(too_large());
        }

        // Chunked responses carry no length, so the cap is enforced while reading
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppleError::KeyFetch(e.to_string()))?
        {
            if body.len() + chunk.len() > MAX_JWKS_BYTES {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        let key_set: RemoteKeySet = serde_json::from_slice(&body)
            .map_err(|e| AppleError::KeyFetch(format!("malformed key set: {}", e)))?;

        debug!("Fetched {} keys from {}", key_set.keys.len(), self.endpoint);
        Ok(Arc::new(key_set))
    }
}

/// A fixed key set, for pinned keys and tests.
#[derive(Debug, Clone)]
pub struct StaticKeySource {
    keys: Arc<RemoteKeySet>,
}

impl StaticKeySource {
    pub fn new(keys: RemoteKeySet) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch_remote_keys(&self) -> AppleResult<Arc<RemoteKeySet>> {
        Ok(Arc::clone(&self.keys))
    }
}

struct CachedKeySet {
    keys: Arc<RemoteKeySet>,
    fetched_at: DateTime<Utc>,
}

/// Keeps the last key set fetched by `inner` for `ttl`.
pub struct CachingKeySource<K> {
    inner: K,
    ttl: Duration,
    cache: RwLock<Option<CachedKeySet>>,
}

impl<K: KeySource> CachingKeySource<K> {
    pub fn new(inner: K, ttl_seconds: u64) -> Self {
        Self {
            inner,
            ttl: Duration::seconds(ttl_seconds as i64),
            cache: RwLock::new(None),
        }
    }

    pub fn inner(&self) -> &K {
        &self.inner
    }

    /// Drop the cached set so the next call fetches again.
    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    fn fresh(&self, cached: &Option<CachedKeySet>) -> Option<Arc<RemoteKeySet>> {
        cached
            .as_ref()
            .filter(|c| Utc::now() - c.fetched_at < self.ttl)
            .map(|c| Arc::clone(&c.keys))
    }

    async fn store(&self, cache: &mut Option<CachedKeySet>) -> AppleResult<Arc<RemoteKeySet>> {
        let keys = self.inner.refresh_remote_keys().await.inspect_err(|e| {
            warn!("Refreshing cached key set failed: {}", e);
        })?;
        *cache = Some(CachedKeySet {
            keys: Arc::clone(&keys),
            fetched_at: Utc::now(),
        });

        Ok(keys)
    }
}

#[async_trait]
impl<K: KeySource> KeySource for CachingKeySource<K> {
    async fn fetch_remote_keys(&self) -> AppleResult<Arc<RemoteKeySet>> {
        let cached = {
            let cache = self.cache.read().await;
            self.fresh(&cache)
        };
        if let Some(keys) = cached {
            return Ok(keys);
        }

        let mut cache = self.cache.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(keys) = self.fresh(&cache) {
            return Ok(keys);
        }

        self.store(&mut cache).await
    }

    async fn refresh_remote_keys(&self) -> AppleResult<Arc<RemoteKeySet>> {
        let mut cache = self.cache.write().await;
        debug!("Refreshing cached key set ahead of its expiry");
        self.store(&mut cache).await
    }
}
