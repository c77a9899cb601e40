use chrono::{DateTime, Utc};
use moka::Expiry;
use moka::future::Cache;
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cached payload. Entries are replaced wholesale, never merged.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Arc<[u8]>,
    pub ttl: Duration,
    pub expires_at: DateTime<Utc>,
}

/// Whether a lookup was served from cache, and until when a stored entry is valid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatus {
    pub hit: bool,
    pub until: Option<DateTime<Utc>>,
}

impl CacheStatus {
    pub fn hit(until: DateTime<Utc>) -> Self {
        Self {
            hit: true,
            until: Some(until),
        }
    }
}

struct PerEntryTtl;

impl Expiry<String, CacheEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-wide TTL store. Expiry is lazy: a stale entry is never returned, and
/// there is no size-based eviction.
#[derive(Clone)]
pub struct TtlCache {
    name: &'static str,
    inner: Cache<String, CacheEntry>,
}

impl TtlCache {
    pub fn new(name: &'static str) -> Self {
        let inner = Cache::builder().expire_after(PerEntryTtl).build();
        Self { name, inner }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.get(key).await
    }

    pub async fn set(&self, key: impl Into<String>, payload: Vec<u8>, ttl: Duration) -> DateTime<Utc> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let entry = CacheEntry {
            payload: payload.into(),
            ttl,
            expires_at,
        };
        self.inner.insert(key.into(), entry).await;
        expires_at
    }

    /// Decode a JSON entry. A payload that no longer matches `T` counts as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<(T, DateTime<Utc>)> {
        let entry = self.get(key).await?;
        match serde_json::from_slice(&entry.payload) {
            Ok(value) => Some((value, entry.expires_at)),
            Err(e) => {
                tracing::debug!(cache = self.name, "unable to parse cached entry {key}: {e}");
                None
            }
        }
    }

    /// Store `value` as JSON. Serialization failures are logged and swallowed.
    pub async fn set_json<T: Serialize>(
        &self,
        key: impl Into<String>,
        value: &T,
        ttl: Duration,
    ) -> Option<DateTime<Utc>> {
        match serde_json::to_vec(value) {
            Ok(payload) => Some(self.set(key, payload, ttl).await),
            Err(e) => {
                tracing::warn!(cache = self.name, "unable to serialize cache entry: {e}");
                None
            }
        }
    }
}

/// Hex SHA-256 over the given parts, used as an identity for cache keys.
pub fn fingerprint<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref().as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}
