use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::CacheResult;

/// A cache as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCache {
    /// Resource name, e.g. `cachedContents/abc123`.
    pub name: String,
    pub display_name: Option<String>,
    pub model: String,
    pub create_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
}

impl RemoteCache {
    /// Time left before the provider discards the cache. Zero when expired
    /// or when the provider did not report an expiry.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expire_time
            .and_then(|expiry| (expiry - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

/// Provider operations needed to manage context caches.
#[async_trait]
pub trait ContextCacheApi: Send + Sync {
    /// Upload `contents` as a new cache for `model`.
    async fn create(
        &self,
        model: &str,
        display_name: &str,
        contents: &str,
        ttl: Duration,
    ) -> CacheResult<RemoteCache>;

    /// All caches visible to the credentials.
    async fn list(&self) -> CacheResult<Vec<RemoteCache>>;

    /// Reset the TTL of an existing cache, counted from now.
    async fn update_ttl(&self, name: &str, ttl: Duration) -> CacheResult<RemoteCache>;

    async fn delete(&self, name: &str) -> CacheResult<()>;
}
