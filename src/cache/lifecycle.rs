use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::{
    error::CacheResult,
    traits::{ContextCacheApi, RemoteCache},
};
use crate::{api_types::CacheReference, config::ContextCacheConfig, pricing::normalize_model_id};

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn after(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    instant
        .checked_add_signed(to_delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn same_model(a: &str, b: &str) -> bool {
    normalize_model_id(a) == normalize_model_id(b)
}

/// Lifecycle state of the managed cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Creating,
    Active,
    Renewing,
    Deleting,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Renewing => "renewing",
            Self::Deleting => "deleting",
        }
    }
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Local view of the cache this process relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHandle {
    pub id: String,
    pub model_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_renewed_at: DateTime<Utc>,
    /// Only ever moves forward.
    pub expires_at: DateTime<Utc>,
}

impl CacheHandle {
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn reference(&self) -> CacheReference {
        CacheReference {
            name: self.id.clone(),
            model: self.model_id.clone(),
        }
    }

    fn extend_to(&mut self, expiry: DateTime<Utc>) {
        if expiry > self.expires_at {
            self.expires_at = expiry;
        }
    }
}

/// Outcome of deleting every visible cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Every cache the credentials can see, ordered by display name.
pub async fn list_all(api: &dyn ContextCacheApi) -> CacheResult<Vec<RemoteCache>> {
    let mut caches = api.list().await?;
    caches.sort_by(|a, b| {
        a.display_name
            .cmp(&b.display_name)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(caches)
}

/// Delete every cache the credentials can see. Individual failures are
/// logged and reported; only a failed listing is an error.
pub async fn purge_all(api: &dyn ContextCacheApi) -> CacheResult<PurgeReport> {
    let mut report = PurgeReport::default();
    for cache in api.list().await? {
        match api.delete(&cache.name).await {
            Ok(()) => {
                info!(cache = %cache.name, "Deleted context cache");
                report.deleted.push(cache.name);
            }
            Err(e) => {
                warn!(cache = %cache.name, error = %e, "Failed to delete context cache");
                report.failed.push(cache.name);
            }
        }
    }
    Ok(report)
}

/// Owns the context cache for one run.
///
/// Every failure is logged and leaves the manager in [`CacheState::Absent`];
/// callers then simply generate without a cache.
pub struct ContextCacheManager {
    api: Arc<dyn ContextCacheApi>,
    model: String,
    config: ContextCacheConfig,
    state: CacheState,
    handle: Option<CacheHandle>,
}

impl std::fmt::Debug for ContextCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextCacheManager")
            .field("model", &self.model)
            .field("config", &self.config)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ContextCacheManager {
    pub fn new(
        api: Arc<dyn ContextCacheApi>,
        model: impl Into<String>,
        config: ContextCacheConfig,
    ) -> Self {
        Self {
            api,
            model: model.into(),
            config,
            state: CacheState::Absent,
            handle: None,
        }
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn handle(&self) -> Option<&CacheHandle> {
        self.handle.as_ref()
    }

    /// Reference to pass in a generation context, if a live cache is held.
    pub fn reference(&self) -> Option<CacheReference> {
        self.reference_at(Utc::now())
    }

    pub fn reference_at(&self, now: DateTime<Utc>) -> Option<CacheReference> {
        if self.state != CacheState::Active {
            return None;
        }
        let handle = self.handle.as_ref()?;
        if handle.is_expired(now) {
            debug!(cache = %handle.id, "Context cache past expiry, not referencing it");
            return None;
        }
        Some(handle.reference())
    }

    /// Make sure a cache holding `grounding` exists under `display_name`.
    ///
    /// Grounding text at or below the size threshold is never cached.
    pub async fn ensure(&mut self, display_name: &str, grounding: &str) -> Option<CacheReference> {
        self.ensure_at(display_name, grounding, Utc::now()).await
    }

    pub async fn ensure_at(
        &mut self,
        display_name: &str,
        grounding: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheReference> {
        if !self.config.enabled {
            debug!("Context caching disabled");
            return None;
        }

        let chars = grounding.chars().count();
        if chars <= self.config.min_chars {
            debug!(
                chars,
                min_chars = self.config.min_chars,
                "Grounding text below caching threshold, sending uncached"
            );
            return None;
        }

        if let Some(handle) = &self.handle
            && self.state == CacheState::Active
            && handle.display_name == display_name
            && handle.remaining(now) > self.config.reuse_min_remaining()
        {
            return Some(handle.reference());
        }

        if let Some(previous) = self.handle.take()
            && previous.display_name != display_name
        {
            self.state = CacheState::Deleting;
            self.delete_remote(&previous.id, "replaced").await;
        }
        self.state = CacheState::Creating;

        let existing = match self.api.list().await {
            Ok(caches) => caches,
            Err(e) => return self.degrade("list", e),
        };

        let mut matches: Vec<RemoteCache> = existing
            .into_iter()
            .filter(|c| c.display_name.as_deref() == Some(display_name))
            .collect();
        // Longest remaining TTL first; ties broken by name for determinism.
        matches.sort_by(|a, b| {
            b.remaining(now)
                .cmp(&a.remaining(now))
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut matches = matches.into_iter();
        if let Some(best) = matches.next() {
            for duplicate in matches {
                self.delete_remote(&duplicate.name, "duplicate").await;
            }

            let remaining = best.remaining(now);
            if same_model(&best.model, &self.model) && remaining > self.config.reuse_min_remaining()
            {
                return Some(self.adopt(best, display_name, now));
            }

            debug!(
                cache = %best.name,
                remaining_secs = remaining.as_secs(),
                cache_model = %best.model,
                "Existing context cache unusable, recreating"
            );
            self.delete_remote(&best.name, "stale").await;
        }

        match self
            .api
            .create(&self.model, display_name, grounding, self.config.ttl())
            .await
        {
            Ok(remote) => {
                let expires_at = remote
                    .expire_time
                    .unwrap_or(after(now, self.config.ttl()));
                let handle = CacheHandle {
                    id: remote.name,
                    model_id: self.model.clone(),
                    display_name: display_name.to_string(),
                    created_at: now,
                    last_renewed_at: now,
                    expires_at,
                };
                info!(
                    cache = %handle.id,
                    display_name,
                    chars,
                    expires_at = %handle.expires_at,
                    "Created context cache"
                );
                let reference = handle.reference();
                self.handle = Some(handle);
                self.state = CacheState::Active;
                Some(reference)
            }
            Err(e) => self.degrade("create", e),
        }
    }

    /// Extend the TTL if enough time has passed since the last renewal.
    /// Returns true when a renewal happened.
    pub async fn renew_if_due(&mut self) -> bool {
        self.renew_if_due_at(Utc::now()).await
    }

    pub async fn renew_if_due_at(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != CacheState::Active {
            return false;
        }
        let Some(handle) = &self.handle else {
            return false;
        };
        if now - handle.last_renewed_at <= to_delta(self.config.renew_after()) {
            return false;
        }

        let id = handle.id.clone();
        self.state = CacheState::Renewing;
        match self.api.update_ttl(&id, self.config.ttl()).await {
            Ok(remote) => {
                let expiry = remote
                    .expire_time
                    .unwrap_or(after(now, self.config.ttl()));
                if let Some(handle) = self.handle.as_mut() {
                    handle.extend_to(expiry);
                    handle.last_renewed_at = now;
                    info!(cache = %handle.id, expires_at = %handle.expires_at, "Renewed context cache");
                }
                self.state = CacheState::Active;
                true
            }
            Err(e) => {
                self.degrade::<()>("renew", e);
                false
            }
        }
    }

    /// Delete the managed cache. Failures are logged; the manager always
    /// ends up absent.
    pub async fn delete(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.state = CacheState::Deleting;
            self.delete_remote(&handle.id, "teardown").await;
        }
        self.state = CacheState::Absent;
    }

    fn adopt(&mut self, remote: RemoteCache, display_name: &str, now: DateTime<Utc>) -> CacheReference {
        let expires_at = remote.expire_time.unwrap_or(now);
        // The provider does not report when the TTL was last set; infer it
        // from the expiry so renewal fires before the cache lapses.
        let last_renewed_at = expires_at
            .checked_sub_signed(to_delta(self.config.ttl()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .min(now);
        let handle = CacheHandle {
            id: remote.name,
            model_id: self.model.clone(),
            display_name: display_name.to_string(),
            created_at: remote.create_time.unwrap_or(last_renewed_at),
            last_renewed_at,
            expires_at,
        };
        info!(
            cache = %handle.id,
            display_name,
            remaining_secs = handle.remaining(now).as_secs(),
            "Reusing existing context cache"
        );
        let reference = handle.reference();
        self.handle = Some(handle);
        self.state = CacheState::Active;
        reference
    }

    async fn delete_remote(&self, name: &str, reason: &str) {
        match self.api.delete(name).await {
            Ok(()) => debug!(cache = name, reason, "Deleted context cache"),
            Err(e) => warn!(cache = name, reason, error = %e, "Failed to delete context cache"),
        }
    }

    fn degrade<T>(&mut self, operation: &str, error: super::CacheError) -> Option<T> {
        warn!(
            operation,
            error = %error,
            "Context cache operation failed, continuing uncached"
        );
        self.handle = None;
        self.state = CacheState::Absent;
        None
    }
}
