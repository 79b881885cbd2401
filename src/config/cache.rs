use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Server-side context cache lifecycle settings.
///
/// Durations are in seconds. Renewal must happen well before expiry, so
/// `renew_after_secs` and `reuse_min_remaining_secs` must both be below
/// `ttl_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextCacheConfig {
    /// Whether grounding text is cached at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Grounding text must be longer than this many characters to be cached.
    /// Smaller contexts are cheaper to send uncached.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,

    /// TTL requested on creation and renewal.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// An existing cache is reused only if it has at least this long left.
    #[serde(default = "default_reuse_min_remaining_secs")]
    pub reuse_min_remaining_secs: u64,

    /// Renew once this long has passed since the last renewal.
    #[serde(default = "default_renew_after_secs")]
    pub renew_after_secs: u64,
}

impl Default for ContextCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_chars: default_min_chars(),
            ttl_secs: default_ttl_secs(),
            reuse_min_remaining_secs: default_reuse_min_remaining_secs(),
            renew_after_secs: default_renew_after_secs(),
        }
    }
}

impl ContextCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn reuse_min_remaining(&self) -> Duration {
        Duration::from_secs(self.reuse_min_remaining_secs)
    }

    pub fn renew_after(&self) -> Duration {
        Duration::from_secs(self.renew_after_secs)
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.ttl_secs == 0 {
            return Err("context_cache.ttl_secs must be positive".into());
        }
        if self.renew_after_secs >= self.ttl_secs {
            return Err(format!(
                "context_cache.renew_after_secs ({}) must be below ttl_secs ({})",
                self.renew_after_secs, self.ttl_secs
            ));
        }
        if self.reuse_min_remaining_secs >= self.ttl_secs {
            return Err(format!(
                "context_cache.reuse_min_remaining_secs ({}) must be below ttl_secs ({})",
                self.reuse_min_remaining_secs, self.ttl_secs
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_min_chars() -> usize {
    4000
}

fn default_ttl_secs() -> u64 {
    60 * 60
}

fn default_reuse_min_remaining_secs() -> u64 {
    15 * 60
}

fn default_renew_after_secs() -> u64 {
    45 * 60
}
