//! Server-side context caching.
//!
//! Large grounding text (scenario briefs, persona dossiers) is uploaded once
//! to the provider and referenced by name on later calls. The
//! [`ContextCacheManager`] owns one such cache for a run: it discovers or
//! creates it, renews it before it expires and deletes it at teardown.
//! Provider access goes through the [`ContextCacheApi`] trait.

mod error;
mod lifecycle;
mod traits;

pub use error::{CacheError, CacheResult};
pub use lifecycle::{
    CacheHandle, CacheState, ContextCacheManager, PurgeReport, list_all, purge_all,
};
pub use traits::{ContextCacheApi, RemoteCache};
