//! LLM invocation layer for multi-agent dialogue simulation.
//!
//! - [`providers::Engine`] sends a [`api_types::GenerationRequest`] to a
//!   chat-completion or Gemini-native backend, locking the speaking agent's
//!   identity and recovering structured output.
//! - [`cache::ContextCacheManager`] keeps large grounding text in a
//!   provider-side context cache for the length of a run.
//! - [`usage::UsageLedger`] prices every call with a [`pricing::PricingTable`]
//!   and persists run totals through a [`usage::UsageStore`].

pub mod api_types;
pub mod cache;
pub mod config;
#[cfg(feature = "cli")]
pub mod observability;
pub mod pricing;
pub mod providers;
pub mod usage;
pub mod validation;

pub use api_types::{
    CacheReference, GenerationContext, GenerationRequest, GenerationResult, Message,
    ResponseSchema, Role,
};
pub use cache::{CacheError, ContextCacheManager};
pub use config::{ConfigError, TroupeConfig};
pub use providers::{Engine, EngineError, ErrorKind};
pub use usage::{UsageLedger, UsageStore};
