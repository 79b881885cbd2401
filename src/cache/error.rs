use thiserror::Error;

use crate::providers::EngineError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{0} does not support context caching")]
    Unsupported(&'static str),

    #[error(transparent)]
    Provider(#[from] EngineError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
