//! Typed hard errors of the cache.
//!
//! Библиотека возвращает anyhow::Result, но ошибки, которые вызывающий код должен
//! различать (порча индекса, отказ источника данных цепи), создаются как CacheError
//! и достаются через `err.downcast_ref::<CacheError>()`.
//!
//! Soft misses (checksum mismatch, wrong network, old version, ...) are not errors:
//! see `store::MissReason`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// Malformed index line, or unparsable hex on an otherwise matched entry.
    #[error("checksum index corrupted at line ({line}): {reason}")]
    IndexCorruption { line: String, reason: String },

    /// Cold generation failed: the chain could not be queried for the block.
    #[error("error getting voting info for block {block}: {source:#}")]
    ChainQuery {
        block: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Artifact could not be serialized on save.
    #[error("error serializing {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl CacheError {
    pub fn index_corruption(line: &str, reason: impl Into<String>) -> Self {
        CacheError::IndexCorruption {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// True for errors that indicate a damaged index rather than an expected miss.
    pub fn is_index_corruption(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::IndexCorruption { .. })
        )
    }

    pub fn is_chain_query(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<CacheError>(),
            Some(CacheError::ChainQuery { .. })
        )
    }
}
