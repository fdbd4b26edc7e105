//! Remote provider trait and structured error types.
//!
//! The TimeSeriesProvider trait abstracts over remote daily-series sources
//! (Alpha Vantage, Yahoo Finance) so the synchronizer can pace, classify and
//! merge without knowing which one it talks to, and so tests can mock them.

use crate::domain::{Identifier, Metadata, Series, StoredItem};
use thiserror::Error;

/// Structured error types for data operations.
///
/// These are designed to be displayable as per-identifier diagnostics.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("invalid identifier '{identifier}': {reason}")]
    InvalidIdentifier { identifier: String, reason: String },

    #[error("transient remote failure for '{identifier}': {reason}")]
    TransientRemote { identifier: String, reason: String },

    #[error("rate limited by provider while fetching '{identifier}': {reason}")]
    RateLimited { identifier: String, reason: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("'{identifier}' not found in storage")]
    NotFound { identifier: String },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("'{identifier}' already stored and overwrite is disabled")]
    AlreadyExists { identifier: String },

    #[error("unknown basket '{0}'")]
    UnknownBasket(String),

    #[error("unknown source '{0}'")]
    UnknownSource(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("parquet I/O error: {0}")]
    Parquet(String),

    #[error("frame assembly error: {0}")]
    Frame(String),

    #[error("response cache error: {0}")]
    Cache(String),

    #[error("http client error: {0}")]
    Client(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("synchronization cancelled")]
    Cancelled,
}

impl DataError {
    pub fn invalid(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        DataError::InvalidIdentifier {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }

    pub fn transient(identifier: impl Into<String>, reason: impl Into<String>) -> Self {
        DataError::TransientRemote {
            identifier: identifier.into(),
            reason: reason.into(),
        }
    }
}

/// Rows and metadata extracted for one identifier, not yet reconciled with storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub identifier: Identifier,
    pub series: Series,
    pub metadata: Metadata,
}

impl Fetched {
    pub fn new(identifier: impl Into<Identifier>, series: Series, metadata: Metadata) -> Self {
        Self {
            identifier: identifier.into(),
            series,
            metadata,
        }
    }

    /// Validate into a persistable item (price column must exist).
    pub fn into_item(self) -> Result<StoredItem, DataError> {
        StoredItem::new(self.identifier, self.series, self.metadata)
    }
}

/// Trait for remote daily-series providers.
///
/// Implementations do one network call per identifier and never sleep or
/// retry: pacing and backoff belong to the caller.
pub trait TimeSeriesProvider: Send + Sync {
    /// Source name this provider answers to (e.g. `av-daily-adjusted`).
    fn name(&self) -> &str;

    /// Fetch the full daily series the remote returns in one call.
    fn fetch(&self, identifier: &Identifier) -> Result<Fetched, DataError>;
}
