//! SeriesSync Runner: batch synchronization, export and configuration.
//!
//! This crate builds on `seriesync-core` to provide:
//! - The synchronizer (basket expansion, pacing, failure containment, merge, persistence)
//! - Deduplicated wide-table export
//! - TOML configuration and the factory for stores, caches, catalogs and sources

pub mod config;
pub mod export;
pub mod synchronizer;

pub use config::{ConfigError, SourceConfig, SyncConfig};
pub use export::{ExportTable, Exporter};
pub use synchronizer::{LogProgress, SyncOutcome, SyncProgress, SyncSummary, Synchronizer};
