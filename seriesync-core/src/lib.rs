//! SeriesSync Core: daily series domain types and the incremental sync engine.
//!
//! This crate contains:
//! - Domain types (identifiers, series, metadata, stored items, baskets)
//! - An injectable clock
//! - The pacer and retry classifier wrapped around every remote fetch
//! - The merge engine reconciling fetched rows with stored history
//! - Basket resolution and duplicate-free request flattening
//! - Collaborators: item stores, the HTTP response cache, remote providers,
//!   the vendor spreadsheet reader and the basket membership source

pub mod clock;
pub mod data;
pub mod domain;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: everything the synchronizer shares is Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::StoredItem>();
        require_sync::<domain::StoredItem>();
        require_send::<domain::Basket>();
        require_sync::<domain::Basket>();

        require_send::<data::Pacer>();
        require_sync::<data::Pacer>();
        require_send::<data::IdentifierCatalog>();
        require_sync::<data::IdentifierCatalog>();
        require_send::<data::Source>();
        require_sync::<data::Source>();
        require_send::<data::ParquetStore>();
        require_sync::<data::ParquetStore>();
        require_send::<data::DiskResponseCache>();
        require_sync::<data::DiskResponseCache>();
        require_send::<clock::ManualClock>();
        require_sync::<clock::ManualClock>();
    }
}
