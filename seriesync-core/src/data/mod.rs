//! Sync engine pieces and the collaborators they talk to.

pub mod align;
pub mod alphavantage;
pub mod catalog;
pub mod dedup;
pub mod http;
pub mod http_cache;
pub mod membership;
pub mod merge;
pub mod numbers;
pub mod pacer;
pub mod provider;
pub mod retry;
pub mod source;
pub mod spreadsheet;
pub mod store;
pub mod yahoo;

pub use align::{align_prices, AlignedPrices};
pub use alphavantage::{AlphaVantageProvider, AlphaVantageSeries};
pub use catalog::IdentifierCatalog;
pub use dedup::flatten_requests;
pub use http::HttpFetcher;
pub use http_cache::{DiskResponseCache, MemoryResponseCache, ResponseCache};
pub use membership::{HttpMembershipSource, MembershipSource};
pub use merge::{is_up_to_date, reconcile, MergeOutcome, Reconciled};
pub use pacer::Pacer;
pub use provider::{DataError, Fetched, TimeSeriesProvider};
pub use retry::{FailureClass, RetryClassifier, RetryDecision};
pub use source::{Extracted, RemoteSource, Source};
pub use spreadsheet::SpreadsheetSource;
pub use store::{ItemStore, MemoryStore, ParquetStore};
pub use yahoo::YahooProvider;
