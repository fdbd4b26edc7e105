//! Deduplicated wide-table export.
//!
//! Requests are flattened (baskets expanded, duplicates dropped), each
//! identifier's price column is read from the store, and the columns are
//! outer-joined on date. Identifiers missing from the store, and stored
//! records that fail validation, are skipped with a warning.

use polars::prelude::DataFrame;
use seriesync_core::data::align::DATE_COLUMN;
use seriesync_core::data::{
    align_prices, flatten_requests, DataError, FailureClass, IdentifierCatalog, ItemStore,
    RetryClassifier,
};
use seriesync_core::domain::Identifier;
use std::sync::Arc;

/// An exported table and how it was assembled.
#[derive(Debug)]
pub struct ExportTable {
    /// `date` followed by one nullable price column per identifier.
    pub frame: DataFrame,
    /// Column labels in output order.
    pub columns: Vec<Identifier>,
    /// Requested identifiers with nothing stored.
    pub missing: Vec<Identifier>,
    /// Identifiers whose stored record could not be used, with the reason.
    pub skipped: Vec<(Identifier, DataError)>,
}

pub struct Exporter {
    store: Arc<dyn ItemStore>,
    catalog: Arc<IdentifierCatalog>,
}

impl Exporter {
    pub fn new(store: Arc<dyn ItemStore>, catalog: Arc<IdentifierCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Export the price columns of `requests` (identifiers and basket names).
    ///
    /// Calling this twice with the same requests and unchanged storage gives
    /// the same table.
    #[tracing::instrument(skip_all, fields(requests = requests.len()))]
    pub fn export<S: AsRef<str>>(&self, requests: &[S]) -> Result<ExportTable, DataError> {
        let identifiers = flatten_requests(requests, &self.catalog)?;

        let mut columns = Vec::with_capacity(identifiers.len());
        let mut missing = Vec::new();
        let mut skipped = Vec::new();
        for identifier in identifiers {
            if identifier.as_str() == DATE_COLUMN {
                let err = DataError::MalformedRecord(format!(
                    "'{identifier}' collides with the '{DATE_COLUMN}' column"
                ));
                tracing::warn!(identifier = %identifier, error = %err, "skipping export column");
                skipped.push((identifier, err));
                continue;
            }

            match self.store.get(&identifier) {
                Ok(Some(item)) => {
                    let prices = item.prices();
                    columns.push((identifier, prices));
                }
                Ok(None) => {
                    let err = DataError::NotFound {
                        identifier: identifier.to_string(),
                    };
                    tracing::warn!(identifier = %identifier, error = %err, "skipping export column");
                    missing.push(identifier);
                }
                Err(err) if RetryClassifier::classify(&err) == FailureClass::MalformedRecord => {
                    tracing::warn!(identifier = %identifier, error = %err, "skipping export column");
                    skipped.push((identifier, err));
                }
                Err(err) => return Err(err),
            }
        }

        let aligned = align_prices(columns);
        let frame = aligned.to_dataframe()?;
        tracing::debug!(
            columns = aligned.labels.len(),
            rows = aligned.dates.len(),
            missing = missing.len(),
            skipped = skipped.len(),
            "assembled export"
        );

        Ok(ExportTable {
            frame,
            columns: aligned.labels,
            missing,
            skipped,
        })
    }
}
