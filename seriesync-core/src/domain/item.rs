//! Persisted units and baskets.

use super::{Identifier, Metadata, Series};
use crate::data::provider::DataError;
use chrono::NaiveDate;

/// The persisted unit: one identifier with its whole series and metadata.
///
/// Stores read and write whole items; nothing mutates a stored item in place.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredItem {
    identifier: Identifier,
    series: Series,
    metadata: Metadata,
}

impl StoredItem {
    /// Build an item, checking that `price_column` names an existing column.
    pub fn new(
        identifier: Identifier,
        series: Series,
        metadata: Metadata,
    ) -> Result<Self, DataError> {
        match metadata.price_column() {
            None => {
                return Err(DataError::MalformedRecord(format!(
                    "{identifier}: metadata has no price_column"
                )))
            }
            Some(col) if !series.has_column(col) => {
                return Err(DataError::MalformedRecord(format!(
                    "{identifier}: price column '{col}' not in series"
                )))
            }
            Some(_) => {}
        }

        Ok(Self {
            identifier,
            series,
            metadata,
        })
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn series(&self) -> &Series {
        &self.series
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn into_parts(self) -> (Identifier, Series, Metadata) {
        (self.identifier, self.series, self.metadata)
    }

    pub fn price_column(&self) -> &str {
        // Validated in `new`.
        self.metadata.price_column().unwrap_or_default()
    }

    /// Raw `(date, price)` pairs, zeros included.
    pub fn prices(&self) -> Vec<(NaiveDate, f64)> {
        self.series.column(self.price_column()).unwrap_or_default()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.series.last_date()
    }
}

/// One basket constituent with its published weight.
#[derive(Debug, Clone, PartialEq)]
pub struct BasketMember {
    pub identifier: Identifier,
    pub weight: f64,
}

impl BasketMember {
    pub fn new(identifier: impl Into<Identifier>, weight: f64) -> Self {
        Self {
            identifier: identifier.into(),
            weight,
        }
    }
}

/// A named, weight-ordered set of identifiers (an index's constituents).
#[derive(Debug, Clone, PartialEq)]
pub struct Basket {
    pub name: String,
    pub members: Vec<BasketMember>,
}

impl Basket {
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.members.iter().map(|m| m.identifier.clone()).collect()
    }
}
