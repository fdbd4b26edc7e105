//! Incremental merge of freshly fetched rows into stored history.
//!
//! Rules:
//! - a stored series whose latest date is today is up to date (checked before
//!   any remote call)
//! - fetched rows win on every date they cover
//! - stored dates outside the fetched window are kept unchanged
//! - metadata is overlaid, never replaced wholesale
//! - values are copied verbatim; zero stays zero

use super::provider::{DataError, Fetched};
use crate::domain::{Row, Series, StoredItem};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// True when the stored series already holds an observation for `today`.
///
/// Only the latest date is compared; gaps left by earlier runs are not detected.
pub fn is_up_to_date(existing: &StoredItem, today: NaiveDate) -> bool {
    existing.last_date() == Some(today)
}

/// What a reconcile did, for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing was stored before.
    Created { rows: usize },
    /// Merged into existing history.
    Merged {
        /// Fetched dates absent from storage.
        added: usize,
        /// Stored dates overwritten by fetched values.
        replaced: usize,
        /// Stored dates outside the fetched window.
        kept: usize,
    },
}

/// The item to persist plus what happened.
#[derive(Debug, Clone)]
pub struct Reconciled {
    pub item: StoredItem,
    pub outcome: MergeOutcome,
}

/// Union of two series: `fetched` rows plus `existing` rows on dates `fetched`
/// lacks, ascending.
///
/// Columns are `fetched`'s followed by any column only `existing` has; cells a
/// side does not carry are NaN.
pub fn merge_series(existing: &Series, fetched: &Series) -> Result<Series, DataError> {
    let mut columns: Vec<String> = fetched.columns().to_vec();
    for col in existing.columns() {
        if !columns.contains(col) {
            columns.push(col.clone());
        }
    }

    let project = |series: &Series| -> Vec<Option<usize>> {
        columns.iter().map(|c| series.column_index(c)).collect()
    };
    let fetched_map = project(fetched);
    let existing_map = project(existing);

    let reshape = |row: &Row, map: &[Option<usize>]| -> Vec<f64> {
        map.iter()
            .map(|idx| idx.map_or(f64::NAN, |i| row.values[i]))
            .collect()
    };

    let mut merged: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for row in existing.rows() {
        merged.insert(row.date, reshape(row, &existing_map));
    }
    for row in fetched.rows() {
        merged.insert(row.date, reshape(row, &fetched_map));
    }

    let rows = merged
        .into_iter()
        .map(|(date, values)| Row::new(date, values))
        .collect();
    Series::new(columns, rows)
}

/// Reconcile fetched data with whatever is stored for the same identifier.
pub fn reconcile(existing: Option<StoredItem>, fetched: Fetched) -> Result<Reconciled, DataError> {
    let Some(existing) = existing else {
        let rows = fetched.series.len();
        return Ok(Reconciled {
            item: fetched.into_item()?,
            outcome: MergeOutcome::Created { rows },
        });
    };

    let (identifier, old_series, mut metadata) = existing.into_parts();

    let old_dates: BTreeSet<NaiveDate> = old_series.dates().collect();
    let replaced = fetched
        .series
        .dates()
        .filter(|d| old_dates.contains(d))
        .count();
    let added = fetched.series.len() - replaced;
    let kept = old_series.len() - replaced;

    let series = merge_series(&old_series, &fetched.series)?;
    metadata.merge_from(fetched.metadata);

    Ok(Reconciled {
        item: StoredItem::new(identifier, series, metadata)?,
        outcome: MergeOutcome::Merged {
            added,
            replaced,
            kept,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Metadata;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn close_series(points: &[(u32, f64)]) -> Series {
        Series::new(
            vec!["close".into()],
            points
                .iter()
                .map(|(day, v)| Row::new(d(*day), vec![*v]))
                .collect(),
        )
        .unwrap()
    }

    fn stored(points: &[(u32, f64)], meta: Metadata) -> StoredItem {
        StoredItem::new("PETR4.SAO".into(), close_series(points), meta).unwrap()
    }

    #[test]
    fn merge_preserves_history_and_prefers_fetched() {
        let existing = stored(
            &[(1, 10.0), (2, 11.0), (3, 12.0), (4, 13.0), (5, 14.0)],
            Metadata::with_price_column("close"),
        );
        let fetched = Fetched::new(
            "PETR4.SAO",
            close_series(&[(4, 23.0), (5, 24.0), (6, 25.0), (7, 26.0)]),
            Metadata::with_price_column("close"),
        );

        let out = reconcile(Some(existing), fetched).unwrap();
        let prices = out.item.prices();

        assert_eq!(
            prices,
            vec![
                (d(1), 10.0),
                (d(2), 11.0),
                (d(3), 12.0),
                (d(4), 23.0),
                (d(5), 24.0),
                (d(6), 25.0),
                (d(7), 26.0),
            ]
        );
        assert_eq!(
            out.outcome,
            MergeOutcome::Merged {
                added: 2,
                replaced: 2,
                kept: 3
            }
        );
    }

    #[test]
    fn metadata_is_overlaid() {
        let existing = stored(
            &[(1, 10.0)],
            Metadata::with_price_column("close")
                .with("a", 1i64)
                .with("b", 2i64),
        );
        let fetched = Fetched::new(
            "PETR4.SAO",
            close_series(&[(2, 11.0)]),
            Metadata::new().with("b", 3i64).with("c", 4i64),
        );

        let out = reconcile(Some(existing), fetched).unwrap();
        let expected = Metadata::with_price_column("close")
            .with("a", 1i64)
            .with("b", 3i64)
            .with("c", 4i64);
        assert_eq!(out.item.metadata(), &expected);
    }

    #[test]
    fn zero_prices_survive_merge() {
        let existing = stored(&[(1, 0.0), (2, 11.0)], Metadata::with_price_column("close"));
        let fetched = Fetched::new(
            "PETR4.SAO",
            close_series(&[(3, 0.0)]),
            Metadata::with_price_column("close"),
        );

        let out = reconcile(Some(existing), fetched).unwrap();
        assert_eq!(out.item.series().value(d(1), "close"), Some(0.0));
        assert_eq!(out.item.series().value(d(3), "close"), Some(0.0));
    }

    #[test]
    fn first_import_is_stored_as_is() {
        let fetched = Fetched::new(
            "PETR4.SAO",
            close_series(&[(1, 10.0), (2, 11.0)]),
            Metadata::with_price_column("close"),
        );
        let out = reconcile(None, fetched.clone()).unwrap();
        assert_eq!(out.outcome, MergeOutcome::Created { rows: 2 });
        assert_eq!(out.item.series(), &fetched.series);
    }

    #[test]
    fn first_import_without_price_column_is_malformed() {
        let fetched = Fetched::new("X", close_series(&[(1, 1.0)]), Metadata::new());
        assert!(matches!(
            reconcile(None, fetched),
            Err(DataError::MalformedRecord(_))
        ));
    }

    #[test]
    fn columns_missing_on_one_side_become_nan() {
        let existing = stored(&[(1, 10.0)], Metadata::with_price_column("close"));
        let fetched_series = Series::new(
            vec!["close".into(), "volume".into()],
            vec![Row::new(d(2), vec![11.0, 500.0])],
        )
        .unwrap();
        let fetched = Fetched::new("PETR4.SAO", fetched_series, Metadata::new());

        let out = reconcile(Some(existing), fetched).unwrap();
        let series = out.item.series();
        assert_eq!(series.columns(), &["close".to_string(), "volume".to_string()]);
        assert!(series.value(d(1), "volume").unwrap().is_nan());
        assert_eq!(series.value(d(2), "volume"), Some(500.0));
    }

    #[test]
    fn freshness_compares_latest_date_only() {
        let item = stored(&[(1, 10.0), (5, 11.0)], Metadata::with_price_column("close"));
        assert!(is_up_to_date(&item, d(5)));
        assert!(!is_up_to_date(&item, d(6)));
    }
}
