//! Multi-identifier date alignment for export.
//!
//! Given one price column per identifier, outer-join them on date into a wide
//! table. Missing combinations, NaN and exact-zero prices all become nulls.

use super::provider::DataError;
use crate::domain::Identifier;
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};

/// Name of the date column in exported frames.
pub const DATE_COLUMN: &str = "date";

/// Price columns aligned to a common timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPrices {
    /// The common date axis (sorted ascending).
    pub dates: Vec<NaiveDate>,
    /// Column labels, in the order given.
    pub labels: Vec<Identifier>,
    /// One column per label, each the same length as `dates`.
    pub columns: Vec<Vec<Option<f64>>>,
}

/// Align price columns to the union of their dates.
///
/// Exact zero is a provider's "no data" sentinel and is read out as missing.
pub fn align_prices(columns: Vec<(Identifier, Vec<(NaiveDate, f64)>)>) -> AlignedPrices {
    let dates: Vec<NaiveDate> = columns
        .iter()
        .flat_map(|(_, points)| points.iter().map(|(d, _)| *d))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut labels = Vec::with_capacity(columns.len());
    let mut aligned = Vec::with_capacity(columns.len());

    for (label, points) in columns {
        let by_date: HashMap<NaiveDate, f64> = points.into_iter().collect();
        aligned.push(
            dates
                .iter()
                .map(|d| by_date.get(d).copied().and_then(as_price))
                .collect(),
        );
        labels.push(label);
    }

    AlignedPrices {
        dates,
        labels,
        columns: aligned,
    }
}

fn as_price(value: f64) -> Option<f64> {
    if value == 0.0 || value.is_nan() {
        None
    } else {
        Some(value)
    }
}

impl AlignedPrices {
    /// Convert to a Polars frame: `date` then one nullable f64 column per label.
    ///
    /// A label equal to `date` (or repeated) is a `Frame` error.
    pub fn to_dataframe(&self) -> Result<DataFrame, DataError> {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
            .ok_or_else(|| DataError::Frame("epoch date".into()))?;
        let days: Vec<i32> = self
            .dates
            .iter()
            .map(|d| (*d - epoch).num_days() as i32)
            .collect();

        let mut frame_columns = Vec::with_capacity(self.labels.len() + 1);
        frame_columns.push(
            Column::new(DATE_COLUMN.into(), days)
                .cast(&DataType::Date)
                .map_err(|e| DataError::Frame(format!("date cast: {e}")))?,
        );
        for (label, values) in self.labels.iter().zip(&self.columns) {
            frame_columns.push(Column::new(label.as_str().into(), values.clone()));
        }

        DataFrame::new(frame_columns)
            .map_err(|e| DataError::Frame(format!("dataframe creation: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn align_fills_missing_with_none() {
        let aligned = align_prices(vec![
            (
                "PETR4.SAO".into(),
                vec![
                    (d("2019-06-24"), 28.25),
                    (d("2019-06-25"), 27.51),
                    (d("2019-06-26"), 27.67),
                ],
            ),
            (
                "TARPON GT".into(),
                vec![(d("2019-06-24"), 6.926969), (d("2019-06-25"), 6.845344)],
            ),
        ]);

        assert_eq!(aligned.dates.len(), 3);
        assert_eq!(aligned.columns[0][2], Some(27.67));
        assert_eq!(aligned.columns[1][2], None);
    }

    #[test]
    fn zero_and_nan_read_out_as_missing() {
        let aligned = align_prices(vec![(
            "X".into(),
            vec![(d("2024-01-02"), 0.0), (d("2024-01-03"), f64::NAN), (d("2024-01-04"), 1.0)],
        )]);
        assert_eq!(aligned.columns[0], vec![None, None, Some(1.0)]);
    }

    #[test]
    fn dataframe_keeps_label_order() {
        let aligned = align_prices(vec![
            ("B".into(), vec![(d("2024-01-02"), 2.0)]),
            ("A".into(), vec![(d("2024-01-03"), 1.0)]),
        ]);
        let df = aligned.to_dataframe().unwrap();

        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["date", "B", "A"]);
        assert_eq!(df.height(), 2);
        assert_eq!(df.column("B").unwrap().f64().unwrap().get(1), None);
        assert_eq!(df.column("A").unwrap().f64().unwrap().get(1), Some(1.0));
    }

    #[test]
    fn label_named_like_the_date_column_is_a_frame_error() {
        let aligned = align_prices(vec![(DATE_COLUMN.into(), vec![(d("2024-01-02"), 2.0)])]);
        let err = aligned.to_dataframe().unwrap_err();
        assert!(matches!(err, DataError::Frame(_)));
    }
}
