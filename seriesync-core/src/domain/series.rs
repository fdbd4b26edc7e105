//! Daily series: named numeric columns over a strictly ascending date index.

use crate::data::provider::DataError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One observation date and its values, positionally matching `Series::columns`.
///
/// Missing observations are `f64::NAN`. Zero is kept as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub date: NaiveDate,
    pub values: Vec<f64>,
}

impl Row {
    pub fn new(date: NaiveDate, values: Vec<f64>) -> Self {
        Self { date, values }
    }
}

/// An ordered-by-date table of numeric observations.
///
/// Invariants (enforced by every constructor):
/// - every row has exactly `columns.len()` values
/// - dates are unique and ascending
/// - column names are unique
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Series {
    /// Build a series from rows in any order.
    ///
    /// Rows are sorted by date. A repeated date or a row of the wrong width is
    /// a `MalformedRecord`.
    pub fn new(columns: Vec<String>, mut rows: Vec<Row>) -> Result<Self, DataError> {
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                return Err(DataError::MalformedRecord(format!(
                    "duplicate column '{name}'"
                )));
            }
        }

        if let Some(row) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(DataError::MalformedRecord(format!(
                "row {} has {} values, expected {}",
                row.date,
                row.values.len(),
                columns.len()
            )));
        }

        rows.sort_by_key(|r| r.date);
        if let Some(pair) = rows.windows(2).find(|w| w[0].date == w[1].date) {
            return Err(DataError::MalformedRecord(format!(
                "duplicate date {}",
                pair[0].date
            )));
        }

        Ok(Self { columns, rows })
    }

    /// An empty series with the given columns.
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Row>) {
        (self.columns, self.rows)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    /// Latest observation date; drives the freshness check.
    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.rows.iter().map(|r| r.date)
    }

    /// `(date, value)` pairs of a single column, or `None` if the column is absent.
    pub fn column(&self, name: &str) -> Option<Vec<(NaiveDate, f64)>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| (r.date, r.values[idx])).collect())
    }

    /// Value at a given date and column.
    pub fn value(&self, date: NaiveDate, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        let pos = self.rows.binary_search_by_key(&date, |r| r.date).ok()?;
        Some(self.rows[pos].values[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn cols() -> Vec<String> {
        vec!["close".into(), "volume".into()]
    }

    #[test]
    fn rows_are_sorted_on_construction() {
        let s = Series::new(
            cols(),
            vec![Row::new(d(3), vec![2.0, 20.0]), Row::new(d(2), vec![1.0, 10.0])],
        )
        .unwrap();
        assert_eq!(s.first_date(), Some(d(2)));
        assert_eq!(s.last_date(), Some(d(3)));
    }

    #[test]
    fn duplicate_dates_are_rejected() {
        let err = Series::new(
            cols(),
            vec![Row::new(d(2), vec![1.0, 10.0]), Row::new(d(2), vec![1.5, 15.0])],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::MalformedRecord(_)));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Series::new(cols(), vec![Row::new(d(2), vec![1.0])]).unwrap_err();
        assert!(matches!(err, DataError::MalformedRecord(_)));
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let err = Series::new(vec!["close".into(), "close".into()], vec![]).unwrap_err();
        assert!(matches!(err, DataError::MalformedRecord(_)));
    }

    #[test]
    fn column_and_value_lookup() {
        let s = Series::new(
            cols(),
            vec![Row::new(d(2), vec![1.0, 10.0]), Row::new(d(3), vec![0.0, 20.0])],
        )
        .unwrap();
        assert_eq!(s.column("close").unwrap(), vec![(d(2), 1.0), (d(3), 0.0)]);
        assert_eq!(s.value(d(3), "volume"), Some(20.0));
        assert_eq!(s.value(d(4), "volume"), None);
        assert!(s.column("open").is_none());
    }
}
