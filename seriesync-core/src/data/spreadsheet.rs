//! Vendor fund-quota spreadsheet reader.
//!
//! The vendor publishes one sheet with a row per (fund, date). Exported as
//! CSV it looks like:
//!
//! ```text
//! Fundo;Código;Data;Cota;Variação;Captação;Resgate;PL;Cotistas
//! TARPON GT FUNDO DE INVESTIMENTO EM AÇÕES;34259;24/06/2019;6,926969;0,005042;...
//! ```
//!
//! Rows are grouped per fund. Columns that never change within a fund are
//! dropped, except the `Cota` price column which is always kept.

use super::numbers::{parse_date, parse_decimal};
use super::provider::{DataError, Fetched};
use super::source::Extracted;
use crate::domain::{Identifier, MetaValue, Metadata, Row, Series};
use chrono::NaiveDate;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const SPREADSHEET_SOURCE: &str = "infofundos";
pub const FUND_COLUMN: &str = "Fundo";
pub const CODE_COLUMN: &str = "Código";
pub const DATE_COLUMN: &str = "Data";
pub const QUOTA_COLUMN: &str = "Cota";
const CODE_COLUMN_KEY: &str = "code";

/// Where a fund's display name turns into its legal description.
pub const DEFAULT_NAME_SPLIT: &str = "FUNDO|CRÉDITO";

pub struct SpreadsheetSource {
    name_split: Regex,
}

struct FundRow {
    date: NaiveDate,
    values: Vec<f64>,
}

impl SpreadsheetSource {
    pub fn new() -> Result<Self, DataError> {
        Self::with_name_split(DEFAULT_NAME_SPLIT)
    }

    /// Use a custom pattern to split fund names into identifier and description.
    pub fn with_name_split(pattern: &str) -> Result<Self, DataError> {
        let name_split = Regex::new(pattern)
            .map_err(|e| DataError::Config(format!("bad name split pattern '{pattern}': {e}")))?;
        Ok(Self { name_split })
    }

    /// Read an exported sheet from disk.
    ///
    /// An unreadable file is reported as an invalid identifier so a batch of
    /// paths keeps going.
    pub fn read_path(&self, path: &Path) -> Result<Extracted, DataError> {
        let text = fs::read_to_string(path)
            .map_err(|e| DataError::invalid(path.display().to_string(), e.to_string()))?;
        self.read_str(&text)
    }

    pub fn read_str(&self, text: &str) -> Result<Extracted, DataError> {
        let delimiter = sniff_delimiter(text);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| DataError::MalformedRecord(format!("failed to read sheet headers: {e}")))?
            .clone();

        let find = |name: &str| headers.iter().position(|h| h == name);
        let fund_idx = find(FUND_COLUMN).ok_or_else(|| {
            DataError::MalformedRecord(format!("sheet has no '{FUND_COLUMN}' column"))
        })?;
        let date_idx = find(DATE_COLUMN).ok_or_else(|| {
            DataError::MalformedRecord(format!("sheet has no '{DATE_COLUMN}' column"))
        })?;
        if find(QUOTA_COLUMN).is_none() {
            return Err(DataError::MalformedRecord(format!(
                "sheet has no '{QUOTA_COLUMN}' column"
            )));
        }

        let value_columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != fund_idx && *i != date_idx && !h.is_empty())
            .map(|(i, h)| (i, h.to_string()))
            .collect();

        let mut funds: BTreeMap<String, Vec<FundRow>> = BTreeMap::new();
        for record in reader.records() {
            let record = record
                .map_err(|e| DataError::MalformedRecord(format!("unreadable sheet row: {e}")))?;

            let fund = record.get(fund_idx).unwrap_or("");
            // Blank lines and the "Fonte: ..." footer have no parseable date.
            let Some(date) = record.get(date_idx).and_then(parse_date) else {
                continue;
            };
            if fund.is_empty() {
                continue;
            }

            let values = value_columns
                .iter()
                .map(|(i, _)| record.get(*i).and_then(parse_decimal).unwrap_or(f64::NAN))
                .collect();
            funds
                .entry(fund.to_string())
                .or_default()
                .push(FundRow { date, values });
        }

        let mut extracted = Extracted::default();
        for (fund, rows) in funds {
            match self.build_fund(&fund, &value_columns, rows) {
                Ok(fetched) => extracted.items.push(fetched),
                Err(e) => extracted.rejected.push((fund, e)),
            }
        }
        Ok(extracted)
    }

    fn build_fund(
        &self,
        fund: &str,
        value_columns: &[(usize, String)],
        rows: Vec<FundRow>,
    ) -> Result<Fetched, DataError> {
        let (identifier, description) = self.split_name(fund);

        let code = value_columns
            .iter()
            .position(|(_, h)| h == CODE_COLUMN)
            .and_then(|j| rows.last().map(|r| r.values[j]))
            .filter(|v| v.is_finite());

        let keep: Vec<usize> = (0..value_columns.len())
            .filter(|&j| value_columns[j].1 == QUOTA_COLUMN || varies(&rows, j))
            .collect();

        let columns = keep.iter().map(|&j| value_columns[j].1.clone()).collect();
        let rows = rows
            .into_iter()
            .map(|r| Row::new(r.date, keep.iter().map(|&j| r.values[j]).collect()))
            .collect();
        let series = Series::new(columns, rows)?;

        let mut metadata = Metadata::with_price_column(QUOTA_COLUMN);
        if let Some(code) = code {
            metadata.insert(CODE_COLUMN_KEY, MetaValue::Int(code as i64));
        }
        metadata.insert("description", MetaValue::Text(description));

        Ok(Fetched::new(identifier, series, metadata))
    }

    /// `"TARPON GT FUNDO DE INVESTIMENTO EM AÇÕES"` →
    /// (`"TARPON GT"`, `"FUNDO DE INVESTIMENTO EM AÇÕES"`).
    pub fn split_name(&self, fund: &str) -> (Identifier, String) {
        match self.name_split.find(fund) {
            Some(m) if m.start() > 0 => (
                Identifier::new(fund[..m.start()].trim()),
                fund[m.start()..].trim().to_string(),
            ),
            _ => (Identifier::new(fund.trim()), String::new()),
        }
    }
}

fn varies(rows: &[FundRow], j: usize) -> bool {
    let Some(first) = rows.first().map(|r| r.values[j]) else {
        return false;
    };
    rows.iter().any(|r| {
        let v = r.values[j];
        !(v == first || (v.is_nan() && first.is_nan()))
    })
}

/// `;` if the header line has one, otherwise `,`.
fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if header.contains(';') {
        b';'
    } else {
        b','
    }
}
