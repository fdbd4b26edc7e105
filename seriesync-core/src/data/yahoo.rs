//! Yahoo Finance daily series provider.
//!
//! Fetches daily bars from Yahoo's v8 chart API in one call per symbol.
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; parse failures surface as `ResponseFormatChanged`.

use super::http::HttpFetcher;
use super::provider::{DataError, Fetched, TimeSeriesProvider};
use crate::domain::{Identifier, Metadata, Row, Series};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Source name for this provider.
pub const YAHOO_SOURCE: &str = "yahoo";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

const COLUMNS: [&str; 6] = ["open", "high", "low", "close", "adjusted close", "volume"];

/// Yahoo Finance data provider.
pub struct YahooProvider {
    http: HttpFetcher,
    range: String,
}

impl YahooProvider {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            range: "max".into(),
        }
    }

    /// Chart range to request (`max`, `10y`, `1y`, ...).
    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = range.into();
        self
    }

    fn chart_url(&self, symbol: &str) -> String {
        format!(
            "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
             ?range={}&interval=1d&includeAdjustedClose=true",
            self.range
        )
    }

    /// Parse a chart API body into a series with an `adjusted close` price column.
    pub fn parse_body(identifier: &Identifier, body: &str) -> Result<Fetched, DataError> {
        let resp: ChartResponse = serde_json::from_str(body).map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {identifier}: {e}"))
        })?;
        let rows = parse_rows(identifier, resp)?;

        let series = Series::new(COLUMNS.iter().map(|c| c.to_string()).collect(), rows)?;
        Ok(Fetched::new(
            identifier.clone(),
            series,
            Metadata::with_price_column("adjusted close"),
        ))
    }
}

fn parse_rows(identifier: &Identifier, resp: ChartResponse) -> Result<Vec<Row>, DataError> {
    let result = resp.chart.result.ok_or_else(|| {
        if let Some(err) = resp.chart.error {
            if err.code == "Not Found" {
                DataError::invalid(identifier.as_str(), err.description)
            } else {
                DataError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
        } else {
            DataError::ResponseFormatChanged("empty result with no error".into())
        }
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

    let timestamps = data
        .timestamp
        .ok_or_else(|| DataError::invalid(identifier.as_str(), "no timestamps in response"))?;

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("no quote data".into()))?;

    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    // Yahoo occasionally repeats the latest bar; keep the last one per date.
    let mut by_date: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for (i, &ts) in timestamps.iter().enumerate() {
        let date = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc().date())
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?;

        let at = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let values = [
            at(&quote.open),
            at(&quote.high),
            at(&quote.low),
            at(&quote.close),
            adj_closes.as_ref().and_then(at),
            at(&quote.volume),
        ];

        // Holidays come back as all-null bars.
        if values.iter().all(Option::is_none) {
            continue;
        }

        by_date.insert(date, values.iter().map(|v| v.unwrap_or(f64::NAN)).collect());
    }

    if by_date.is_empty() {
        return Err(DataError::invalid(identifier.as_str(), "no bars returned"));
    }

    Ok(by_date
        .into_iter()
        .map(|(date, values)| Row::new(date, values))
        .collect())
}

impl TimeSeriesProvider for YahooProvider {
    fn name(&self) -> &str {
        YAHOO_SOURCE
    }

    fn fetch(&self, identifier: &Identifier) -> Result<Fetched, DataError> {
        let body = self
            .http
            .get_text(identifier.as_str(), &self.chart_url(identifier.as_str()))?;
        Self::parse_body(identifier, &body)
    }
}
