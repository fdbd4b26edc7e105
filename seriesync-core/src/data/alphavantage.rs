//! Alpha Vantage daily series provider.
//!
//! Free keys allow five calls per minute, so `av-*` sources default to a
//! 15 second pacing interval (see `pacer::default_min_interval`).

use super::http::HttpFetcher;
use super::provider::{DataError, Fetched, TimeSeriesProvider};
use crate::domain::{Identifier, Metadata, Row, Series};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

const BASE_URL: &str = "https://www.alphavantage.co/query";
const SERIES_KEY: &str = "Time Series (Daily)";

/// Which daily endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaVantageSeries {
    /// `TIME_SERIES_DAILY_ADJUSTED`, priced on `adjusted close`.
    DailyAdjusted,
    /// `TIME_SERIES_DAILY`, priced on `close`.
    Daily,
}

impl AlphaVantageSeries {
    /// Map a source name (`av-daily-adjusted`, `av-daily`) to an endpoint.
    pub fn from_source_name(name: &str) -> Option<Self> {
        match name {
            "av-daily-adjusted" => Some(Self::DailyAdjusted),
            "av-daily" => Some(Self::Daily),
            _ => None,
        }
    }

    pub fn source_name(self) -> &'static str {
        match self {
            Self::DailyAdjusted => "av-daily-adjusted",
            Self::Daily => "av-daily",
        }
    }

    fn function(self) -> &'static str {
        match self {
            Self::DailyAdjusted => "TIME_SERIES_DAILY_ADJUSTED",
            Self::Daily => "TIME_SERIES_DAILY",
        }
    }

    fn price_column(self) -> &'static str {
        match self {
            Self::DailyAdjusted => "adjusted close",
            Self::Daily => "close",
        }
    }
}

pub struct AlphaVantageProvider {
    http: HttpFetcher,
    api_key: String,
    series: AlphaVantageSeries,
}

impl AlphaVantageProvider {
    pub fn new(http: HttpFetcher, api_key: impl Into<String>, series: AlphaVantageSeries) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            series,
        }
    }

    fn query_url(&self, symbol: &str) -> String {
        format!(
            "{BASE_URL}?function={}&symbol={symbol}&outputsize=full&apikey={}",
            self.series.function(),
            self.api_key
        )
    }

    /// Parse a daily series body. Field labels like `"5. adjusted close"` lose their numbering.
    pub fn parse_body(
        identifier: &Identifier,
        series_kind: AlphaVantageSeries,
        body: &str,
    ) -> Result<Fetched, DataError> {
        let json: Value = serde_json::from_str(body).map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse response for {identifier}: {e}"))
        })?;

        if let Some(msg) = json.get("Error Message").and_then(Value::as_str) {
            return Err(DataError::invalid(identifier.as_str(), msg));
        }
        for key in ["Note", "Information"] {
            if let Some(msg) = json.get(key).and_then(Value::as_str) {
                return Err(DataError::RateLimited {
                    identifier: identifier.to_string(),
                    reason: msg.to_string(),
                });
            }
        }

        let days = json.get(SERIES_KEY).and_then(Value::as_object).ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("missing '{SERIES_KEY}' for {identifier}"))
        })?;
        if days.is_empty() {
            return Err(DataError::invalid(identifier.as_str(), "empty daily series"));
        }

        let mut labels: Vec<String> = Vec::new();
        let mut by_date: BTreeMap<NaiveDate, BTreeMap<String, f64>> = BTreeMap::new();
        for (day, fields) in days {
            let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| {
                DataError::ResponseFormatChanged(format!("bad date '{day}': {e}"))
            })?;
            let fields = fields.as_object().ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("day '{day}' is not an object"))
            })?;

            let mut values = BTreeMap::new();
            for (label, raw) in fields {
                let name = strip_label(label);
                let value = raw
                    .as_str()
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .ok_or_else(|| {
                        DataError::ResponseFormatChanged(format!("non-numeric '{label}' on {day}"))
                    })?;
                if !labels.iter().any(|l| l == name) {
                    labels.push(name.to_string());
                }
                values.insert(name.to_string(), value);
            }
            by_date.insert(date, values);
        }

        let rows = by_date
            .into_iter()
            .map(|(date, values)| {
                let row = labels
                    .iter()
                    .map(|l| values.get(l).copied().unwrap_or(f64::NAN))
                    .collect();
                Row::new(date, row)
            })
            .collect();

        let series = Series::new(labels, rows)?;
        Ok(Fetched::new(
            identifier.clone(),
            series,
            Metadata::with_price_column(series_kind.price_column()),
        ))
    }
}

/// `"5. adjusted close"` → `"adjusted close"`.
fn strip_label(label: &str) -> &str {
    match label.split_once(". ") {
        Some((n, rest)) if n.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => label,
    }
}

impl TimeSeriesProvider for AlphaVantageProvider {
    fn name(&self) -> &str {
        self.series.source_name()
    }

    fn fetch(&self, identifier: &Identifier) -> Result<Fetched, DataError> {
        let body = self
            .http
            .get_text(identifier.as_str(), &self.query_url(identifier.as_str()))?;
        Self::parse_body(identifier, self.series, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "Meta Data": {"2. Symbol": "PETR4.SAO"},
        "Time Series (Daily)": {
            "2019-07-12": {"1. open": "28.54", "2. high": "28.74", "3. low": "28.41", "4. close": "28.63",
                           "5. adjusted close": "28.63", "6. volume": "37796100",
                           "7. dividend amount": "0.0000", "8. split coefficient": "1.0"},
            "2019-07-11": {"1. open": "28.20", "2. high": "28.51", "3. low": "28.16", "4. close": "28.40",
                           "5. adjusted close": "28.40", "6. volume": "48206900",
                           "7. dividend amount": "0.0000", "8. split coefficient": "1.0"}
        }
    }"#;

    #[test]
    fn parses_daily_adjusted() {
        let id = Identifier::from("PETR4.SAO");
        let fetched = AlphaVantageProvider::parse_body(&id, AlphaVantageSeries::DailyAdjusted, BODY)
            .unwrap();

        assert_eq!(
            fetched.series.columns(),
            &[
                "open",
                "high",
                "low",
                "close",
                "adjusted close",
                "volume",
                "dividend amount",
                "split coefficient"
            ]
        );
        assert_eq!(fetched.series.first_date(), NaiveDate::from_ymd_opt(2019, 7, 11));
        assert_eq!(fetched.metadata.price_column(), Some("adjusted close"));
        assert_eq!(
            fetched
                .series
                .value(NaiveDate::from_ymd_opt(2019, 7, 12).unwrap(), "adjusted close"),
            Some(28.63)
        );
    }

    #[test]
    fn unadjusted_series_prices_on_close() {
        let id = Identifier::from("PETR4.SAO");
        let fetched =
            AlphaVantageProvider::parse_body(&id, AlphaVantageSeries::Daily, BODY).unwrap();
        assert_eq!(fetched.metadata.price_column(), Some("close"));
    }

    #[test]
    fn error_message_is_an_invalid_identifier() {
        let body = r#"{"Error Message": "Invalid API call. Please retry or visit the documentation."}"#;
        let err = AlphaVantageProvider::parse_body(
            &Identifier::from("XXXX3.SAO"),
            AlphaVantageSeries::DailyAdjusted,
            body,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidIdentifier { .. }));
    }

    #[test]
    fn quota_note_is_rate_limited() {
        let body = r#"{"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."}"#;
        let err = AlphaVantageProvider::parse_body(
            &Identifier::from("PETR4.SAO"),
            AlphaVantageSeries::DailyAdjusted,
            body,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::RateLimited { .. }));
    }

    #[test]
    fn source_names_round_trip() {
        for kind in [AlphaVantageSeries::Daily, AlphaVantageSeries::DailyAdjusted] {
            assert_eq!(AlphaVantageSeries::from_source_name(kind.source_name()), Some(kind));
        }
        assert_eq!(AlphaVantageSeries::from_source_name("yahoo"), None);
    }
}
