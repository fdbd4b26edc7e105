//! Locale-tolerant number and date parsing for vendor exports.

use chrono::NaiveDate;

/// Parse a decimal that may use a comma as the decimal separator.
///
/// `"1.234,56"` and `"1234.56"` both give `1234.56`. A trailing `%` is
/// dropped without scaling. Blank cells give `None`.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim().trim_end_matches('%').trim();
    if s.is_empty() || s == "-" {
        return None;
    }
    if s.contains(',') {
        s.replace('.', "").replace(',', ".").parse().ok()
    } else {
        s.parse().ok()
    }
}

/// Parse `dd/mm/yyyy` or ISO `yyyy-mm-dd`, ignoring a trailing time part.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    let s = s.split_whitespace().next().unwrap_or(s);
    NaiveDate::parse_from_str(s, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .ok()
}
