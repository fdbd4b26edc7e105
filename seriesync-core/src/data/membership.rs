//! Published basket composition tables.
//!
//! The exchange publishes each index's theoretical portfolio as a
//! `;`-separated table with a title line, a header row, one row per member
//! and a couple of footer rows:
//!
//! ```text
//! IBOV - Carteira do Dia 02/05/24
//! Código;Ação;Tipo;Qtde. Teórica;Part. (%);
//! VALE3;VALE;ON NM;4.196.924.316;11,912;
//! PETR4;PETROBRAS;PN N2;4.566.445.852;8,126;
//! Quantidade Teórica Total;;;;100,000;
//! Redutor;;;;;
//! ```

use super::http::HttpFetcher;
use super::numbers::parse_decimal;
use super::provider::DataError;
use crate::domain::BasketMember;

/// Placeholder for the basket code in membership URL templates.
pub const CODE_PLACEHOLDER: &str = "{code}";

/// Where basket members come from.
pub trait MembershipSource: Send + Sync {
    /// Members of the basket published under `code`, in published order.
    fn fetch_members(&self, code: &str) -> Result<Vec<BasketMember>, DataError>;
}

/// Downloads composition tables over HTTP.
pub struct HttpMembershipSource {
    http: HttpFetcher,
    url_template: String,
}

impl HttpMembershipSource {
    /// `url_template` must contain `{code}`.
    pub fn new(http: HttpFetcher, url_template: impl Into<String>) -> Result<Self, DataError> {
        let url_template = url_template.into();
        if !url_template.contains(CODE_PLACEHOLDER) {
            return Err(DataError::Config(format!(
                "membership url '{url_template}' has no {CODE_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { http, url_template })
    }

    fn url(&self, code: &str) -> String {
        self.url_template.replace(CODE_PLACEHOLDER, code)
    }
}

impl MembershipSource for HttpMembershipSource {
    fn fetch_members(&self, code: &str) -> Result<Vec<BasketMember>, DataError> {
        let body = self.http.get_text(code, &self.url(code))?;
        let members = parse_membership_table(&body)?;
        tracing::info!(code, members = members.len(), "fetched basket composition");
        Ok(members)
    }
}

/// Parse a composition table into (ticker, weight) members.
///
/// Footer rows (totals, reducer) are recognised by a code cell containing
/// whitespace and skipped.
pub fn parse_membership_table(text: &str) -> Result<Vec<BasketMember>, DataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut columns: Option<(usize, usize)> = None;
    let mut members = Vec::new();

    for record in reader.records() {
        let record = record
            .map_err(|e| DataError::ResponseFormatChanged(format!("composition row: {e}")))?;

        let Some((code_idx, weight_idx)) = columns else {
            let code_idx = record.iter().position(|c| c == "Código");
            let weight_idx = record.iter().position(|c| c.starts_with("Part."));
            if let (Some(c), Some(w)) = (code_idx, weight_idx) {
                columns = Some((c, w));
            }
            continue;
        };

        let code = record.get(code_idx).unwrap_or("");
        if code.is_empty() || code.contains(char::is_whitespace) {
            continue;
        }
        let Some(weight) = record.get(weight_idx).and_then(parse_decimal) else {
            continue;
        };
        members.push(BasketMember::new(code, weight));
    }

    if columns.is_none() {
        return Err(DataError::ResponseFormatChanged(
            "composition table has no 'Código' / 'Part. (%)' header".into(),
        ));
    }
    Ok(members)
}
