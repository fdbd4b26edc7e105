//! Basket names → published member lists.
//!
//! Basket names are case-insensitive and map to the short code the exchange
//! publishes the composition under (`IBrX100` → `IBXX`). Resolved baskets are
//! cached for the life of the catalog.

use super::membership::MembershipSource;
use super::provider::DataError;
use crate::domain::{Basket, BasketMember, Identifier};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Suffix the remote providers expect on São Paulo listings.
pub const DEFAULT_MARKET_SUFFIX: &str = ".SAO";

/// Built-in basket names and their published codes.
pub fn default_basket_codes() -> BTreeMap<String, String> {
    [
        ("IBOV", "IBOV"),
        ("IBOVESPA", "IBOV"),
        ("IBRX100", "IBXX"),
        ("IBRX", "IBXX"),
        ("IBRX50", "IBXL"),
        ("SMLL", "SMLL"),
        ("SMALL", "SMLL"),
        ("IDIV", "IDIV"),
        ("IFIX", "IFIX"),
    ]
    .into_iter()
    .map(|(name, code)| (name.to_string(), code.to_string()))
    .collect()
}

pub struct IdentifierCatalog {
    codes: BTreeMap<String, String>,
    suffix: String,
    source: Arc<dyn MembershipSource>,
    resolved: Mutex<HashMap<String, Basket>>,
}

impl IdentifierCatalog {
    pub fn new(source: Arc<dyn MembershipSource>) -> Self {
        Self {
            codes: default_basket_codes(),
            suffix: DEFAULT_MARKET_SUFFIX.to_string(),
            source,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the name → code table. Names are matched case-insensitively.
    pub fn with_codes(mut self, codes: BTreeMap<String, String>) -> Self {
        self.codes = codes
            .into_iter()
            .map(|(name, code)| (key(&name), code))
            .collect();
        self
    }

    /// Add or override one basket name.
    pub fn with_basket(mut self, name: &str, code: impl Into<String>) -> Self {
        self.codes.insert(key(name), code.into());
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn is_basket(&self, name: &str) -> bool {
        self.codes.contains_key(&key(name))
    }

    pub fn code(&self, name: &str) -> Option<&str> {
        self.codes.get(&key(name)).map(String::as_str)
    }

    /// Normalize a published ticker: `" petr4 "` → `PETR4.SAO`.
    pub fn normalize(&self, ticker: &str) -> Identifier {
        let ticker = ticker.trim().to_uppercase();
        if self.suffix.is_empty() || ticker.ends_with(&self.suffix) {
            Identifier::new(ticker)
        } else {
            Identifier::new(format!("{ticker}{}", self.suffix))
        }
    }

    /// The basket `name` resolves to, members sorted by descending weight.
    ///
    /// Equal weights keep published order. The member list is fetched at
    /// most once per code; the cache lock is not held during the fetch.
    pub fn basket(&self, name: &str) -> Result<Basket, DataError> {
        let code = self
            .code(name)
            .ok_or_else(|| DataError::UnknownBasket(name.to_string()))?
            .to_string();

        if let Some(hit) = self.cached(&code) {
            return Ok(Basket {
                name: name.to_string(),
                members: hit.members,
            });
        }

        let published = self.source.fetch_members(&code)?;
        let members = self.order_members(published);
        tracing::debug!(basket = name, code = %code, members = members.len(), "resolved basket");

        let basket = Basket {
            name: name.to_string(),
            members,
        };
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(code, basket.clone());
        Ok(basket)
    }

    /// Member identifiers of `name`, heaviest first.
    pub fn resolve(&self, name: &str) -> Result<Vec<Identifier>, DataError> {
        Ok(self.basket(name)?.identifiers())
    }

    fn cached(&self, code: &str) -> Option<Basket> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
    }

    fn order_members(&self, published: Vec<BasketMember>) -> Vec<BasketMember> {
        let mut seen = HashSet::new();
        let mut members: Vec<BasketMember> = published
            .into_iter()
            .map(|m| BasketMember::new(self.normalize(m.identifier.as_str()), m.weight))
            .filter(|m| seen.insert(m.identifier.clone()))
            .collect();
        members.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        members
    }
}

fn key(name: &str) -> String {
    name.trim().to_uppercase()
}
