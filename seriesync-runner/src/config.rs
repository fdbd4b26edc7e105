//! TOML configuration and the factory that turns it into collaborators.
//!
//! ```toml
//! storage_dir = "/var/lib/seriesync/items"
//! cache_dir = "/var/lib/seriesync/http"
//! cache_max_age_secs = 86400
//! jitter_fraction = 0.1
//! membership_url = "https://example.org/indexes/{code}.csv"
//!
//! [sources.av-daily-adjusted]
//! min_interval_secs = 15
//! api_key_env = "ALPHAVANTAGE_API_KEY"
//!
//! [baskets]
//! IBRX100 = "IBXX"
//! ```
//!
//! Every field has a default; an empty file is a valid configuration.

use seriesync_core::clock::Clock;
use seriesync_core::data::alphavantage::{AlphaVantageProvider, AlphaVantageSeries};
use seriesync_core::data::catalog::{default_basket_codes, DEFAULT_MARKET_SUFFIX};
use seriesync_core::data::pacer::default_min_interval;
use seriesync_core::data::spreadsheet::{DEFAULT_NAME_SPLIT, SPREADSHEET_SOURCE};
use seriesync_core::data::yahoo::YAHOO_SOURCE;
use seriesync_core::data::{
    DataError, DiskResponseCache, HttpFetcher, HttpMembershipSource, IdentifierCatalog,
    ItemStore, MembershipSource, ParquetStore, RemoteSource, ResponseCache, Source,
    SpreadsheetSource, TimeSeriesProvider, YahooProvider,
};
use seriesync_core::domain::BasketMember;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Environment variable read for Alpha Vantage keys when a source sets none.
pub const DEFAULT_API_KEY_ENV: &str = "ALPHAVANTAGE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Per-source overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Minimum seconds between calls; the source default when absent.
    pub min_interval_secs: Option<f64>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
}

/// Synchronizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Item store root.
    pub storage_dir: PathBuf,
    /// HTTP response cache root.
    pub cache_dir: PathBuf,
    /// Cached responses older than this are refetched. Unlimited when absent.
    pub cache_max_age_secs: Option<u64>,
    /// Pacer jitter as a fraction of the source interval, within `[0, 1]`.
    pub jitter_fraction: f64,
    /// Upper bound of the failure penalty as a multiple of the source interval.
    pub penalty_factor: f64,
    /// Suffix appended to basket members.
    pub market_suffix: String,
    /// Composition table URL with a `{code}` placeholder.
    pub membership_url: Option<String>,
    /// Pattern splitting vendor fund names into identifier and description.
    pub name_split: String,
    pub sources: BTreeMap<String, SourceConfig>,
    /// Basket name → published code. Extends the built-in table.
    pub baskets: BTreeMap<String, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".seriesync/items"),
            cache_dir: PathBuf::from(".seriesync/http"),
            cache_max_age_secs: None,
            jitter_fraction: 0.1,
            penalty_factor: 2.0,
            market_suffix: DEFAULT_MARKET_SUFFIX.to_string(),
            membership_url: None,
            name_split: DEFAULT_NAME_SPLIT.to_string(),
            sources: BTreeMap::new(),
            baskets: BTreeMap::new(),
        }
    }
}

impl SyncConfig {
    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::Invalid(format!(
                "jitter_fraction must be within [0, 1], got {}",
                self.jitter_fraction
            )));
        }
        if !self.penalty_factor.is_finite() || self.penalty_factor < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "penalty_factor must be non-negative, got {}",
                self.penalty_factor
            )));
        }
        for (name, source) in &self.sources {
            if let Some(secs) = source.min_interval_secs {
                if !secs.is_finite() || secs < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "sources.{name}.min_interval_secs must be non-negative, got {secs}"
                    )));
                }
            }
        }
        for (name, code) in &self.baskets {
            if code.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("basket '{name}' has an empty code")));
            }
        }
        if let Some(url) = &self.membership_url {
            if !url.contains("{code}") {
                return Err(ConfigError::Invalid(format!(
                    "membership_url '{url}' has no {{code}} placeholder"
                )));
            }
        }
        Ok(())
    }

    /// Pacing interval for `source_name`, honouring overrides.
    pub fn min_interval(&self, source_name: &str) -> Duration {
        if source_name == SPREADSHEET_SOURCE {
            return Duration::ZERO;
        }
        self.sources
            .get(source_name)
            .and_then(|s| s.min_interval_secs)
            .map(Duration::from_secs_f64)
            .unwrap_or_else(|| default_min_interval(source_name))
    }

    pub fn cache_max_age(&self) -> Option<Duration> {
        self.cache_max_age_secs.map(Duration::from_secs)
    }

    // ── Factory ──────────────────────────────────────────────────────

    pub fn item_store(&self) -> Arc<dyn ItemStore> {
        Arc::new(ParquetStore::new(&self.storage_dir))
    }

    pub fn response_cache(&self, clock: Arc<dyn Clock>) -> Arc<dyn ResponseCache> {
        let cache = DiskResponseCache::new(&self.cache_dir, clock);
        match self.cache_max_age() {
            Some(age) => Arc::new(cache.with_max_age(age)),
            None => Arc::new(cache),
        }
    }

    /// Basket catalog: the built-in names plus `[baskets]`.
    pub fn catalog(&self, cache: Arc<dyn ResponseCache>) -> Result<IdentifierCatalog, DataError> {
        let membership: Arc<dyn MembershipSource> = match &self.membership_url {
            Some(url) => Arc::new(HttpMembershipSource::new(
                HttpFetcher::new(Some(cache))?,
                url.as_str(),
            )?),
            None => Arc::new(UnconfiguredMembership),
        };

        let mut codes = default_basket_codes();
        codes.extend(self.baskets.clone());
        Ok(IdentifierCatalog::new(membership)
            .with_codes(codes)
            .with_suffix(self.market_suffix.as_str()))
    }

    /// Build the fetch source named `name`.
    ///
    /// Alpha Vantage sources need their API key in the environment; a
    /// missing key is an authentication error.
    pub fn source(&self, name: &str, cache: Arc<dyn ResponseCache>) -> Result<Source, DataError> {
        if name == SPREADSHEET_SOURCE {
            return Ok(Source::VendorSpreadsheet(SpreadsheetSource::with_name_split(
                &self.name_split,
            )?));
        }

        let http = HttpFetcher::new(Some(cache))?;
        let provider: Arc<dyn TimeSeriesProvider> = if name == YAHOO_SOURCE {
            Arc::new(YahooProvider::new(http))
        } else if let Some(series) = AlphaVantageSeries::from_source_name(name) {
            let key_env = self
                .sources
                .get(name)
                .and_then(|s| s.api_key_env.clone())
                .unwrap_or_else(|| DEFAULT_API_KEY_ENV.to_string());
            let key = std::env::var(&key_env).map_err(|_| {
                DataError::AuthenticationRequired(format!("{name} needs an API key in ${key_env}"))
            })?;
            Arc::new(AlphaVantageProvider::new(http, key, series))
        } else {
            return Err(DataError::UnknownSource(name.to_string()));
        };

        Ok(Source::RemoteTimeSeries(
            RemoteSource::new(provider).with_min_interval(self.min_interval(name)),
        ))
    }
}

/// Stand-in when no membership URL is configured: every basket lookup fails.
struct UnconfiguredMembership;

impl MembershipSource for UnconfiguredMembership {
    fn fetch_members(&self, code: &str) -> Result<Vec<BasketMember>, DataError> {
        Err(DataError::Config(format!(
            "basket '{code}' requested but membership_url is not set"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seriesync_core::clock::ManualClock;
    use seriesync_core::data::MemoryResponseCache;

    fn memory_cache() -> Arc<dyn ResponseCache> {
        let clock = Arc::new(ManualClock::at_date(
            chrono::NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
        ));
        Arc::new(MemoryResponseCache::new(clock))
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = SyncConfig::from_toml("").unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.min_interval("av-daily-adjusted"), Duration::from_secs(15));
        assert_eq!(config.min_interval("yahoo"), Duration::from_secs(1));
        assert_eq!(config.min_interval("infofundos"), Duration::ZERO);
    }

    #[test]
    fn parses_sources_and_baskets() {
        let config = SyncConfig::from_toml(
            r#"
            storage_dir = "/tmp/items"
            cache_max_age_secs = 3600
            jitter_fraction = 0.25
            membership_url = "https://example.test/{code}.csv"

            [sources.yahoo]
            min_interval_secs = 2.5

            [sources.av-daily]
            api_key_env = "MY_AV_KEY"

            [baskets]
            BOLSA = "IBOV"
            "#,
        )
        .unwrap();

        assert_eq!(config.storage_dir, PathBuf::from("/tmp/items"));
        assert_eq!(config.cache_max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(config.min_interval("yahoo"), Duration::from_millis(2500));
        assert_eq!(
            config.sources["av-daily"].api_key_env.as_deref(),
            Some("MY_AV_KEY")
        );

        let catalog = config.catalog(memory_cache()).unwrap();
        assert!(catalog.is_basket("bolsa"));
        assert!(catalog.is_basket("IBOVESPA"));
    }

    #[test]
    fn rejects_out_of_range_jitter() {
        let err = SyncConfig::from_toml("jitter_fraction = 1.5").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_empty_basket_code() {
        let err = SyncConfig::from_toml("[baskets]\nNOPE = \"\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = SyncConfig::from_toml("storage = \"/tmp\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn unknown_source_is_an_error() {
        let err = SyncConfig::default()
            .source("quandl", memory_cache())
            .unwrap_err();
        assert!(matches!(err, DataError::UnknownSource(name) if name == "quandl"));
    }

    #[test]
    fn builds_local_and_remote_sources() {
        let config = SyncConfig::default();
        let sheet = config.source("infofundos", memory_cache()).unwrap();
        assert!(!sheet.is_remote());

        let yahoo = config.source("yahoo", memory_cache()).unwrap();
        assert_eq!(yahoo.name(), "yahoo");
        assert_eq!(yahoo.min_interval(), Duration::from_secs(1));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seriesync.toml");
        std::fs::write(&path, "penalty_factor = 0.5\nmarket_suffix = \".SA\"\n").unwrap();

        let config = SyncConfig::load(&path).unwrap();
        assert_eq!(config.penalty_factor, 0.5);
        assert_eq!(config.market_suffix, ".SA");

        let err = SyncConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn basket_lookup_without_membership_url_fails() {
        let catalog = SyncConfig::default().catalog(memory_cache()).unwrap();
        assert!(matches!(catalog.resolve("IBOV"), Err(DataError::Config(_))));
    }
}
