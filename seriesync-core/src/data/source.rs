//! Fetch sources: the closed set of ways to obtain rows for a target.

use super::pacer::default_min_interval;
use super::provider::{DataError, Fetched, TimeSeriesProvider};
use super::spreadsheet::{SpreadsheetSource, SPREADSHEET_SOURCE};
use crate::domain::Identifier;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What one fetch produced.
///
/// A remote fetch yields exactly one item. A spreadsheet yields one item per
/// fund it contains, and funds that failed validation land in `rejected`.
#[derive(Debug, Default)]
pub struct Extracted {
    pub items: Vec<Fetched>,
    pub rejected: Vec<(String, DataError)>,
}

/// A paced remote provider.
#[derive(Clone)]
pub struct RemoteSource {
    provider: Arc<dyn TimeSeriesProvider>,
    min_interval: Duration,
}

impl RemoteSource {
    /// Wrap `provider` with the default interval for its source name.
    pub fn new(provider: Arc<dyn TimeSeriesProvider>) -> Self {
        let min_interval = default_min_interval(provider.name());
        Self {
            provider,
            min_interval,
        }
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn provider(&self) -> &Arc<dyn TimeSeriesProvider> {
        &self.provider
    }
}

pub enum Source {
    /// Local vendor export; targets are file paths.
    VendorSpreadsheet(SpreadsheetSource),
    /// Remote daily series; targets are identifiers.
    RemoteTimeSeries(RemoteSource),
}

impl Source {
    pub fn name(&self) -> &str {
        match self {
            Source::VendorSpreadsheet(_) => SPREADSHEET_SOURCE,
            Source::RemoteTimeSeries(remote) => remote.provider.name(),
        }
    }

    /// Minimum spacing between calls. Local reads are not paced.
    pub fn min_interval(&self) -> Duration {
        match self {
            Source::VendorSpreadsheet(_) => Duration::ZERO,
            Source::RemoteTimeSeries(remote) => remote.min_interval,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::RemoteTimeSeries(_))
    }

    /// Fetch everything `target` names: one identifier, or one spreadsheet path.
    pub fn fetch(&self, target: &str) -> Result<Extracted, DataError> {
        match self {
            Source::VendorSpreadsheet(sheet) => sheet.read_path(Path::new(target)),
            Source::RemoteTimeSeries(remote) => {
                let fetched = remote.provider.fetch(&Identifier::from(target))?;
                Ok(Extracted {
                    items: vec![fetched],
                    rejected: Vec::new(),
                })
            }
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name())
            .field("min_interval", &self.min_interval())
            .finish()
    }
}
