//! Batch synchronizer: pace, fetch, classify failures, merge, persist.
//!
//! Remote batches expand baskets first and walk the flattened identifiers in
//! order. Each identifier goes through:
//!
//! 1. freshness check against the stored item (no remote call if fresh)
//! 2. `Pacer::acquire`
//! 3. `Source::fetch`
//! 4. `reconcile` with the stored item, then a whole-item `put`
//!
//! Any failure along the way is handed to the `RetryClassifier`. Per-identifier
//! failures are logged, penalised and skipped; systemic ones end the batch.
//!
//! Spreadsheet batches take file paths instead of identifiers and are neither
//! paced nor freshness-checked.

use crate::config::SyncConfig;
use seriesync_core::clock::Clock;
use seriesync_core::data::merge::is_up_to_date;
use seriesync_core::data::{
    flatten_requests, reconcile, DataError, Fetched, FailureClass, IdentifierCatalog, ItemStore,
    MergeOutcome, Pacer, ResponseCache, RetryClassifier, RetryDecision, Source,
};
use seriesync_core::domain::{Identifier, StoredItem};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What happened to one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created { rows: usize },
    Merged { added: usize, replaced: usize, kept: usize },
    /// Latest stored date is today; nothing fetched.
    UpToDate,
    Skipped(FailureClass),
}

impl From<MergeOutcome> for SyncOutcome {
    fn from(outcome: MergeOutcome) -> Self {
        match outcome {
            MergeOutcome::Created { rows } => SyncOutcome::Created { rows },
            MergeOutcome::Merged {
                added,
                replaced,
                kept,
            } => SyncOutcome::Merged {
                added,
                replaced,
                kept,
            },
        }
    }
}

/// Progress callback for synchronization batches.
pub trait SyncProgress: Send {
    /// Called before a target (identifier or spreadsheet path) is processed.
    fn on_start(&self, target: &str, index: usize, total: usize);

    /// Called once per identifier the target produced.
    fn on_complete(&self, identifier: &str, index: usize, total: usize, outcome: &SyncOutcome);

    /// Called when the whole batch is done.
    fn on_batch_complete(&self, summary: &SyncSummary);
}

/// Progress reporter that logs through `tracing`.
pub struct LogProgress;

impl SyncProgress for LogProgress {
    fn on_start(&self, target: &str, index: usize, total: usize) {
        tracing::info!(target_name = target, "[{}/{}] syncing", index + 1, total);
    }

    fn on_complete(&self, identifier: &str, _index: usize, _total: usize, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Skipped(class) => {
                tracing::info!(identifier, class = ?class, "skipped")
            }
            other => tracing::info!(identifier, outcome = ?other, "synced"),
        }
    }

    fn on_batch_complete(&self, summary: &SyncSummary) {
        tracing::info!(
            created = summary.created,
            merged = summary.merged,
            up_to_date = summary.up_to_date,
            skipped = summary.skipped.len(),
            cancelled = summary.cancelled.len(),
            "sync complete"
        );
    }
}

/// Summary of a synchronization batch.
#[derive(Debug, Default)]
pub struct SyncSummary {
    /// Targets after basket expansion.
    pub total: usize,
    pub created: usize,
    pub merged: usize,
    pub up_to_date: usize,
    /// Identifiers (or paths) skipped, with the reason.
    pub skipped: Vec<(String, DataError)>,
    /// Targets never attempted because the batch was cancelled.
    pub cancelled: Vec<String>,
}

impl SyncSummary {
    pub fn all_succeeded(&self) -> bool {
        self.skipped.is_empty() && self.cancelled.is_empty()
    }

    fn record(&mut self, outcome: &SyncOutcome) {
        match outcome {
            SyncOutcome::Created { .. } => self.created += 1,
            SyncOutcome::Merged { .. } => self.merged += 1,
            SyncOutcome::UpToDate => self.up_to_date += 1,
            SyncOutcome::Skipped(_) => {}
        }
    }
}

/// Owns the pacing state and every collaborator a batch needs.
pub struct Synchronizer {
    store: Arc<dyn ItemStore>,
    cache: Arc<dyn ResponseCache>,
    catalog: Arc<IdentifierCatalog>,
    clock: Arc<dyn Clock>,
    pacer: Pacer,
    classifier: RetryClassifier,
    jitter_fraction: f64,
    cancel: Option<Arc<AtomicBool>>,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn ItemStore>,
        cache: Arc<dyn ResponseCache>,
        catalog: Arc<IdentifierCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pacer: Pacer::new(clock.clone()),
            store,
            cache,
            catalog,
            clock,
            classifier: RetryClassifier::default(),
            jitter_fraction: 0.1,
            cancel: None,
        }
    }

    /// Replace the pacer (e.g. one with a seeded random source).
    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_jitter_fraction(mut self, jitter_fraction: f64) -> Self {
        self.jitter_fraction = jitter_fraction;
        self
    }

    pub fn with_classifier(mut self, classifier: RetryClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Checked before every pacer wait; once set, remaining targets are cancelled.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Wire a synchronizer from configuration: Parquet store, disk cache,
    /// configured catalog, jitter and penalty settings.
    pub fn from_config(config: &SyncConfig, clock: Arc<dyn Clock>) -> Result<Self, DataError> {
        let cache = config.response_cache(clock.clone());
        let catalog = Arc::new(config.catalog(cache.clone())?);
        Ok(Self::new(config.item_store(), cache, catalog, clock)
            .with_jitter_fraction(config.jitter_fraction)
            .with_classifier(RetryClassifier {
                penalty_factor: config.penalty_factor,
            }))
    }

    pub fn pacer(&self) -> &Pacer {
        &self.pacer
    }

    /// Response cache shared with the sources this synchronizer drives.
    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn ItemStore> {
        &self.store
    }

    pub fn catalog(&self) -> &Arc<IdentifierCatalog> {
        &self.catalog
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Synchronize `targets` from `source`.
    ///
    /// For remote sources targets are identifiers or basket names; for the
    /// spreadsheet source they are file paths. Returns an error only for
    /// failures the classifier propagates.
    #[tracing::instrument(skip_all, fields(source = source.name(), targets = targets.len()))]
    pub fn synchronize<S: AsRef<str>>(
        &self,
        targets: &[S],
        source: &Source,
        progress: &dyn SyncProgress,
    ) -> Result<SyncSummary, DataError> {
        let targets: Vec<String> = if source.is_remote() {
            flatten_requests(targets, &self.catalog)?
                .into_iter()
                .map(Identifier::into_string)
                .collect()
        } else {
            targets.iter().map(|t| t.as_ref().to_string()).collect()
        };

        let total = targets.len();
        let mut summary = SyncSummary {
            total,
            ..SyncSummary::default()
        };

        for (i, target) in targets.iter().enumerate() {
            if self.is_cancelled() {
                tracing::warn!(remaining = total - i, "synchronization cancelled");
                summary.cancelled = targets[i..].to_vec();
                break;
            }

            progress.on_start(target, i, total);
            if source.is_remote() {
                let identifier = Identifier::from(target.as_str());
                let result = self.sync_remote(&identifier, source);
                let outcome = self.settle(target, result, source.min_interval(), &mut summary)?;
                progress.on_complete(target, i, total, &outcome);
            } else {
                self.sync_sheet(target, source, i, total, progress, &mut summary)?;
            }
        }

        progress.on_batch_complete(&summary);
        Ok(summary)
    }

    fn sync_remote(&self, identifier: &Identifier, source: &Source) -> Result<SyncOutcome, DataError> {
        let existing = self.store.get(identifier)?;
        if let Some(item) = &existing {
            if is_up_to_date(item, self.clock.today()) {
                tracing::debug!(identifier = %identifier, "already up to date");
                return Ok(SyncOutcome::UpToDate);
            }
        }

        self.pacer.acquire(source.min_interval(), self.jitter_fraction);

        let fetched = source
            .fetch(identifier.as_str())?
            .items
            .into_iter()
            .next()
            .ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("{identifier}: source returned no series"))
            })?;
        self.persist(existing, fetched)
    }

    fn sync_sheet(
        &self,
        path: &str,
        source: &Source,
        index: usize,
        total: usize,
        progress: &dyn SyncProgress,
        summary: &mut SyncSummary,
    ) -> Result<(), DataError> {
        let extracted = match source.fetch(path) {
            Ok(extracted) => extracted,
            Err(e) => {
                let outcome = self.settle(path, Err(e), source.min_interval(), summary)?;
                progress.on_complete(path, index, total, &outcome);
                return Ok(());
            }
        };

        for (fund, err) in extracted.rejected {
            let outcome = self.settle(&fund, Err(err), source.min_interval(), summary)?;
            progress.on_complete(&fund, index, total, &outcome);
        }

        for fetched in extracted.items {
            let identifier = fetched.identifier.to_string();
            let result = self
                .store
                .get(&fetched.identifier)
                .and_then(|existing| self.persist(existing, fetched));
            let outcome = self.settle(&identifier, result, source.min_interval(), summary)?;
            progress.on_complete(&identifier, index, total, &outcome);
        }
        Ok(())
    }

    fn persist(
        &self,
        existing: Option<StoredItem>,
        fetched: Fetched,
    ) -> Result<SyncOutcome, DataError> {
        let reconciled = reconcile(existing, fetched)?;
        self.store.put(reconciled.item, true)?;
        Ok(reconciled.outcome.into())
    }

    /// Record a result, or apply the failure policy to it.
    fn settle(
        &self,
        label: &str,
        result: Result<SyncOutcome, DataError>,
        min_interval: Duration,
        summary: &mut SyncSummary,
    ) -> Result<SyncOutcome, DataError> {
        let err = match result {
            Ok(outcome) => {
                summary.record(&outcome);
                return Ok(outcome);
            }
            Err(e) => e,
        };

        match self.classifier.decide(&err, min_interval, &self.pacer) {
            RetryDecision::Propagate => {
                tracing::error!(identifier = label, error = %err, "aborting batch");
                Err(err)
            }
            RetryDecision::Skip {
                class,
                penalty,
                evict_cache,
            } => {
                tracing::warn!(identifier = label, class = ?class, error = %err, "skipping");
                if !penalty.is_zero() {
                    tracing::debug!(identifier = label, ?penalty, "penalty wait");
                    self.clock.sleep(penalty);
                }
                if evict_cache {
                    let removed = self.cache.evict_older_than(self.clock.wall())?;
                    tracing::debug!(identifier = label, removed, "evicted cached responses");
                }
                summary.skipped.push((label.to_string(), err));
                Ok(SyncOutcome::Skipped(class))
            }
        }
    }
}
