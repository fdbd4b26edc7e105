//! Failure classification for per-identifier fetches.
//!
//! A failed fetch never aborts a batch unless the error is systemic. The
//! classifier maps each `DataError` to a policy: skip quietly, skip after a
//! randomized penalty wait, skip after a penalty wait and cache eviction, or
//! propagate to the caller of the batch.

use super::pacer::Pacer;
use super::provider::DataError;
use std::time::Duration;

/// Coarse failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Malformed or unknown symbol.
    InvalidIdentifier,
    /// Upstream or network hiccup; a cached failure may be replaying.
    TransientRemote,
    /// The record came back but violates an invariant.
    MalformedRecord,
    /// Anything systemic: configuration, storage, authentication.
    Fatal,
}

/// What the synchronizer does with a failed identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    /// Skip the identifier, optionally after waiting and evicting cached responses.
    Skip {
        class: FailureClass,
        penalty: Duration,
        evict_cache: bool,
    },
    /// Stop the batch and return the error.
    Propagate,
}

impl RetryDecision {
    pub fn is_skip(&self) -> bool {
        matches!(self, RetryDecision::Skip { .. })
    }
}

/// Turns fetch failures into backoff decisions.
#[derive(Debug, Clone, Copy)]
pub struct RetryClassifier {
    /// Penalty upper bound as a multiple of the source's pacing interval.
    pub penalty_factor: f64,
}

impl Default for RetryClassifier {
    fn default() -> Self {
        Self {
            penalty_factor: 2.0,
        }
    }
}

impl RetryClassifier {
    pub fn classify(error: &DataError) -> FailureClass {
        match error {
            DataError::InvalidIdentifier { .. } => FailureClass::InvalidIdentifier,
            DataError::TransientRemote { .. }
            | DataError::RateLimited { .. }
            | DataError::ResponseFormatChanged(_) => FailureClass::TransientRemote,
            DataError::MalformedRecord(_) => FailureClass::MalformedRecord,
            DataError::AuthenticationRequired(_)
            | DataError::NotFound { .. }
            | DataError::AlreadyExists { .. }
            | DataError::UnknownBasket(_)
            | DataError::UnknownSource(_)
            | DataError::Storage(_)
            | DataError::Parquet(_)
            | DataError::Frame(_)
            | DataError::Cache(_)
            | DataError::Client(_)
            | DataError::Config(_)
            | DataError::Cancelled => FailureClass::Fatal,
        }
    }

    /// Decide what to do about `error` for a source paced at `min_interval`.
    ///
    /// Penalties are drawn uniformly from `[0, penalty_factor * min_interval]`
    /// using the pacer's random source.
    pub fn decide(&self, error: &DataError, min_interval: Duration, pacer: &Pacer) -> RetryDecision {
        let class = Self::classify(error);
        match class {
            FailureClass::InvalidIdentifier => RetryDecision::Skip {
                class,
                penalty: pacer.random_up_to(min_interval, self.penalty_factor),
                evict_cache: false,
            },
            FailureClass::TransientRemote => RetryDecision::Skip {
                class,
                penalty: pacer.random_up_to(min_interval, self.penalty_factor),
                evict_cache: true,
            },
            FailureClass::MalformedRecord => RetryDecision::Skip {
                class,
                penalty: Duration::ZERO,
                evict_cache: false,
            },
            FailureClass::Fatal => RetryDecision::Propagate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn pacer() -> Pacer {
        let clock = Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()));
        Pacer::with_seed(clock, 3)
    }

    #[test]
    fn invalid_identifier_skips_without_eviction() {
        let pacer = pacer();
        let decision = RetryClassifier::default().decide(
            &DataError::invalid("XXXX3.SAO", "unknown symbol"),
            Duration::from_secs(15),
            &pacer,
        );
        match decision {
            RetryDecision::Skip {
                class,
                penalty,
                evict_cache,
            } => {
                assert_eq!(class, FailureClass::InvalidIdentifier);
                assert!(penalty <= Duration::from_secs(30));
                assert!(!evict_cache);
            }
            RetryDecision::Propagate => panic!("invalid identifier must not propagate"),
        }
    }

    #[test]
    fn transient_failures_evict_the_cache() {
        let pacer = pacer();
        for err in [
            DataError::transient("PETR4.SAO", "HTTP 503"),
            DataError::RateLimited {
                identifier: "PETR4.SAO".into(),
                reason: "call frequency".into(),
            },
            DataError::ResponseFormatChanged("missing field".into()),
        ] {
            let decision =
                RetryClassifier::default().decide(&err, Duration::from_secs(1), &pacer);
            assert!(matches!(
                decision,
                RetryDecision::Skip {
                    class: FailureClass::TransientRemote,
                    evict_cache: true,
                    ..
                }
            ));
        }
    }

    #[test]
    fn malformed_records_skip_immediately() {
        let decision = RetryClassifier::default().decide(
            &DataError::MalformedRecord("no price column".into()),
            Duration::from_secs(15),
            &pacer(),
        );
        assert_eq!(
            decision,
            RetryDecision::Skip {
                class: FailureClass::MalformedRecord,
                penalty: Duration::ZERO,
                evict_cache: false,
            }
        );
    }

    #[test]
    fn systemic_errors_propagate() {
        let pacer = pacer();
        for err in [
            DataError::Storage("disk full".into()),
            DataError::UnknownBasket("NOPE".into()),
            DataError::AuthenticationRequired("missing key".into()),
            DataError::Frame("duplicate column".into()),
        ] {
            assert_eq!(
                RetryClassifier::default().decide(&err, Duration::from_secs(1), &pacer),
                RetryDecision::Propagate
            );
        }
    }
}
