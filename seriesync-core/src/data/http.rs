//! Blocking HTTP GET with the response cache in front of it.

use super::http_cache::ResponseCache;
use super::provider::DataError;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

/// Shared GET helper for remote providers and the membership source.
///
/// Never retries and never sleeps. Status codes map onto the error taxonomy:
/// 404 → invalid identifier, 429 → rate limited, 401/403 → authentication,
/// other non-2xx and transport errors → transient.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl HttpFetcher {
    pub fn new(cache: Option<Arc<dyn ResponseCache>>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| DataError::Client(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, cache })
    }

    /// GET `url` on behalf of `identifier`, serving from the cache when possible.
    pub fn get_text(&self, identifier: &str, url: &str) -> Result<String, DataError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(url)? {
                tracing::debug!(identifier, "serving cached response");
                return Ok(hit.body);
            }
        }

        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| DataError::transient(identifier, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(identifier, status));
        }

        let body = resp
            .text()
            .map_err(|e| DataError::transient(identifier, format!("read body: {e}")))?;

        if let Some(cache) = &self.cache {
            cache.put(url, &body)?;
        }
        Ok(body)
    }
}

fn status_error(identifier: &str, status: StatusCode) -> DataError {
    match status {
        StatusCode::NOT_FOUND => DataError::invalid(identifier, "not found (HTTP 404)"),
        StatusCode::TOO_MANY_REQUESTS => DataError::RateLimited {
            identifier: identifier.to_string(),
            reason: "HTTP 429".into(),
        },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DataError::AuthenticationRequired(format!("HTTP {status} while fetching {identifier}"))
        }
        _ => DataError::transient(identifier, format!("HTTP {status}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::retry::{FailureClass, RetryClassifier};

    #[test]
    fn status_codes_map_onto_failure_classes() {
        let class = |s| RetryClassifier::classify(&status_error("X", s));
        assert_eq!(class(StatusCode::NOT_FOUND), FailureClass::InvalidIdentifier);
        assert_eq!(class(StatusCode::TOO_MANY_REQUESTS), FailureClass::TransientRemote);
        assert_eq!(class(StatusCode::BAD_GATEWAY), FailureClass::TransientRemote);
        assert_eq!(class(StatusCode::UNAUTHORIZED), FailureClass::Fatal);
    }
}
