//! Sensor adapters and the shared retry wrapper.
//!
//! Each adapter fetches one snapshot from an external source and maps the
//! vendor's names onto canonical fields. Adapters report failures as
//! [`AdapterError`]; [`fetch_with_retry`] decides whether to try again and
//! always hands the scheduler a (possibly empty) set of readings.

pub mod device;
pub mod power_meter;
pub mod rf;

use crate::telemetry::Readings;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use thiserror::Error;

#[async_trait]
pub trait SensorAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self) -> Result<Readings, AdapterError>;
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cache unavailable: {0}")]
    Cache(String),
    #[error("malformed payload: {0}")]
    Payload(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Timeout(_) | AdapterError::Cache(_) => true,
            AdapterError::Http(err) => {
                err.is_timeout()
                    || err.is_connect()
                    || err.is_request()
                    || err.status().is_some_and(|status| status.is_server_error())
            }
            AdapterError::Payload(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Bound on a single fetch attempt.
    pub timeout: Duration,
    /// Pause before the one retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            backoff: Duration::from_secs(10),
        }
    }
}

const MAX_ATTEMPTS: u32 = 2;

/// Fetches from `adapter`, retrying once after `policy.backoff` on a
/// transient failure. Never fails: an exhausted or non-transient error
/// yields empty readings.
pub async fn fetch_with_retry(adapter: &dyn SensorAdapter, policy: &RetryPolicy) -> Readings {
    let source = adapter.name();
    for attempt in 1..=MAX_ATTEMPTS {
        let started = Instant::now();
        let result = match tokio::time::timeout(policy.timeout, adapter.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout(policy.timeout)),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(readings) => {
                tracing::debug!(source, attempt, elapsed_ms, fields = readings.len(), "fetched");
                return readings;
            }
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    source,
                    attempt,
                    elapsed_ms,
                    backoff_ms = policy.backoff.as_millis() as u64,
                    error = %err,
                    "fetch failed; retrying"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(source, attempt, error = %err, "fetch failed; continuing without source");
                return Readings::new();
            }
            Err(err) => {
                tracing::error!(source, error = %err, "unusable response; continuing without source");
                return Readings::new();
            }
        }
    }
    Readings::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::HP_W;
    use crate::telemetry::FieldValue;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls with the error built by `fail`.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        fail: fn() -> AdapterError,
    }

    impl Flaky {
        fn new(failures: u32, fail: fn() -> AdapterError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                fail,
            }
        }
    }

    #[async_trait]
    impl SensorAdapter for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch(&self) -> Result<Readings, AdapterError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.fail)());
            }
            Ok(Readings::from([(HP_W, FieldValue::Number(1800.0))]))
        }
    }

    struct Stalled;

    #[async_trait]
    impl SensorAdapter for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch(&self) -> Result<Readings, AdapterError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Readings::new())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            backoff: Duration::from_millis(10),
        }
    }

    fn cache_down() -> AdapterError {
        AdapterError::Cache("connection refused".to_string())
    }

    fn garbage() -> AdapterError {
        AdapterError::Payload("not xml".to_string())
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let adapter = Flaky::new(1, cache_down);
        let readings = fetch_with_retry(&adapter, &fast_policy()).await;
        assert_eq!(readings.get(&HP_W), Some(&FieldValue::Number(1800.0)));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_transient_failure_gives_up_with_empty_readings() {
        let adapter = Flaky::new(2, cache_down);
        let readings = fetch_with_retry(&adapter, &fast_policy()).await;
        assert!(readings.is_empty());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_payload_is_not_retried() {
        let adapter = Flaky::new(1, garbage);
        let readings = fetch_with_retry(&adapter, &fast_policy()).await;
        assert!(readings.is_empty());
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stalled_source_times_out() {
        let started = Instant::now();
        let readings = fetch_with_retry(&Stalled, &fast_policy()).await;
        assert!(readings.is_empty());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn timeout_and_cache_errors_are_transient() {
        assert!(AdapterError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(cache_down().is_transient());
        assert!(!garbage().is_transient());
    }
}
