use std::time::Duration;

use listado_core::{Condition, SearchRequest};
use rand::Rng as _;

use crate::source::{SourceClient, SourceError};
use crate::types::{PageBatch, PageCursor};

/// Capped exponential backoff for transient source failures.
///
/// Blocked and NotFound are deterministic verdicts and never retried;
/// repeating the request would only feed the rate limiter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
    /// Random fraction of the delay added or subtracted per attempt, so
    /// concurrent fetches do not retry in lockstep.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            factor: 2,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), jittered.
    fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.as_millis() as u64
            * u64::from(self.factor.pow(attempt.saturating_sub(1)));
        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        let jittered = (scaled as f64 * (1.0 + spread)).max(0.0);
        Duration::from_millis(jittered as u64)
    }
}

/// Wraps a [`SourceClient`] so every call gets the same retry treatment,
/// keeping backoff out of the enumerator and the enrichment pool.
pub struct RetryingClient<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: SourceClient> RetryingClient<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    log::debug!(
                        "{what} attempt {attempt} failed ({err}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: SourceClient> SourceClient for RetryingClient<S> {
    async fn fetch_page(
        &self,
        request: &SearchRequest,
        cursor: &PageCursor,
    ) -> Result<PageBatch, SourceError> {
        self.run("page fetch", || self.inner.fetch_page(request, cursor))
            .await
    }

    async fn fetch_detail(&self, permalink: &str) -> Result<Condition, SourceError> {
        self.run("detail fetch", || self.inner.fetch_detail(permalink))
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use listado_core::{Condition, Country, SearchRequest};
    use pretty_assertions::assert_eq;

    use super::{RetryPolicy, RetryingClient};
    use crate::source::{SourceClient, SourceError};
    use crate::types::{PageBatch, PageCursor};

    /// Fails with scripted errors until they run out, then succeeds.
    struct Flaky {
        errors: Vec<SourceError>,
        calls: AtomicU32,
    }

    impl Flaky {
        fn new(errors: Vec<SourceError>) -> Self {
            Self {
                errors,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl SourceClient for Flaky {
        async fn fetch_page(
            &self,
            _request: &SearchRequest,
            _cursor: &PageCursor,
        ) -> Result<PageBatch, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.errors.get(call) {
                Some(err) => Err(err.clone()),
                None => Ok(PageBatch {
                    listings: Vec::new(),
                    declared_total: None,
                    has_more: false,
                    next: None,
                }),
            }
        }

        async fn fetch_detail(&self, _permalink: &str) -> Result<Condition, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.errors.get(call) {
                Some(err) => Err(err.clone()),
                None => Ok(Condition::New),
            }
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn transient() -> SourceError {
        SourceError::Transient {
            status: Some(503),
            message: "unavailable".into(),
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_until_success() {
        let client = RetryingClient::new(Flaky::new(vec![transient(), transient()]), fast_policy());
        let request = SearchRequest::with_keywords(["ssd"], Country::Ar);
        let batch = client.fetch_page(&request, &PageCursor::start()).await;
        assert!(batch.is_ok());
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn attempts_are_capped() {
        let client = RetryingClient::new(
            Flaky::new(vec![transient(), transient(), transient(), transient()]),
            fast_policy(),
        );
        let result = client.fetch_detail("https://example.com/item").await;
        assert_eq!(result, Err(transient()));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn blocked_is_never_retried() {
        let client = RetryingClient::new(Flaky::new(vec![SourceError::Blocked]), fast_policy());
        let result = client.fetch_detail("https://example.com/item").await;
        assert_eq!(result, Err(SourceError::Blocked));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_never_retried() {
        let client = RetryingClient::new(Flaky::new(vec![SourceError::NotFound]), fast_policy());
        let request = SearchRequest::with_keywords(["ssd"], Country::Ar);
        let result = client.fetch_page(&request, &PageCursor::start()).await;
        assert_eq!(result, Err(SourceError::NotFound));
        assert_eq!(client.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_and_stay_near_the_curve() {
        let policy = RetryPolicy::default();
        for attempt in 1..=3 {
            let expected = 200u64 * 2u64.pow(attempt - 1);
            let delay = policy.delay_for(attempt).as_millis() as u64;
            let low = expected * 8 / 10;
            let high = expected * 12 / 10;
            assert!(
                (low..=high).contains(&delay),
                "attempt {attempt}: {delay}ms outside [{low}, {high}]"
            );
        }
    }
}
