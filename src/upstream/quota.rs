use serde::Serialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use url::Url;

/// Backoff applied to repeated failures on one endpoint when the upstream
/// provides no explicit delay: 2s doubling per consecutive failure, capped.
const BACKOFF_BASE: Duration = Duration::from_secs(2);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Classification of the last observed failure on an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealth {
    Ok,
    RateLimited,
    AuthFailed,
    Unavailable,
}

#[derive(Debug)]
struct EndpointState {
    url: Url,
    rate_limited_until: Option<Instant>,
    last_error: EndpointHealth,
    consecutive_failures: u32,
}

impl EndpointState {
    fn available_at(&self, now: Instant) -> bool {
        match self.rate_limited_until {
            Some(until) => until <= now,
            None => true,
        }
    }
}

/// An endpoint selected for one upstream attempt.
#[derive(Debug, Clone)]
pub struct PickedEndpoint {
    pub index: usize,
    pub url: Url,
}

/// Token-free view for `/health` and `/antigravity-status`.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatusView {
    pub url: String,
    pub state: EndpointHealth,
    pub rate_limited_for_secs: Option<u64>,
}

/// Ordered upstream endpoint list with per-endpoint rate-limit state.
///
/// Selection scans in fixed order and returns the first endpoint whose
/// cooldown has lapsed; when none is available the soonest remaining wait
/// is reported so callers can surface `Retry-After`. All operations are
/// O(n) over a three-entry list behind a plain mutex; nothing holds the
/// lock across an await point.
pub struct EndpointPool {
    inner: Mutex<Vec<EndpointState>>,
}

impl EndpointPool {
    pub fn new(endpoints: Vec<Url>) -> Self {
        assert!(!endpoints.is_empty(), "endpoint pool cannot be empty");
        Self {
            inner: Mutex::new(
                endpoints
                    .into_iter()
                    .map(|url| EndpointState {
                        url,
                        rate_limited_until: None,
                        last_error: EndpointHealth::Ok,
                        consecutive_failures: 0,
                    })
                    .collect(),
            ),
        }
    }

    /// First available endpoint in preference order, or the remaining wait
    /// until the soonest one frees up.
    pub fn pick(&self) -> Result<PickedEndpoint, Duration> {
        let now = Instant::now();
        let pool = self.inner.lock().expect("endpoint pool lock poisoned");

        for (index, endpoint) in pool.iter().enumerate() {
            if endpoint.available_at(now) {
                return Ok(PickedEndpoint {
                    index,
                    url: endpoint.url.clone(),
                });
            }
        }

        let soonest = pool
            .iter()
            .filter_map(|e| e.rate_limited_until)
            .map(|until| until.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::ZERO);
        Err(soonest)
    }

    pub fn mark_success(&self, index: usize) {
        let mut pool = self.inner.lock().expect("endpoint pool lock poisoned");
        if let Some(endpoint) = pool.get_mut(index) {
            endpoint.rate_limited_until = None;
            endpoint.last_error = EndpointHealth::Ok;
            endpoint.consecutive_failures = 0;
        }
    }

    /// Start a cooldown. `retry_after` comes from the `Retry-After` header
    /// or a parsed `retryDelay`; without one, exponential backoff applies.
    /// Returns the cooldown actually imposed.
    pub fn mark_rate_limited(&self, index: usize, retry_after: Option<Duration>) -> Duration {
        self.cooldown(index, retry_after, EndpointHealth::RateLimited)
    }

    pub fn mark_auth_failed(&self, index: usize) {
        let mut pool = self.inner.lock().expect("endpoint pool lock poisoned");
        if let Some(endpoint) = pool.get_mut(index) {
            endpoint.last_error = EndpointHealth::AuthFailed;
            endpoint.consecutive_failures += 1;
        }
    }

    /// 5xx / transport failure: short backoff so retries rotate endpoints.
    pub fn mark_unavailable(&self, index: usize) -> Duration {
        self.cooldown(index, None, EndpointHealth::Unavailable)
    }

    fn cooldown(
        &self,
        index: usize,
        retry_after: Option<Duration>,
        health: EndpointHealth,
    ) -> Duration {
        let mut pool = self.inner.lock().expect("endpoint pool lock poisoned");
        let Some(endpoint) = pool.get_mut(index) else {
            return Duration::ZERO;
        };
        endpoint.consecutive_failures += 1;
        let cooldown = retry_after.unwrap_or_else(|| {
            BACKOFF_BASE
                .saturating_mul(1u32 << (endpoint.consecutive_failures - 1).min(5))
                .min(BACKOFF_CAP)
        });
        endpoint.rate_limited_until = Some(Instant::now() + cooldown);
        endpoint.last_error = health;
        cooldown
    }

    /// True when at least one endpoint can be picked right now.
    pub fn available(&self) -> bool {
        self.pick().is_ok()
    }

    pub fn status(&self) -> Vec<EndpointStatusView> {
        let now = Instant::now();
        let pool = self.inner.lock().expect("endpoint pool lock poisoned");
        pool.iter()
            .map(|endpoint| EndpointStatusView {
                url: endpoint.url.to_string(),
                state: if endpoint.available_at(now) && endpoint.last_error != EndpointHealth::Ok {
                    // Cooldown lapsed; report as usable again.
                    EndpointHealth::Ok
                } else {
                    endpoint.last_error
                },
                rate_limited_for_secs: endpoint
                    .rate_limited_until
                    .map(|until| until.saturating_duration_since(now).as_secs())
                    .filter(|secs| *secs > 0),
            })
            .collect()
    }
}
