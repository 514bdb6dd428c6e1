//! Per-host politeness limits shared by every worker in a batch.
//!
//! Each host key (taken from a [`SourceDescriptor`]) gets a semaphore capping
//! simultaneous requests and an interval gate spacing request starts. The
//! caps hold regardless of the global worker count, so raising concurrency
//! never raises the load on a single host.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use paperfetch_core::acquire::HostLimiter;
//! use paperfetch_core::source::HostLimit;
//!
//! # async fn example() {
//! let limiter = HostLimiter::new();
//! limiter.register("pmc.ncbi.nlm.nih.gov", HostLimit {
//!     max_concurrent: 2,
//!     min_interval: Duration::from_millis(500),
//! });
//!
//! let permit = limiter.acquire("pmc.ncbi.nlm.nih.gov").await;
//! // ... request
//! drop(permit);
//! # }
//! ```

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::source::{HostLimit, SourceDescriptor};

/// Warning threshold for cumulative delay per host.
const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After value honored (1 hour).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Per-host limiter. Wrap in `Arc` and share across tasks.
#[derive(Debug, Default)]
pub struct HostLimiter {
    /// Per-host state. Arc lets callers release the shard lock before awaiting.
    hosts: DashMap<String, Arc<HostState>>,
    disabled: bool,
}

#[derive(Debug)]
struct HostState {
    limit: HostLimit,
    semaphore: Arc<Semaphore>,
    /// Earliest start time of the next request. `None` before the first request.
    next_start: Mutex<Option<Instant>>,
    /// Server-requested pause; checked after the interval gate.
    deferred_until: StdMutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl HostState {
    fn new(limit: HostLimit) -> Self {
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit.max_concurrent.max(1))),
            next_start: Mutex::new(None),
            deferred_until: StdMutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let new_total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(new_total)
    }

    fn deferred_until(&self) -> Option<Instant> {
        self.deferred_until.lock().ok().and_then(|guard| *guard)
    }
}

/// RAII permit for one request to a host. Dropping it frees the slot.
#[derive(Debug)]
pub struct HostPermit {
    _permit: Option<OwnedSemaphorePermit>,
    state: Option<Arc<HostState>>,
}

impl Drop for HostPermit {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl HostLimiter {
    /// Creates an empty limiter. Unregistered hosts get [`HostLimit::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a limiter that never waits. Intended for tests.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled host limiter");
        Self {
            hosts: DashMap::new(),
            disabled: true,
        }
    }

    /// Builds a limiter from source descriptors.
    ///
    /// Descriptors sharing a host are merged to the strictest budget: the
    /// smallest concurrency cap and the longest interval.
    #[must_use]
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a SourceDescriptor>) -> Self {
        let limiter = Self::new();
        for descriptor in descriptors {
            limiter.register(&descriptor.host, descriptor.limit);
        }
        limiter
    }

    /// Registers or tightens the limit for `host`. Call before the batch starts.
    pub fn register(&self, host: &str, limit: HostLimit) {
        let merged = match self.hosts.get(host) {
            Some(existing) => HostLimit {
                max_concurrent: existing.limit.max_concurrent.min(limit.max_concurrent),
                min_interval: existing.limit.min_interval.max(limit.min_interval),
            },
            None => limit,
        };
        debug!(
            host,
            max_concurrent = merged.max_concurrent,
            min_interval_ms = merged.min_interval.as_millis(),
            "registered host limit"
        );
        self.hosts
            .insert(host.to_string(), Arc::new(HostState::new(merged)));
    }

    /// Whether the limiter is a no-op.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn state(&self, host: &str) -> Arc<HostState> {
        self.hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(HostState::new(HostLimit::default())))
            .clone()
    }

    /// Waits for a concurrency slot and the interval gate for `host`.
    ///
    /// The first request to a host proceeds without delay. Dropping the
    /// returned future before it resolves releases nothing it had not taken.
    #[instrument(skip(self))]
    pub async fn acquire(&self, host: &str) -> HostPermit {
        if self.disabled {
            return HostPermit {
                _permit: None,
                state: None,
            };
        }

        let state = self.state(host);
        let permit = Arc::clone(&state.semaphore).acquire_owned().await.ok();

        {
            let mut next_start = state.next_start.lock().await;
            let now = Instant::now();
            let mut wait_until = next_start.filter(|at| *at > now);
            if let Some(deferred) = state.deferred_until().filter(|at| *at > now) {
                wait_until = Some(wait_until.map_or(deferred, |at| at.max(deferred)));
            }

            if let Some(at) = wait_until {
                let delay = at.saturating_duration_since(now);
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    host,
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying host limit delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        host,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive host limiting - consider reducing request volume to this host"
                    );
                }
                tokio::time::sleep_until(at).await;
            }

            *next_start = Some(Instant::now() + state.limit.min_interval);
        }

        let current = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        state.high_water.fetch_max(current, Ordering::SeqCst);

        HostPermit {
            _permit: permit,
            state: Some(state),
        }
    }

    /// Defers all further requests to `host` by `delay` (server `Retry-After`).
    #[instrument(skip(self))]
    pub fn defer(&self, host: &str, delay: Duration) {
        if self.disabled || delay.is_zero() {
            return;
        }
        let state = self.state(host);
        let until = Instant::now() + delay.min(MAX_RETRY_AFTER);
        if let Ok(mut guard) = state.deferred_until.lock() {
            *guard = Some(guard.map_or(until, |current| current.max(until)));
        }
        let cumulative = state.add_cumulative_delay(delay);
        debug!(
            host,
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                host,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting - host may be under heavy load"
            );
        }
    }

    /// Configured limit for `host`, if registered.
    #[must_use]
    pub fn limit(&self, host: &str) -> Option<HostLimit> {
        self.hosts.get(host).map(|state| state.limit)
    }

    /// Highest number of simultaneous permits observed for `host`.
    #[must_use]
    pub fn high_water(&self, host: &str) -> usize {
        self.hosts
            .get(host)
            .map_or(0, |state| state.high_water.load(Ordering::SeqCst))
    }
}

/// Parses a `Retry-After` header value (integer seconds or HTTP-date).
///
/// Returns `None` if unparseable. Values above one hour are capped; past dates yield zero.
///
/// ```
/// use std::time::Duration;
/// use paperfetch_core::acquire::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => {
                debug!(header_value, "Retry-After date is in the past, returning zero");
                Some(Duration::ZERO)
            }
        },
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
