//! Request throttling per scanner.
//!
//! Services limit how often a single API key may submit files and look up
//! reports. The limiter remembers when the last request of each class was made
//! and blocks the calling thread until the service's minimum interval has
//! passed. Some services count both classes against one shared quota, in that
//! case recording one class records both.
//!
//! The sleep is performed in short slices so a pending Ctrl+C is noticed
//! without waiting for a full interval (up to 144 seconds for Metadefender).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single sleep while waiting, so interrupts are noticed quickly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// How the two request classes relate to the service's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPool {
    /// Scans and lookups draw from one quota.
    Shared,
    /// Scans and lookups are limited independently.
    Separate,
}

/// Minimum intervals of one service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    /// Minimum time between two scan submissions.
    pub scan_interval: Duration,
    /// Minimum time between two report lookups.
    pub lookup_interval: Duration,
    pub pool: RequestPool,
}

/// The wait was cut short by a shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Interrupted while waiting for the request rate limit")]
pub struct Interrupted;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestClass {
    Scan,
    Lookup,
}

impl RequestClass {
    fn describe(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Lookup => "report",
        }
    }
}

/// Tracks the last request of each class and enforces the intervals.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    honour_time_limit: bool,
    last_scan: Option<Instant>,
    last_lookup: Option<Instant>,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl RateLimiter {
    /// Create a limiter that enforces `limits`. No request has been made yet,
    /// so the first request of each class never waits.
    #[must_use]
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            honour_time_limit: true,
            last_scan: None,
            last_lookup: None,
            shutdown_flag: None,
        }
    }

    /// Enable or disable throttling. A disabled limiter never waits.
    #[must_use]
    pub fn with_time_limit(mut self, honour: bool) -> Self {
        self.honour_time_limit = honour;
        self
    }

    /// Abort waits once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Whether throttling is enabled.
    #[must_use]
    pub fn honours_time_limit(&self) -> bool {
        self.honour_time_limit
    }

    #[must_use]
    pub fn time_between_consecutive_scan_requests(&self) -> Duration {
        self.limits.scan_interval
    }

    #[must_use]
    pub fn time_between_consecutive_hash_lookups(&self) -> Duration {
        self.limits.lookup_interval
    }

    /// Time still to wait at `now` before the next scan request may be sent.
    #[must_use]
    pub fn remaining_scan_wait(&self, now: Instant) -> Duration {
        self.remaining(self.last_scan, self.limits.scan_interval, now)
    }

    /// Time still to wait at `now` before the next lookup may be sent.
    #[must_use]
    pub fn remaining_lookup_wait(&self, now: Instant) -> Duration {
        self.remaining(self.last_lookup, self.limits.lookup_interval, now)
    }

    /// Block until a scan request may be sent.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if shutdown was requested while waiting.
    pub fn wait_for_scan_limit_expiration(&self) -> Result<(), Interrupted> {
        let wait = self.remaining_scan_wait(Instant::now());
        self.sleep(wait, RequestClass::Scan)
    }

    /// Block until a report lookup may be sent.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if shutdown was requested while waiting.
    pub fn wait_for_hash_lookup_limit_expiration(&self) -> Result<(), Interrupted> {
        let wait = self.remaining_lookup_wait(Instant::now());
        self.sleep(wait, RequestClass::Lookup)
    }

    /// Record that a scan request was sent just now.
    pub fn scan_request_was_now(&mut self) {
        let now = Instant::now();
        self.last_scan = Some(now);
        if self.limits.pool == RequestPool::Shared {
            self.last_lookup = Some(now);
        }
    }

    /// Record that a lookup was sent just now.
    pub fn hash_lookup_was_now(&mut self) {
        let now = Instant::now();
        self.last_lookup = Some(now);
        if self.limits.pool == RequestPool::Shared {
            self.last_scan = Some(now);
        }
    }

    fn remaining(&self, last: Option<Instant>, interval: Duration, now: Instant) -> Duration {
        if !self.honour_time_limit {
            return Duration::ZERO;
        }
        last.map_or(Duration::ZERO, |last| {
            interval.saturating_sub(now.saturating_duration_since(last))
        })
    }

    fn sleep(&self, wait: Duration, class: RequestClass) -> Result<(), Interrupted> {
        if wait.is_zero() {
            return Ok(());
        }
        log::info!(
            "Waiting {} for the {} request limit to expire...",
            describe_wait(wait),
            class.describe()
        );

        sleep_until(Instant::now() + wait, self.shutdown_flag.as_deref())
    }
}

/// Block until `deadline`, checking `shutdown` between short sleeps.
///
/// # Errors
///
/// Returns [`Interrupted`] as soon as `shutdown` is set, also when the
/// deadline has already passed.
pub fn sleep_until(deadline: Instant, shutdown: Option<&AtomicBool>) -> Result<(), Interrupted> {
    loop {
        if shutdown.is_some_and(|f| f.load(Ordering::SeqCst)) {
            return Err(Interrupted);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

/// Render a wait as whole seconds from two seconds on, milliseconds below.
#[must_use]
pub fn describe_wait(wait: Duration) -> String {
    if wait >= Duration::from_secs(2) {
        format!("{} seconds", wait.as_secs())
    } else {
        format!("{} milliseconds", wait.as_millis())
    }
}
