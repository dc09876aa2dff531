//! Circuit breaker guarding one resource group's outbound calls.
//!
//! CLOSED lets calls through and records their outcome in a bucketed rolling
//! window. Once the window holds at least `request_volume_threshold` calls
//! and the failure share reaches `error_threshold_percent`, the breaker goes
//! OPEN and short-circuits every call. After `sleep_window_ms` a single
//! trial call is admitted (HALF_OPEN): success closes the breaker, failure
//! reopens it for another sleep window.
//!
//! Time comes from an injected [`Clock`] so tests can drive transitions
//! without sleeping.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use crate::config::BreakerConfig;

// ============================================================================
// Clock
// ============================================================================

/// Millisecond time source for breaker decisions.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Monotonic milliseconds since first use; immune to wall-clock jumps.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        static START: OnceLock<Instant> = OnceLock::new();
        START.get_or_init(Instant::now).elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

impl BreakerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            OPEN => BreakerState::Open,
            HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    /// Time slice number; 0 marks a bucket that was never written.
    slice: u64,
    successes: u64,
    failures: u64,
}

/// Success/failure counts over the last `window_ms`, in `buckets` slices.
#[derive(Debug)]
struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_ms: u64,
}

impl RollingWindow {
    fn new(window_ms: u64, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: vec![Bucket::default(); buckets],
            bucket_ms: (window_ms / buckets as u64).max(1),
        }
    }

    /// Slices are numbered from 1 so the zeroed default never looks current.
    fn slice_of(&self, now_ms: u64) -> u64 {
        now_ms / self.bucket_ms + 1
    }

    fn bucket_mut(&mut self, now_ms: u64) -> &mut Bucket {
        let slice = self.slice_of(now_ms);
        let idx = (slice % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[idx];
        if bucket.slice != slice {
            *bucket = Bucket {
                slice,
                ..Bucket::default()
            };
        }
        bucket
    }

    fn record(&mut self, now_ms: u64, success: bool) {
        let bucket = self.bucket_mut(now_ms);
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    /// `(total, failures)` across buckets still inside the window.
    fn totals(&self, now_ms: u64) -> (u64, u64) {
        let current = self.slice_of(now_ms);
        let span = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.slice != 0 && b.slice + span > current)
            .fold((0, 0), |(total, failures), b| {
                (total + b.successes + b.failures, failures + b.failures)
            })
    }

    fn reset(&mut self) {
        self.buckets.fill(Bucket::default());
    }
}

/// Point-in-time view of a breaker, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub calls_in_window: u64,
    pub failures_in_window: u64,
    pub short_circuited: u64,
}

// ============================================================================
// Circuit Breaker
// ============================================================================

pub struct CircuitBreaker {
    name: Arc<str>,
    error_threshold_percent: u64,
    request_volume_threshold: u64,
    sleep_window_ms: u64,
    clock: Arc<dyn Clock>,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    short_circuited: AtomicU64,
    window: Mutex<RollingWindow>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: &BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: Arc::from(name),
            error_threshold_percent: u64::from(config.error_threshold_percent.min(100)),
            request_volume_threshold: config.request_volume_threshold.max(1),
            sleep_window_ms: config.sleep_window_ms,
            clock,
            state: AtomicU8::new(CLOSED),
            opened_at_ms: AtomicU64::new(0),
            short_circuited: AtomicU64::new(0),
            window: Mutex::new(RollingWindow::new(
                config.rolling_window_ms,
                config.window_buckets,
            )),
        }
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask to make a call. `None` means short-circuit straight to fallback.
    ///
    /// The returned permit must be resolved with [`CallPermit::success`] or
    /// [`CallPermit::failure`]; dropping an unresolved half-open trial puts
    /// the breaker back to OPEN so another trial can be made.
    pub fn try_call(&self) -> Option<CallPermit<'_>> {
        match self.state.load(Ordering::Acquire) {
            CLOSED => Some(CallPermit::new(self, false)),
            OPEN => {
                let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                let slept = self.clock.now_ms().saturating_sub(opened_at) >= self.sleep_window_ms;
                if slept
                    && self
                        .state
                        .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    tracing::info!(group = %self.name, "Circuit breaker half-open, admitting trial call");
                    Some(CallPermit::new(self, true))
                } else {
                    self.short_circuited.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
            _ => {
                self.short_circuited.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = self.clock.now_ms();
        let (calls, failures) = self.with_window(|w| w.totals(now));
        BreakerSnapshot {
            state: self.state(),
            calls_in_window: calls,
            failures_in_window: failures,
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
        }
    }

    fn with_window<T>(&self, f: impl FnOnce(&mut RollingWindow) -> T) -> T {
        let mut window = match self.window.lock() {
            Ok(window) => window,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut *window)
    }

    fn on_success(&self, trial: bool) {
        if trial {
            self.with_window(RollingWindow::reset);
            self.state.store(CLOSED, Ordering::Release);
            tracing::info!(group = %self.name, "Circuit breaker closed after successful trial");
            return;
        }
        let now = self.clock.now_ms();
        self.with_window(|w| w.record(now, true));
    }

    fn on_failure(&self, trial: bool) {
        let now = self.clock.now_ms();
        if trial {
            self.trip(HALF_OPEN, now);
            return;
        }
        let (total, failures) = self.with_window(|w| {
            w.record(now, false);
            w.totals(now)
        });
        if self.state.load(Ordering::Acquire) == CLOSED
            && total >= self.request_volume_threshold
            && failures * 100 >= self.error_threshold_percent * total
        {
            self.trip(CLOSED, now);
        }
    }

    fn abandon_trial(&self) {
        let now = self.clock.now_ms();
        self.trip(HALF_OPEN, now);
    }

    fn trip(&self, from: u8, now_ms: u64) {
        self.opened_at_ms.store(now_ms, Ordering::Release);
        if self
            .state
            .compare_exchange(from, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::info!(
                group = %self.name,
                sleep_window_ms = self.sleep_window_ms,
                "Circuit breaker opened"
            );
        }
    }
}

/// Admission to make one guarded call.
#[must_use = "resolve the permit with success() or failure()"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.abandon_trial();
        }
    }
}
