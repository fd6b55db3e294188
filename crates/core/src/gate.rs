//! Process-wide outbound request throttle.
//!
//! Every network call made by this crate passes through a [`RateGate`]
//! before dispatch. The gate bounds the number of requests admitted within
//! a trailing time window; callers over the budget block until the oldest
//! admitted request ages out of the window.
//!
//! The gate is an explicitly constructed, injectable component rather than
//! a hidden global: tests can instantiate isolated gates with a
//! deterministic [`Clock`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Time source used by the gate.
///
/// Production code uses [`SystemClock`]; tests inject a fake clock so the
/// window bound can be checked without real sleeps.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by `Instant::now` and `thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Configuration for a [`RateGate`].
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Maximum requests admitted per window. `None` disables the gate.
    pub max_requests: Option<u32>,
    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { max_requests: None, window: Duration::from_secs(400) }
    }
}

impl GateConfig {
    /// A gate admitting at most `max_requests` per `window`.
    pub fn limited(max_requests: u32, window: Duration) -> Self {
        Self { max_requests: Some(max_requests), window }
    }
}

struct GateState {
    admitted: VecDeque<Instant>,
    max_requests: Option<u32>,
    window: Duration,
}

/// Shared outbound-request throttle.
///
/// Thread safe; one instance is shared by every [`Transport`](crate::Transport)
/// clone derived from it.
pub struct RateGate {
    state: Mutex<GateState>,
    clock: Box<dyn Clock>,
    total: AtomicU64,
}

impl RateGate {
    /// Creates a gate using the system clock.
    pub fn new(config: GateConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }

    /// Creates a gate with an injected clock.
    pub fn with_clock<C: Clock + 'static>(config: GateConfig, clock: C) -> Self {
        Self {
            state: Mutex::new(GateState {
                admitted: VecDeque::new(),
                max_requests: config.max_requests,
                window: config.window,
            }),
            clock: Box::new(clock),
            total: AtomicU64::new(0),
        }
    }

    /// Blocks until admitting one more request keeps the trailing-window
    /// count within the configured maximum, then admits it.
    ///
    /// With the gate disabled (`max_requests == None`) this only bumps the
    /// total counter. The sleep happens without holding the gate lock; the
    /// state is re-checked after waking, so under heavy concurrency the
    /// admission bound is slightly loose rather than strictly FIFO.
    pub fn admit(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        loop {
            let wait = {
                let mut state = self.lock_state();
                let Some(max) = state.max_requests else {
                    return;
                };
                let now = self.clock.now();
                while let Some(front) = state.admitted.front() {
                    if now.duration_since(*front) >= state.window {
                        state.admitted.pop_front();
                    } else {
                        break;
                    }
                }
                if (state.admitted.len() as u32) < max {
                    state.admitted.push_back(now);
                    return;
                }
                let Some(oldest) = state.admitted.front().copied() else {
                    state.admitted.push_back(now);
                    return;
                };
                state.window - now.duration_since(oldest)
            };
            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate gate full, waiting for a slot");
            self.clock.sleep(wait);
        }
    }

    /// Total number of requests that have passed through this gate.
    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Changes the per-window maximum. `None` disables the gate.
    pub fn set_max_requests(&self, max_requests: Option<u32>) {
        self.lock_state().max_requests = max_requests;
    }

    /// Changes the window length.
    pub fn set_window(&self, window: Duration) {
        self.lock_state().window = window;
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for RateGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("RateGate")
            .field("max_requests", &state.max_requests)
            .field("window", &state.window)
            .field("in_window", &state.admitted.len())
            .field("total", &self.total_requests())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Deterministic clock: sleeping advances time instead of blocking.
    struct FakeClock {
        now: Mutex<Instant>,
        slept: Mutex<Vec<Duration>>,
    }

    impl FakeClock {
        fn new() -> Self {
            Self { now: Mutex::new(Instant::now()), slept: Mutex::new(Vec::new()) }
        }

        fn advance(&self, duration: Duration) {
            *self.now.lock().unwrap() += duration;
        }

        fn total_slept(&self) -> Duration {
            self.slept.lock().unwrap().iter().sum()
        }
    }

    impl Clock for Arc<FakeClock> {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }

        fn sleep(&self, duration: Duration) {
            self.slept.lock().unwrap().push(duration);
            *self.now.lock().unwrap() += duration;
        }
    }

    #[test]
    fn test_disabled_gate_never_blocks() {
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::with_clock(GateConfig::default(), Arc::clone(&clock));
        for _ in 0..1000 {
            gate.admit();
        }
        assert_eq!(clock.total_slept(), Duration::ZERO);
        assert_eq!(gate.total_requests(), 1000);
    }

    #[test]
    fn test_window_bound_holds() {
        let window = Duration::from_secs(60);
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::with_clock(GateConfig::limited(3, window), Arc::clone(&clock));

        // Three calls fill the window without waiting.
        for _ in 0..3 {
            gate.admit();
        }
        assert_eq!(clock.total_slept(), Duration::ZERO);

        // The fourth must wait for the oldest slot to age out.
        gate.admit();
        assert_eq!(clock.total_slept(), window);
    }

    #[test]
    fn test_spread_calls_keep_bound() {
        let window = Duration::from_secs(60);
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::with_clock(GateConfig::limited(2, window), Arc::clone(&clock));

        gate.admit();
        clock.advance(Duration::from_secs(30));
        gate.admit();
        clock.advance(Duration::from_secs(31));
        // The first admission is now outside the window; no sleep needed.
        gate.admit();
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[test]
    fn test_sleep_is_remaining_window_time() {
        let window = Duration::from_secs(60);
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::with_clock(GateConfig::limited(1, window), Arc::clone(&clock));

        gate.admit();
        clock.advance(Duration::from_secs(45));
        gate.admit();
        assert_eq!(clock.total_slept(), Duration::from_secs(15));
    }

    #[test]
    fn test_reconfiguring_disables_gate() {
        let clock = Arc::new(FakeClock::new());
        let gate = RateGate::with_clock(GateConfig::limited(1, Duration::from_secs(60)), Arc::clone(&clock));
        gate.admit();
        gate.set_max_requests(None);
        gate.admit();
        gate.admit();
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_admissions_respect_total() {
        let gate = Arc::new(RateGate::new(GateConfig::default()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = Arc::clone(&gate);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    gate.admit();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(gate.total_requests(), 400);
    }
}
