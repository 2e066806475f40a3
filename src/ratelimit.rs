//! The shared rate limiter: store-backed counter, in-memory fallback,
//! circuit breaker in between.
//!
//! The primary backend is an atomic increment on the store's rate-limit
//! counters. When it fails five times in a row the circuit opens for
//! thirty seconds and everything answers from the process-local sliding
//! window; after that a single trial request probes the primary again.
//! The limiter never fails open: every error path returns the fallback's
//! verdict.

use std::sync::{Arc, Mutex};

use apitoll_axum::limit::{MemoryRateGate, RateDecision, RateGate};
use apitoll_store::document::IndexKey;
use apitoll_store::tables::RateLimitCounter;
use apitoll_store::{Store, StoreError};
use apitoll_types::timestamp::now_millis;

const WINDOW_MILLIS: u64 = 60_000;
const FAILURES_TO_OPEN: u32 = 5;
const OPEN_MILLIS: u64 = 30_000;
/// Sweep interval for expired counters.
pub const PRUNE_INTERVAL_SECS: u64 = 600;

/// Time source; tests substitute a manual clock.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_millis()
    }
}

/// The shared counter the limiter increments.
pub trait CounterBackend: Send + Sync {
    /// Atomically increments `(key, window_start)` and returns the new
    /// count.
    fn incr(&self, key: &str, window_start: u64) -> Result<u32, StoreError>;
}

/// Store-backed counter rows, unique per `(key, windowStart)`.
pub struct StoreCounterBackend {
    store: Store,
}

impl StoreCounterBackend {
    pub fn new(store: Store) -> Self {
        StoreCounterBackend { store }
    }
}

impl CounterBackend for StoreCounterBackend {
    fn incr(&self, key: &str, window_start: u64) -> Result<u32, StoreError> {
        let key = key.to_string();
        self.store.mutate(move |inner| {
            let index_key = IndexKey::single(key.clone()).part_u64(window_start);
            match inner
                .rate_limits
                .unique_by_index("by_key_window", &index_key)
            {
                Some((id, counter)) => {
                    let next = counter.count + 1;
                    inner.rate_limits.patch(&id, |counter| {
                        counter.count = next;
                        Ok(())
                    })?;
                    Ok(next)
                }
                None => {
                    inner.rate_limits.insert(RateLimitCounter {
                        key: key.clone(),
                        window_start,
                        count: 1,
                    })?;
                    Ok(1)
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Circuit {
    Closed,
    Open { since_millis: u64 },
    HalfOpen,
}

struct BreakerState {
    circuit: Circuit,
    consecutive_failures: u32,
}

/// Sliding-window limiter with primary/fallback backends and a circuit
/// breaker. Implements [`RateGate`], so it plugs straight into the seller
/// gate and the HTTP surface.
pub struct SlidingWindowLimiter {
    limit_per_minute: u32,
    backend: Arc<dyn CounterBackend>,
    fallback: MemoryRateGate,
    breaker: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(limit_per_minute: u32, backend: Arc<dyn CounterBackend>) -> Self {
        Self::with_clock(limit_per_minute, backend, Arc::new(SystemClock))
    }

    pub fn with_clock(
        limit_per_minute: u32,
        backend: Arc<dyn CounterBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        SlidingWindowLimiter {
            limit_per_minute,
            backend,
            fallback: MemoryRateGate::new(limit_per_minute),
            breaker: Mutex::new(BreakerState {
                circuit: Circuit::Closed,
                consecutive_failures: 0,
            }),
            clock,
        }
    }

    fn fallback_check(&self, key: &str, now: u64) -> RateDecision {
        self.fallback.check_at(key, now)
    }

    fn primary_check(&self, key: &str, now: u64) -> Result<RateDecision, StoreError> {
        let window_start = now - now % WINDOW_MILLIS;
        let count = self.backend.incr(key, window_start)?;
        if count > self.limit_per_minute {
            let retry_after_millis = window_start + WINDOW_MILLIS - now;
            Ok(RateDecision::Limited {
                retry_after_secs: retry_after_millis.div_ceil(1000).max(1),
            })
        } else {
            Ok(RateDecision::Allowed {
                remaining: self.limit_per_minute - count,
            })
        }
    }

    fn check_now(&self, key: &str, now: u64) -> RateDecision {
        let use_primary = {
            let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
            match breaker.circuit {
                Circuit::Closed => true,
                Circuit::HalfOpen => false,
                Circuit::Open { since_millis } => {
                    if now.saturating_sub(since_millis) >= OPEN_MILLIS {
                        // One trial request probes the primary.
                        breaker.circuit = Circuit::HalfOpen;
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if !use_primary {
            return self.fallback_check(key, now);
        }

        match self.primary_check(key, now) {
            Ok(decision) => {
                let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
                breaker.consecutive_failures = 0;
                breaker.circuit = Circuit::Closed;
                decision
            }
            Err(err) => {
                let mut breaker = self.breaker.lock().expect("breaker lock poisoned");
                breaker.consecutive_failures += 1;
                let failures = breaker.consecutive_failures;
                if matches!(breaker.circuit, Circuit::HalfOpen)
                    || failures >= FAILURES_TO_OPEN
                {
                    breaker.circuit = Circuit::Open { since_millis: now };
                }
                drop(breaker);
                tracing::warn!(error = %err, failures, "rate-limit primary failed, using fallback");
                self.fallback_check(key, now)
            }
        }
    }

    /// Spawns the periodic sweep that prunes expired counters.
    pub fn spawn_prune_task(
        store: Store,
        shutdown: tokio_util::sync::CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(PRUNE_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let cutoff = now_millis().saturating_sub(2 * WINDOW_MILLIS);
                match store.mutate(|inner| Ok(inner.prune_rate_limits(cutoff))) {
                    Ok(pruned) if pruned > 0 => {
                        tracing::debug!(pruned, "pruned expired rate-limit counters");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "rate-limit prune failed"),
                }
            }
        });
    }
}

impl RateGate for SlidingWindowLimiter {
    fn check(&self, key: &str) -> RateDecision {
        self.check_now(key, self.clock.now_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock(AtomicU64);

    impl ManualClock {
        fn new(start: u64) -> Arc<Self> {
            Arc::new(ManualClock(AtomicU64::new(start)))
        }

        fn advance(&self, millis: u64) {
            self.0.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct FailingBackend;

    impl CounterBackend for FailingBackend {
        fn incr(&self, _key: &str, _window_start: u64) -> Result<u32, StoreError> {
            Err(StoreError::Conflict("backend down".to_string()))
        }
    }

    /// Fails the first `n` calls, then works via a real store.
    struct FlakyBackend {
        inner: StoreCounterBackend,
        remaining_failures: Mutex<u32>,
    }

    impl CounterBackend for FlakyBackend {
        fn incr(&self, key: &str, window_start: u64) -> Result<u32, StoreError> {
            let mut remaining = self.remaining_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Conflict("backend down".to_string()));
            }
            drop(remaining);
            self.inner.incr(key, window_start)
        }
    }

    #[test]
    fn store_backend_counts_per_window() {
        let backend = StoreCounterBackend::new(Store::new());
        assert_eq!(backend.incr("ip:1", 0).unwrap(), 1);
        assert_eq!(backend.incr("ip:1", 0).unwrap(), 2);
        assert_eq!(backend.incr("ip:1", 60_000).unwrap(), 1);
        assert_eq!(backend.incr("ip:2", 0).unwrap(), 1);
    }

    #[test]
    fn limits_at_configured_budget() {
        let clock = ManualClock::new(1_000_000);
        let limiter = SlidingWindowLimiter::with_clock(
            2,
            Arc::new(StoreCounterBackend::new(Store::new())),
            clock.clone(),
        );
        assert!(limiter.check("ip:a").is_allowed());
        assert!(limiter.check("ip:a").is_allowed());
        match limiter.check("ip:a") {
            RateDecision::Limited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("expected limit, got {other:?}"),
        }
        // New window, fresh budget.
        clock.advance(WINDOW_MILLIS);
        assert!(limiter.check("ip:a").is_allowed());
    }

    #[test]
    fn circuit_opens_after_five_failures_and_never_fails_open() {
        let clock = ManualClock::new(1_000_000);
        let limiter =
            SlidingWindowLimiter::with_clock(100, Arc::new(FailingBackend), clock.clone());
        // Every failed primary call still yields a fallback verdict.
        for _ in 0..FAILURES_TO_OPEN {
            assert!(limiter.check("ip:a").is_allowed());
        }
        {
            let breaker = limiter.breaker.lock().unwrap();
            assert!(matches!(breaker.circuit, Circuit::Open { .. }));
        }
        // While open, the primary is not consulted (failure count frozen).
        limiter.check("ip:a");
        assert_eq!(
            limiter.breaker.lock().unwrap().consecutive_failures,
            FAILURES_TO_OPEN
        );
    }

    #[test]
    fn half_open_trial_closes_circuit_on_success() {
        let clock = ManualClock::new(1_000_000);
        let backend = Arc::new(FlakyBackend {
            inner: StoreCounterBackend::new(Store::new()),
            remaining_failures: Mutex::new(FAILURES_TO_OPEN),
        });
        let limiter = SlidingWindowLimiter::with_clock(100, backend, clock.clone());
        for _ in 0..FAILURES_TO_OPEN {
            limiter.check("ip:a");
        }
        assert!(matches!(
            limiter.breaker.lock().unwrap().circuit,
            Circuit::Open { .. }
        ));

        // Before the open window elapses the fallback serves.
        clock.advance(OPEN_MILLIS - 1);
        limiter.check("ip:a");
        assert!(matches!(
            limiter.breaker.lock().unwrap().circuit,
            Circuit::Open { .. }
        ));

        // After 30 s the trial request hits the (recovered) primary and
        // closes the circuit.
        clock.advance(1);
        assert!(limiter.check("ip:a").is_allowed());
        let breaker = limiter.breaker.lock().unwrap();
        assert_eq!(breaker.circuit, Circuit::Closed);
        assert_eq!(breaker.consecutive_failures, 0);
    }

    #[test]
    fn half_open_trial_reopens_on_failure() {
        let clock = ManualClock::new(1_000_000);
        let limiter =
            SlidingWindowLimiter::with_clock(100, Arc::new(FailingBackend), clock.clone());
        for _ in 0..FAILURES_TO_OPEN {
            limiter.check("ip:a");
        }
        clock.advance(OPEN_MILLIS);
        // Trial fails; the circuit reopens from now.
        assert!(limiter.check("ip:a").is_allowed());
        assert!(matches!(
            limiter.breaker.lock().unwrap().circuit,
            Circuit::Open { since_millis } if since_millis == clock.now_millis()
        ));
    }
}
