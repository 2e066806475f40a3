//! Rate gating at the seller gate.
//!
//! The gate consults a [`RateGate`] before doing any payment work. The
//! default [`MemoryRateGate`] is a bounded in-process sliding window; the
//! platform substitutes its shared, circuit-broken limiter through the same
//! trait.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Verdict for one request under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// A sliding-window request counter.
pub trait RateGate: Send + Sync {
    /// Counts one attempt under `key` and returns the verdict.
    fn check(&self, key: &str) -> RateDecision;
}

/// In-process sliding window of request timestamps per key.
///
/// Bounded: at most `max_keys` tracked keys; when full, the stalest key is
/// evicted. Entries expire as their timestamps leave the one-minute window.
pub struct MemoryRateGate {
    limit_per_minute: u32,
    max_keys: usize,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

const WINDOW_MILLIS: u64 = 60_000;

impl MemoryRateGate {
    pub fn new(limit_per_minute: u32) -> Self {
        MemoryRateGate {
            limit_per_minute,
            max_keys: 10_000,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Window check against an explicit clock; the platform's circuit-broken
    /// limiter drives this with its own time source.
    pub fn check_at(&self, key: &str, now_millis: u64) -> RateDecision {
        let mut windows = self.windows.lock().expect("rate gate lock poisoned");
        let cutoff = now_millis.saturating_sub(WINDOW_MILLIS);

        if !windows.contains_key(key) && windows.len() >= self.max_keys {
            // Evict the key with the oldest most-recent hit.
            let stalest = windows
                .iter()
                .min_by_key(|(_, hits)| hits.back().copied().unwrap_or(0))
                .map(|(k, _)| k.clone());
            if let Some(stalest) = stalest {
                windows.remove(&stalest);
            }
        }

        let hits = windows.entry(key.to_string()).or_default();
        while hits.front().is_some_and(|&t| t <= cutoff) {
            hits.pop_front();
        }
        if hits.len() >= self.limit_per_minute as usize {
            let oldest = hits.front().copied().unwrap_or(now_millis);
            let retry_after_millis = (oldest + WINDOW_MILLIS).saturating_sub(now_millis);
            return RateDecision::Limited {
                retry_after_secs: retry_after_millis.div_ceil(1000).max(1),
            };
        }
        hits.push_back(now_millis);
        RateDecision::Allowed {
            remaining: self.limit_per_minute - hits.len() as u32,
        }
    }
}

impl RateGate for MemoryRateGate {
    fn check(&self, key: &str) -> RateDecision {
        let now_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("SystemTime before UNIX epoch?!?")
            .as_millis() as u64;
        self.check_at(key, now_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_until_limit_then_denies() {
        let gate = MemoryRateGate::new(3);
        let t0 = 1_000_000;
        assert!(gate.check_at("ip:1.2.3.4", t0).is_allowed());
        assert!(gate.check_at("ip:1.2.3.4", t0 + 1).is_allowed());
        assert!(gate.check_at("ip:1.2.3.4", t0 + 2).is_allowed());
        match gate.check_at("ip:1.2.3.4", t0 + 3) {
            RateDecision::Limited { retry_after_secs } => assert!(retry_after_secs >= 1),
            other => panic!("expected limit, got {other:?}"),
        }
    }

    #[test]
    fn window_slides() {
        let gate = MemoryRateGate::new(1);
        let t0 = 1_000_000;
        assert!(gate.check_at("k", t0).is_allowed());
        assert!(!gate.check_at("k", t0 + 1000).is_allowed());
        // One minute later the first hit has expired.
        assert!(gate.check_at("k", t0 + WINDOW_MILLIS + 1).is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let gate = MemoryRateGate::new(1);
        let t0 = 1_000_000;
        assert!(gate.check_at("a", t0).is_allowed());
        assert!(gate.check_at("b", t0).is_allowed());
    }

    #[test]
    fn key_count_is_bounded() {
        let gate = MemoryRateGate {
            limit_per_minute: 10,
            max_keys: 3,
            windows: Mutex::new(HashMap::new()),
        };
        for i in 0..10 {
            gate.check_at(&format!("k{i}"), 1_000_000 + i);
        }
        assert!(gate.windows.lock().unwrap().len() <= 3);
    }
}
