//! Capability interface for throttling conversation creation.
//!
//! The limiter is injected rather than hardcoded: a process-local map only
//! holds once a single server instance runs, so multi-instance deployments
//! supply an implementation backed by a shared expiring store instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Rate-limiting capability.
pub trait RateLimiter: Send + Sync {
    /// Record one attempt under `key` and report whether it is allowed.
    ///
    /// At most `max` attempts are allowed per `window`; the attempt is
    /// counted even when it is rejected.
    fn check_and_increment(&self, key: &str, window: Duration, max: u32) -> bool;
}

/// How many checks pass between sweeps of lapsed windows.
const SWEEP_EVERY: usize = 256;

#[derive(Clone, Copy)]
struct WindowState {
    started_at: Instant,
    window: Duration,
    count: u32,
}

/// Fixed-window limiter keeping counts in process memory.
///
/// Single-instance stand-in only; the counts are invisible to any other
/// server process. Lapsed windows are swept from the map periodically so
/// it does not keep one entry per initiator ever seen.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    windows: DashMap<String, WindowState>,
    checks_since_sweep: AtomicUsize,
}

impl InMemoryRateLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry whose window has lapsed; returns how many were
    /// removed. Runs from the check path every [`SWEEP_EVERY`] calls.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now.duration_since(state.started_at) < state.window);
        before.saturating_sub(self.windows.len())
    }
}

impl RateLimiter for InMemoryRateLimiter {
    fn check_and_increment(&self, key: &str, window: Duration, max: u32) -> bool {
        if self.checks_since_sweep.fetch_add(1, Ordering::Relaxed) >= SWEEP_EVERY {
            self.checks_since_sweep.store(0, Ordering::Relaxed);
            self.evict_expired();
        }

        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(WindowState {
            started_at: now,
            window,
            count: 0,
        });
        if now.duration_since(entry.started_at) >= entry.window {
            entry.started_at = now;
            entry.count = 0;
        }
        entry.window = window;
        entry.count = entry.count.saturating_add(1);
        entry.count <= max
    }
}

/// Limiter that never rejects; for tests exercising other rules.
#[derive(Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_and_increment(&self, _key: &str, _window: Duration, _max: u32) -> bool {
        true
    }
}
