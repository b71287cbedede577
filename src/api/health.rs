//! Shared health state for the /health endpoint.
//! Updated by PollScheduler and NotificationDispatcher.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared health counters. Updated by the poll loop, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Unix milliseconds when the last full scheduling pass finished (0 = none).
    pub last_cycle_at_ms: AtomicU64,
    pub cycles_completed: AtomicU64,
    pub lots_fetched: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub notifications_sent: AtomicU64,
    pub delivery_failures: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish_cycle(&self, at_ms: u64) {
        self.last_cycle_at_ms.store(at_ms, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_lots_fetched(&self, n: u64) {
        self.lots_fetched.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_fetch_failures(&self) {
        self.fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivery_failures(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_cycle_at_ms(&self) -> u64 {
        self.last_cycle_at_ms.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn lots_fetched(&self) -> u64 {
        self.lots_fetched.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }

    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }
}
