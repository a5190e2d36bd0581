//! # Per-Sender State
//!
//! Each sender owns one token bucket holding fractional credits. The bucket
//! refills continuously: credits are recomputed from elapsed time whenever
//! the sender calls `send`, so there is no background refill thread.
//!
//! ```text
//!     refill(now):
//!
//!     credits ──► credits + minutes_since(last_refill) × rate
//!                        │
//!                        ▼
//!                 min(capacity, …)   ← long idle periods cannot overflow
//!
//!     try_take():
//!
//!     credits ≥ 1 ──Yes──► credits - 1 ──► admit
//!          │
//!          No ──► wait (1 - credits) / rate minutes, or reject
//! ```
//!
//! ## Ordering
//!
//! Several threads may call `send` for the same sender at once. Each call
//! draws a ticket under the sender's mutex and waits on the sender's condvar
//! until its ticket is served, so calls are admitted in the order they
//! reached the lock. The condvar doubles as the timed wait of the delay path
//! and is what `close` signals to wake everything up.

use super::metrics::SenderMetrics;
use super::utils::{duration_from_minutes, minutes_between};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Slack when comparing against a whole credit.
///
/// After sleeping exactly the computed deficit, float rounding can leave the
/// bucket at 0.999999999…; that counts as a full credit.
const CREDIT_EPSILON: f64 = 1e-9;

/// Mutable part of a sender's state, always accessed under the sender mutex.
#[derive(Debug)]
pub(crate) struct Bucket {
    credits: f64,
    capacity: f64,
    last_refill: Instant,

    next_ticket: u64,
    now_serving: u64,

    admitted: u64,
    delayed: u64,
    rejected: u64,
    closed: u64,
    max_delay: Duration,
}

impl Bucket {
    /// A bucket that starts full, so a fresh sender can burst up to capacity.
    pub(crate) fn full(capacity: f64, now: Instant) -> Self {
        Self {
            credits: capacity,
            capacity,
            last_refill: now,
            next_ticket: 0,
            now_serving: 0,
            admitted: 0,
            delayed: 0,
            rejected: 0,
            closed: 0,
            max_delay: Duration::ZERO,
        }
    }

    /// Adds the credit accrued since the last refill, clamped at capacity.
    pub(crate) fn refill(&mut self, now: Instant, rate_per_minute: f64) {
        let elapsed = minutes_between(self.last_refill, now);
        if elapsed > 0.0 {
            self.credits = (self.credits + elapsed * rate_per_minute).min(self.capacity);
            self.last_refill = now;
        }
        self.check_invariant();
    }

    /// Consumes one credit if a whole one is available.
    pub(crate) fn try_take(&mut self) -> bool {
        if self.credits + CREDIT_EPSILON < 1.0 {
            return false;
        }
        self.credits = (self.credits - 1.0).max(0.0);
        self.check_invariant();
        true
    }

    /// Gives back a credit taken for a message that could not be delivered.
    pub(crate) fn refund(&mut self) {
        self.credits = (self.credits + 1.0).min(self.capacity);
        self.check_invariant();
    }

    /// How long until one whole credit will have accrued.
    pub(crate) fn time_until_credit(&self, rate_per_minute: f64) -> Duration {
        duration_from_minutes((1.0 - self.credits) / rate_per_minute)
    }

    /// Current credit balance, as of the last refill.
    #[inline]
    pub(crate) fn credits(&self) -> f64 {
        self.credits
    }

    pub(crate) fn issue_ticket(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        ticket
    }

    #[inline]
    pub(crate) fn is_turn(&self, ticket: u64) -> bool {
        self.now_serving == ticket
    }

    pub(crate) fn end_turn(&mut self) {
        assert!(
            self.now_serving < self.next_ticket,
            "turn ended without an outstanding ticket"
        );
        self.now_serving += 1;
    }

    /// Number of calls queued behind the one currently being served.
    pub(crate) fn queued(&self) -> u64 {
        self.next_ticket
            .saturating_sub(self.now_serving)
            .saturating_sub(1)
    }

    pub(crate) fn on_admitted(&mut self, delay: Option<Duration>) {
        self.admitted += 1;
        if let Some(delay) = delay {
            self.delayed += 1;
            self.max_delay = self.max_delay.max(delay);
        }
    }

    pub(crate) fn on_rejected(&mut self) {
        self.rejected += 1;
    }

    pub(crate) fn on_closed(&mut self) {
        self.closed += 1;
    }

    #[inline]
    fn check_invariant(&self) {
        assert!(
            self.credits >= 0.0 && self.credits <= self.capacity,
            "credit balance {} outside [0, {}]",
            self.credits,
            self.capacity
        );
    }
}

/// State for one sender: its identity, its bucket and the condvar its
/// `send` calls wait on.
#[derive(Debug)]
pub(crate) struct SenderState {
    sender: String,
    bucket: Mutex<Bucket>,
    turn: Condvar,
}

impl SenderState {
    pub(crate) fn new(sender: impl Into<String>, capacity: f64, now: Instant) -> Self {
        Self {
            sender: sender.into(),
            bucket: Mutex::new(Bucket::full(capacity, now)),
            turn: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn sender(&self) -> &str {
        &self.sender
    }

    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, Bucket> {
        self.bucket.lock()
    }

    /// Waits for another call to finish its turn, or for `close`.
    pub(crate) fn wait(&self, bucket: &mut MutexGuard<'_, Bucket>) {
        self.turn.wait(bucket);
    }

    /// Waits for credit to accrue, giving up early if woken by `close`.
    pub(crate) fn wait_for(&self, bucket: &mut MutexGuard<'_, Bucket>, timeout: Duration) {
        let _ = self.turn.wait_for(bucket, timeout);
    }

    /// Lets the next queued call for this sender proceed.
    pub(crate) fn pass_turn(&self, bucket: &mut MutexGuard<'_, Bucket>) {
        bucket.end_turn();
        self.turn.notify_all();
    }

    /// Wakes every waiter. Taking the lock first means a waiter that has
    /// checked the lifecycle but not yet parked cannot miss the signal.
    pub(crate) fn wake_all(&self) {
        let _bucket = self.bucket.lock();
        self.turn.notify_all();
    }

    pub(crate) fn metrics(&self) -> SenderMetrics {
        let bucket = self.bucket.lock();
        SenderMetrics {
            sender: self.sender.clone(),
            admitted: bucket.admitted,
            delayed: bucket.delayed,
            rejected: bucket.rejected,
            closed: bucket.closed,
            credits: bucket.credits,
            capacity: bucket.capacity,
            queued: bucket.queued(),
            max_delay: bucket.max_delay,
        }
    }
}
