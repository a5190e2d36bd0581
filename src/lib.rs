//! # Sluice - Per-Sender Admission Control for Rust
//!
//! Many threads push messages, one consumer drains them. Sluice sits in
//! between and makes sure no single sender floods the consumer: every sender
//! gets its own token bucket, and a sender that runs out of credit is either
//! slowed down or turned away while everyone else keeps flowing.
//!
//! ## The Token Bucket
//!
//! ```text
//!     Per-sender bucket (rate = 60/min, capacity = 60):
//!
//!     Time 0:     [●●●●●●●●●●…] 60 credits - a fresh sender may burst 60
//!     60 sends:   [           ] 0 credits
//!     Time +0.5s: [◐          ] 0.5 credits - refill is continuous
//!     Time +1s:   [●          ] 1 credit   - the 61st message goes through
//! ```
//!
//! - **Credits** are fractional and refill continuously at the configured rate
//! - **Capacity** equals the per-minute rate, so idle senders cannot hoard
//! - **Overflow policy** decides what happens without credit: delay or reject
//!
//! ## Quick Start
//!
//! ```rust
//! use sluice::{Collector, LimiterConfig, Message, RateLimiter};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let limiter = Arc::new(RateLimiter::new(LimiterConfig::per_minute(600.0)));
//! limiter.start().unwrap();
//! let mut collector = Collector::new(limiter.take_output().unwrap());
//!
//! // One consumer
//! let consumer = thread::spawn(move || {
//!     collector.run();
//!     collector
//! });
//!
//! // Many senders
//! let senders: Vec<_> = ["alice", "bob", "carol"]
//!     .into_iter()
//!     .map(|name| {
//!         let limiter = limiter.clone();
//!         thread::spawn(move || {
//!             for i in 0..10 {
//!                 limiter.send(Message::new(i, name, "hello")).unwrap();
//!             }
//!         })
//!     })
//!     .collect();
//! for sender in senders {
//!     sender.join().unwrap();
//! }
//!
//! limiter.close().unwrap();
//! let report = consumer.join().unwrap().evaluate(10, 3);
//! assert!(report.is_lossless());
//! assert_eq!(report.total_received, 30);
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!     sender ─┐
//!     sender ─┼──► RateLimiter::send ──► output stream ──► Collector ──► Evaluator
//!     sender ─┘         │                   (single          │             │
//!                       │                    consumer)       ▼             ▼
//!              ┌────────┴────────┐                     records       Report
//!              │ per-sender      │
//!              │ bucket + FIFO   │
//!              └─────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! | Property | Guarantee |
//! |----------|-----------|
//! | Rate | admitted per window ≤ capacity + rate × window |
//! | Ordering | FIFO per sender; no order across senders |
//! | Isolation | one sender's delay never blocks another |
//! | Shutdown | delayed sends fail with `Closed`; stream ends once, after draining |
//!
//! ## Thread Safety
//!
//! `RateLimiter` is `Send + Sync`; share it via `Arc` (see
//! [`SharedRateLimiter`]). The output stream has exactly one consumer.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

mod collector;
mod evaluator;
mod rate_limiter;

pub use collector::Collector;
pub use evaluator::{evaluate, Report, SenderStats, MAX_LISTED_MISSING};
pub use rate_limiter::{
    CloseError, ConfigError, LifecycleState, LimiterConfig, LimiterMetrics, Message,
    MessageStream, OverflowPolicy, RateLimiter, RecvError, SendError, SenderMetrics,
    StartError, DEFAULT_RATE_PER_MINUTE,
};

/// A limiter wrapped in `Arc` for sharing across sender threads.
///
/// # Example
/// ```rust
/// use sluice::{LimiterConfig, Message, RateLimiter, SharedRateLimiter};
/// use std::sync::Arc;
///
/// let shared: SharedRateLimiter = Arc::new(RateLimiter::new(LimiterConfig::default()));
/// shared.start().unwrap();
///
/// let limiter = shared.clone();
/// std::thread::spawn(move || {
///     limiter.send(Message::new(0, "alice", "hi")).unwrap();
/// })
/// .join()
/// .unwrap();
/// ```
pub type SharedRateLimiter = std::sync::Arc<RateLimiter>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use sluice::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for wiring up a limiter.
    //!
    //! # Example
    //! ```rust
    //! use sluice::prelude::*;
    //!
    //! let limiter = LimiterBuilder::new().rate_per_minute(60.0).reject(true).build();
    //! assert_eq!(limiter.config().policy, OverflowPolicy::Reject);
    //! ```

    pub use crate::{
        evaluate, CloseError, Collector, LimiterBuilder, LimiterConfig, Message, OverflowPolicy,
        RateLimiter, Report, SendError, SharedRateLimiter, StartError,
    };
}

/// Fluent builder for a [`RateLimiter`].
///
/// # Example
///
/// ```rust
/// use sluice::{LimiterBuilder, OverflowPolicy};
///
/// let limiter = LimiterBuilder::new()
///     .rate_per_minute(120.0)
///     .policy(OverflowPolicy::Reject)
///     .build();
/// assert!(limiter.config().rejects_on_exceed());
///
/// // try_build() validates up front instead of at start()
/// let result = LimiterBuilder::new().rate_per_minute(0.0).try_build();
/// assert!(result.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct LimiterBuilder {
    config: LimiterConfig,
}

impl LimiterBuilder {
    /// Creates a builder with the default configuration: 100 messages per
    /// minute per sender, delaying over-limit messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sustained per-sender rate, in messages per minute.
    pub fn rate_per_minute(mut self, rate: f64) -> Self {
        self.config.rate_per_minute = rate;
        self
    }

    /// Sets the sustained per-sender rate, in messages per second.
    pub fn rate_per_second(mut self, rate: f64) -> Self {
        self.config.rate_per_minute = rate * 60.0;
        self
    }

    /// Sets the overflow policy.
    pub fn policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.policy = policy;
        self
    }

    /// Shorthand for choosing between rejecting and delaying.
    pub fn reject(mut self, reject_on_exceed: bool) -> Self {
        self.config = self.config.with_reject(reject_on_exceed);
        self
    }

    /// Builds the limiter. The configuration is validated by
    /// [`RateLimiter::start`].
    pub fn build(self) -> RateLimiter {
        RateLimiter::new(self.config)
    }

    /// Builds the limiter, validating the configuration first.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] `start` would otherwise report.
    pub fn try_build(self) -> Result<RateLimiter, ConfigError> {
        self.config.validate()?;
        Ok(RateLimiter::new(self.config))
    }
}
