//! Counters for monitoring the limiter while it runs.
//!
//! ```text
//!     Limiter Metrics:
//!     ┌─────────────────────────────────────┐
//!     │  Admitted: 940  (delayed: 40)       │
//!     │  Rejected: 60                       │
//!     │  ▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓▓░  94% success   │
//!     │  Max Delay: 1.002s                  │
//!     └─────────────────────────────────────┘
//! ```

use super::core::LifecycleState;
use std::fmt;
use std::time::Duration;

/// Snapshot of limiter-wide counters.
///
/// Every `send` ends up in exactly one of `total_admitted`, `total_rejected`,
/// `total_closed` or `total_not_started`; `total_delayed` is the subset of
/// admitted sends that had to wait for credit.
///
/// ```rust
/// use sluice::{LimiterConfig, Message, RateLimiter};
///
/// let limiter = RateLimiter::new(LimiterConfig::per_minute(60.0));
/// limiter.start().unwrap();
/// limiter.send(Message::new(0, "alice", "hi")).unwrap();
///
/// let metrics = limiter.metrics();
/// assert_eq!(metrics.total_admitted, 1);
/// assert_eq!(metrics.senders, 1);
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone)]
pub struct LimiterMetrics {
    /// Messages pushed onto the output stream.
    pub total_admitted: u64,

    /// Admitted messages that waited for credit first.
    pub total_delayed: u64,

    /// Sends refused because the sender was over its limit.
    pub total_rejected: u64,

    /// Sends refused because the limiter was closed or closing.
    pub total_closed: u64,

    /// Sends attempted before `start`.
    pub total_not_started: u64,

    /// Longest wait any admitted message spent in the delay path.
    pub max_delay: Duration,

    /// Distinct senders seen so far.
    pub senders: usize,

    /// Lifecycle state at the time of the snapshot.
    pub state: LifecycleState,
}

impl LimiterMetrics {
    /// All send attempts, whatever their outcome.
    #[inline]
    pub fn total_sends(&self) -> u64 {
        self.total_admitted + self.total_rejected + self.total_closed + self.total_not_started
    }

    /// Fraction of sends that were admitted; 1.0 before any traffic.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_sends();
        if total == 0 {
            1.0
        } else {
            self.total_admitted as f64 / total as f64
        }
    }

    /// Fraction of sends rejected for being over the limit.
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_sends();
        if total == 0 {
            0.0
        } else {
            self.total_rejected as f64 / total as f64
        }
    }

    /// Fraction of admitted messages that had to wait.
    pub fn delay_rate(&self) -> f64 {
        if self.total_admitted == 0 {
            0.0
        } else {
            self.total_delayed as f64 / self.total_admitted as f64
        }
    }

    /// Multi-line report suitable for logs.
    ///
    /// ```text
    /// Limiter Metrics (Running):
    /// ├─ Outcomes:
    /// │  ├─ Admitted: 940 (delayed: 40)
    /// │  ├─ Rejected: 60
    /// │  └─ Closed: 0
    /// ├─ Rates:
    /// │  ├─ Success Rate: 94.00%
    /// │  └─ Rejection Rate: 6.00%
    /// └─ Senders: 5 (max delay: 1.002s)
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "Limiter Metrics ({:?}):\n\
             ├─ Outcomes:\n\
             │  ├─ Admitted: {} (delayed: {})\n\
             │  ├─ Rejected: {}\n\
             │  └─ Closed: {}\n\
             ├─ Rates:\n\
             │  ├─ Success Rate: {:.2}%\n\
             │  └─ Rejection Rate: {:.2}%\n\
             └─ Senders: {} (max delay: {:.3}s)",
            self.state,
            self.total_admitted,
            self.total_delayed,
            self.total_rejected,
            self.total_closed,
            self.success_rate() * 100.0,
            self.rejection_rate() * 100.0,
            self.senders,
            self.max_delay.as_secs_f64(),
        )
    }
}

impl fmt::Display for LimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Snapshot of one sender's bucket and counters.
#[derive(Debug, Clone, PartialEq)]
pub struct SenderMetrics {
    /// Sender identifier.
    pub sender: String,
    /// Messages admitted for this sender.
    pub admitted: u64,
    /// Admitted messages that waited for credit.
    pub delayed: u64,
    /// Sends rejected for being over the limit.
    pub rejected: u64,
    /// Sends refused because the limiter closed.
    pub closed: u64,
    /// Credit balance as of the sender's last refill.
    pub credits: f64,
    /// Bucket capacity.
    pub capacity: f64,
    /// Calls waiting behind the one currently being served.
    pub queued: u64,
    /// Longest delay this sender's messages saw.
    pub max_delay: Duration,
}

impl SenderMetrics {
    /// Fraction of this sender's attempts that were admitted.
    pub fn success_rate(&self) -> f64 {
        let total = self.admitted + self.rejected + self.closed;
        if total == 0 {
            1.0
        } else {
            self.admitted as f64 / total as f64
        }
    }
}

impl fmt::Display for SenderMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: admitted {} (delayed {}), rejected {}, credits {:.2}/{:.0}",
            self.sender, self.admitted, self.delayed, self.rejected, self.credits, self.capacity
        )
    }
}
