//! # Limiter Configuration
//!
//! Settings for the admission limiter. The same configuration applies to every
//! sender: each sender gets its own bucket, but all buckets share one rate and
//! one overflow policy.
//!
//! ## Key Concepts
//!
//! ```text
//!     Per-sender bucket:
//!
//!     ┌──────────────────────────────┐
//!     │   Capacity = rate/minute     │ ← Burst limit
//!     │   ┌─────────────────────┐    │
//!     │   │ ● ● ● ● ● ● ● ●     │    │ ← Credits (fractional)
//!     │   └─────────────────────┘    │
//!     │                              │
//!     │   Refill: continuous         │ ← rate/minute, no ticks
//!     └──────────────────────────────┘
//!
//!     Bucket empty?
//!        │
//!     Delay  ──► wait until one full credit has accrued, then admit
//!        │
//!     Reject ──► fail the send immediately
//! ```

use super::error::ConfigError;

/// Default rate when none is configured (messages per minute, per sender).
pub const DEFAULT_RATE_PER_MINUTE: f64 = 100.0;

/// What happens to a message whose sender has no credit left.
///
/// The policy is fleet-wide: it is fixed at configuration time and applies
/// to every sender and every message.
///
/// ## Example
///
/// ```rust
/// use sluice::{LimiterConfig, OverflowPolicy};
///
/// let strict = LimiterConfig::per_minute(60.0).with_policy(OverflowPolicy::Reject);
/// assert!(strict.rejects_on_exceed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Block the calling sender until enough credit has accrued, then admit.
    ///
    /// Only the sender that is over its limit waits; other senders are
    /// unaffected.
    #[default]
    Delay,

    /// Fail the send immediately with [`SendError::Rejected`](crate::SendError::Rejected).
    Reject,
}

/// Configuration for a [`RateLimiter`](crate::RateLimiter).
///
/// ## Examples
///
/// ```rust
/// use sluice::LimiterConfig;
///
/// // 120 messages per minute per sender, delaying over-limit messages
/// let config = LimiterConfig::per_minute(120.0);
/// assert_eq!(config.capacity(), 120.0);
///
/// // Same thing expressed per second
/// let config = LimiterConfig::per_second(2.0);
/// assert_eq!(config.rate_per_minute, 120.0);
///
/// // Reject instead of delay
/// let config = LimiterConfig::per_minute(60.0).with_reject(true);
/// assert!(config.rejects_on_exceed());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LimiterConfig {
    /// Sustained messages per minute each sender may push.
    ///
    /// Also the bucket capacity: a sender that has been idle for a minute
    /// can burst this many messages at once.
    pub rate_per_minute: f64,

    /// Behaviour once a sender has exhausted its credit.
    pub policy: OverflowPolicy,
}

impl Default for LimiterConfig {
    /// 100 messages per minute, delaying over-limit messages.
    fn default() -> Self {
        Self {
            rate_per_minute: DEFAULT_RATE_PER_MINUTE,
            policy: OverflowPolicy::default(),
        }
    }
}

impl LimiterConfig {
    /// Creates a configuration from the two knobs the harness exposes.
    pub fn new(rate_per_minute: f64, reject_on_exceed: bool) -> Self {
        Self::per_minute(rate_per_minute).with_reject(reject_on_exceed)
    }

    /// Delay-policy configuration limited to `rate` messages per minute.
    pub fn per_minute(rate: f64) -> Self {
        Self {
            rate_per_minute: rate,
            policy: OverflowPolicy::Delay,
        }
    }

    /// Delay-policy configuration limited to `rate` messages per second.
    ///
    /// Stored per minute; the bucket capacity is therefore a full minute's
    /// worth of messages.
    pub fn per_second(rate: f64) -> Self {
        Self::per_minute(rate * 60.0)
    }

    /// Sets the overflow policy.
    pub fn with_policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Switches between [`OverflowPolicy::Reject`] and [`OverflowPolicy::Delay`].
    pub fn with_reject(self, reject_on_exceed: bool) -> Self {
        self.with_policy(if reject_on_exceed {
            OverflowPolicy::Reject
        } else {
            OverflowPolicy::Delay
        })
    }

    /// Maximum credits a sender can hold.
    ///
    /// Equal to the per-minute rate, but never below one credit: a bucket
    /// that cannot hold a whole credit would never admit anything.
    #[inline]
    pub fn capacity(&self) -> f64 {
        self.rate_per_minute.max(1.0)
    }

    /// True when over-limit messages are rejected rather than delayed.
    #[inline]
    pub fn rejects_on_exceed(&self) -> bool {
        self.policy == OverflowPolicy::Reject
    }

    /// Checks the configuration. Called by
    /// [`RateLimiter::start`](crate::RateLimiter::start).
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NonFiniteRate`] for NaN or infinite rates
    /// - [`ConfigError::NonPositiveRate`] for zero or negative rates; a sender
    ///   limited to zero would either never be admitted or block forever
    ///
    /// ```rust
    /// use sluice::LimiterConfig;
    ///
    /// assert!(LimiterConfig::per_minute(0.0).validate().is_err());
    /// assert!(LimiterConfig::per_minute(f64::NAN).validate().is_err());
    /// assert!(LimiterConfig::per_minute(0.5).validate().is_ok());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.rate_per_minute.is_finite() {
            return Err(ConfigError::NonFiniteRate(self.rate_per_minute));
        }
        if self.rate_per_minute <= 0.0 {
            return Err(ConfigError::NonPositiveRate(self.rate_per_minute));
        }
        Ok(())
    }

    /// The configured rate expressed per second, for display.
    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_minute / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LimiterConfig::default();
        assert_eq!(config.rate_per_minute, DEFAULT_RATE_PER_MINUTE);
        assert_eq!(config.policy, OverflowPolicy::Delay);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(
            LimiterConfig::per_minute(0.0).validate(),
            Err(ConfigError::NonPositiveRate(0.0))
        );
        assert_eq!(
            LimiterConfig::per_minute(-5.0).validate(),
            Err(ConfigError::NonPositiveRate(-5.0))
        );
        assert!(matches!(
            LimiterConfig::per_minute(f64::INFINITY).validate(),
            Err(ConfigError::NonFiniteRate(_))
        ));
        assert!(matches!(
            LimiterConfig::per_minute(f64::NAN).validate(),
            Err(ConfigError::NonFiniteRate(_))
        ));
    }

    #[test]
    fn test_config_builders() {
        let config = LimiterConfig::per_second(3.0);
        assert_eq!(config.rate_per_minute, 180.0);
        assert_eq!(config.capacity(), 180.0);
        assert_eq!(config.rate_per_second(), 3.0);

        let config = LimiterConfig::new(60.0, true);
        assert!(config.rejects_on_exceed());
        assert_eq!(config.with_reject(false).policy, OverflowPolicy::Delay);
    }

    #[test]
    fn test_fractional_rate_is_valid() {
        let config = LimiterConfig::per_minute(0.25);
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity(), 1.0);
    }
}
