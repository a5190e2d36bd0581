//! Error types returned by the limiter.
//!
//! Every operation has its own error enum so callers can match exhaustively
//! on what that operation can actually produce. Rejection under load is a
//! normal outcome and lives in [`SendError`], well apart from configuration
//! problems in [`StartError`].

use thiserror::Error;

/// Invalid [`LimiterConfig`](crate::LimiterConfig) values.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    /// The rate must be strictly positive.
    #[error("rate_per_minute must be positive, got {0}")]
    NonPositiveRate(f64),

    /// The rate must be a finite number.
    #[error("rate_per_minute must be finite, got {0}")]
    NonFiniteRate(f64),
}

/// Failure to start the limiter. Fatal for the run; never retried internally.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum StartError {
    /// The configuration failed validation.
    #[error("invalid limiter configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// `start` was already called on this limiter.
    #[error("limiter already started")]
    AlreadyStarted,

    /// The limiter was closed; a closed limiter cannot be restarted.
    #[error("limiter already closed")]
    AlreadyClosed,
}

/// Outcome of a [`send`](crate::RateLimiter::send) that did not admit the message.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SendError {
    /// The sender is over its limit and the limiter rejects on exceed.
    ///
    /// Recoverable: the caller decides whether to drop the message or retry
    /// later.
    #[error("too many messages")]
    Rejected,

    /// The limiter is closed or closing. Callers should stop sending.
    #[error("limiter closed")]
    Closed,

    /// `send` was called before `start`.
    #[error("limiter not started")]
    NotStarted,
}

impl SendError {
    /// True for the errors a caller may retry after a while.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected)
    }
}

/// Misuse of [`close`](crate::RateLimiter::close).
///
/// Both variants are benign: nothing was torn down twice and nothing panicked.
/// They exist so shutdown code can tell the cases apart if it cares.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CloseError {
    /// The limiter was already closed; the output stream was terminated by
    /// the earlier call.
    #[error("limiter already closed")]
    AlreadyClosed,

    /// The limiter was never started, so there is nothing to close.
    #[error("limiter not started")]
    NotStarted,
}

impl CloseError {
    /// Always true; kept as a method so shutdown paths read clearly.
    pub fn is_benign(&self) -> bool {
        true
    }
}

/// Why [`MessageStream::recv_timeout`](crate::MessageStream::recv_timeout)
/// returned without a message.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RecvError {
    /// Nothing arrived before the timeout; the stream is still open.
    #[error("timed out waiting for a message")]
    Timeout,

    /// The limiter closed and every admitted message has been drained.
    #[error("output stream ended")]
    Ended,
}

impl RecvError {
    /// True once no further message can ever arrive.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::Ended)
    }
}
