//! # Rate Limiter Module
//!
//! Internal implementation of the admission limiter, split by concern.
//!
//! ## Module Structure
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── config.rs       (Rate, policy and validation)
//!     ├── core.rs         (Lifecycle, admission loop, output stream)
//!     ├── error.rs        (Start / send / close / receive errors)
//!     ├── message.rs      (The message type)
//!     ├── metrics.rs      (Counters and summaries)
//!     ├── registry.rs     (Sharded map of sender states)
//!     ├── sender.rs       (Per-sender token bucket and FIFO turn)
//!     └── utils.rs        (Minute/Duration conversions)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Sender threads
//!          │ send(msg)
//!          ▼
//!     ┌──────────┐
//!     │   Core   │ ◄── Lifecycle + admission loop
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │ Registry │ ◄── Sender id → state (created lazily)
//!     └────┬─────┘
//!          │
//!          ▼
//!     ┌──────────┐
//!     │  Sender  │ ◄── Bucket, FIFO turn, timed wait
//!     └────┬─────┘
//!          │ admitted
//!          ▼
//!     Output stream ──► single consumer
//! ```

mod config;
mod core;
mod error;
mod message;
mod metrics;
mod registry;
mod sender;
mod utils;

/// Configuration types for the limiter
pub use config::{LimiterConfig, OverflowPolicy, DEFAULT_RATE_PER_MINUTE};

/// The limiter, its lifecycle and its output stream
pub use core::{LifecycleState, MessageStream, RateLimiter};

/// Errors returned by limiter operations
pub use error::{CloseError, ConfigError, RecvError, SendError, StartError};

/// The message type carried end to end
pub use message::Message;

/// Monitoring snapshots
pub use metrics::{LimiterMetrics, SenderMetrics};
