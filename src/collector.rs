//! # Collector
//!
//! The single consumer of a limiter's output stream. It drains the stream
//! until it ends, stamps each message's receive time and keeps every message
//! in arrival order for later evaluation.
//!
//! ```text
//!     output stream ──► [stamp receive time] ──► records (append-only)
//!                                                    │
//!                                                    ▼
//!                                               evaluate()
//! ```

use crate::evaluator::{self, Report};
use crate::{Message, MessageStream};
use std::time::Instant;
use tracing::{debug, info, trace};

/// Drains a [`MessageStream`] into an ordered record set.
///
/// # Example
///
/// ```rust
/// use sluice::{Collector, LimiterConfig, Message, RateLimiter};
///
/// let limiter = RateLimiter::new(LimiterConfig::per_minute(60.0));
/// limiter.start().unwrap();
/// let mut collector = Collector::new(limiter.take_output().unwrap());
///
/// limiter.send(Message::new(0, "alice", "hello")).unwrap();
/// limiter.close().unwrap();
///
/// collector.run();
/// assert_eq!(collector.len(), 1);
/// assert!(collector.records()[0].receive_time().is_some());
/// ```
#[derive(Debug)]
pub struct Collector {
    stream: MessageStream,
    received: Vec<Message>,
}

impl Collector {
    /// Creates a collector over the limiter's output stream.
    pub fn new(stream: MessageStream) -> Self {
        Self {
            stream,
            received: Vec::new(),
        }
    }

    /// Blocks until the stream ends, recording every message.
    ///
    /// Returns the number of messages recorded by this call. Running again
    /// after the stream has ended records nothing.
    pub fn run(&mut self) -> usize {
        info!("Starting collector");
        let before = self.received.len();

        for mut msg in &mut self.stream {
            let now = Instant::now();
            msg.stamp_received(now);
            trace!(
                "Received {} from {} after {:?}",
                msg.id(),
                msg.sender(),
                now.saturating_duration_since(msg.send_time())
            );
            self.received.push(msg);
        }

        let collected = self.received.len() - before;
        debug!("Collector complete ({} messages)", collected);
        collected
    }

    /// Everything received so far, in arrival order.
    pub fn records(&self) -> &[Message] {
        &self.received
    }

    /// Consumes the collector, returning its records.
    pub fn into_records(self) -> Vec<Message> {
        self.received
    }

    /// Number of messages received.
    pub fn len(&self) -> usize {
        self.received.len()
    }

    /// True if nothing has been received.
    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }

    /// Evaluates the records against the expected traffic.
    pub fn evaluate(&self, expected_per_sender: usize, expected_senders: usize) -> Report {
        evaluator::evaluate(&self.received, expected_per_sender, expected_senders)
    }
}
