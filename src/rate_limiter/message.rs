//! The value that flows from senders, through the limiter, to the consumer.

use std::fmt;
use std::time::{Duration, Instant};

/// One message from one sender.
///
/// Everything but the receive time is fixed at construction. The receive time
/// is stamped exactly once, by the [`Collector`](crate::Collector), when the
/// message leaves the output stream.
///
/// ```rust
/// use sluice::Message;
///
/// let msg = Message::new(7, "alice", "hello");
/// assert_eq!(msg.id(), 7);
/// assert_eq!(msg.sender(), "alice");
/// assert!(msg.receive_time().is_none());
/// assert_eq!(msg.to_string(), "[7] hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: u64,
    sender: String,
    payload: String,
    send_time: Instant,
    receive_time: Option<Instant>,
}

impl Message {
    /// Creates a message stamped with the current time as its send time.
    pub fn new(id: u64, sender: impl Into<String>, payload: impl Into<String>) -> Self {
        Self::sent_at(id, sender, payload, Instant::now())
    }

    /// Creates a message with an explicit send time.
    pub fn sent_at(
        id: u64,
        sender: impl Into<String>,
        payload: impl Into<String>,
        send_time: Instant,
    ) -> Self {
        Self {
            id,
            sender: sender.into(),
            payload: payload.into(),
            send_time,
            receive_time: None,
        }
    }

    /// Per-sender sequence number.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifier of the sender that produced this message.
    #[inline]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Message body.
    #[inline]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// When the sender created the message.
    #[inline]
    pub fn send_time(&self) -> Instant {
        self.send_time
    }

    /// When the consumer took the message off the output stream.
    #[inline]
    pub fn receive_time(&self) -> Option<Instant> {
        self.receive_time
    }

    /// End-to-end latency, once received.
    pub fn latency(&self) -> Option<Duration> {
        self.receive_time
            .map(|received| received.saturating_duration_since(self.send_time))
    }

    /// Records delivery. Panics if the message was already stamped.
    pub(crate) fn stamp_received(&mut self, at: Instant) {
        assert!(
            self.receive_time.is_none(),
            "message {} from {} received twice",
            self.id,
            self.sender
        );
        self.receive_time = Some(at);
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_after_stamp() {
        let sent = Instant::now();
        let mut msg = Message::sent_at(1, "bob", "ping", sent);
        assert_eq!(msg.latency(), None);

        msg.stamp_received(sent + Duration::from_millis(250));
        assert_eq!(msg.latency(), Some(Duration::from_millis(250)));
    }

    #[test]
    #[should_panic(expected = "received twice")]
    fn test_double_stamp_panics() {
        let mut msg = Message::new(1, "bob", "ping");
        msg.stamp_received(Instant::now());
        msg.stamp_received(Instant::now());
    }
}
