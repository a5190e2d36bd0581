//! # Core Limiter Implementation
//!
//! The limiter sits between many senders and one consumer. Every message goes
//! through its sender's token bucket; admitted messages are pushed onto a
//! single output stream.
//!
//! ## Admission
//!
//! ```text
//!     send(msg) flow:
//!
//!     Running? ──No──► Closed / NotStarted
//!        │
//!        ▼
//!     Sender bucket (created on first use)
//!        │
//!        ▼
//!     Wait for this sender's turn (FIFO per sender)
//!        │
//!        ▼
//!     Refill ──► credit ≥ 1? ──Yes──► take credit ──► push ──► ✅ Ok
//!                    │
//!                    No
//!                    ├── Reject policy ──► ❌ Rejected
//!                    └── Delay policy  ──► timed wait ──► (loop)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!     NotStarted ──start()──► Running ──close()──► Closed
//! ```
//!
//! `close` flips the state, wakes every sender that is waiting (they fail
//! with `Closed`), then takes the write side of the outbox lock. Pushes hold
//! the read side, so the write lock is granted only once every in-flight push
//! has landed; the producer handle is then dropped, which ends the output
//! stream after the consumer drains what is already queued.
//!
//! ## Isolation
//!
//! A delayed sender waits on its own condition variable while holding no
//! shared lock. Other senders keep flowing.

use super::{
    config::LimiterConfig,
    error::{CloseError, RecvError, SendError, StartError},
    message::Message,
    metrics::{LimiterMetrics, SenderMetrics},
    registry::SenderRegistry,
    sender::{Bucket, SenderState},
};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const NOT_STARTED: u8 = 0;
const RUNNING: u8 = 1;
const CLOSED: u8 = 2;

/// Where a limiter is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, `start` not yet called.
    NotStarted,
    /// Admitting traffic.
    Running,
    /// No longer admitting; the output stream is (being) terminated.
    Closed,
}

impl LifecycleState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            NOT_STARTED => Self::NotStarted,
            RUNNING => Self::Running,
            _ => Self::Closed,
        }
    }
}

/// Per-sender token bucket limiter feeding a single output stream.
///
/// ## Thread Safety
///
/// `send` takes `&self` and may be called from any number of threads,
/// including several at once for the same sender. Share the limiter with
/// `Arc`.
///
/// ## Example
///
/// ```rust
/// use sluice::{LimiterConfig, Message, RateLimiter, SendError};
///
/// let limiter = RateLimiter::new(LimiterConfig::per_minute(2.0).with_reject(true));
/// limiter.start().unwrap();
/// let output = limiter.take_output().unwrap();
///
/// assert!(limiter.send(Message::new(0, "alice", "one")).is_ok());
/// assert!(limiter.send(Message::new(1, "alice", "two")).is_ok());
/// assert_eq!(limiter.send(Message::new(2, "alice", "three")), Err(SendError::Rejected));
///
/// // Other senders have their own budget
/// assert!(limiter.send(Message::new(0, "bob", "hi")).is_ok());
///
/// limiter.close().unwrap();
/// let delivered: Vec<_> = output.map(|m| m.to_string()).collect();
/// assert_eq!(delivered.len(), 3);
/// ```
pub struct RateLimiter {
    config: LimiterConfig,
    lifecycle: AtomicU8,
    senders: SenderRegistry,

    /// Producer side of the output stream; `None` before start and after close.
    outbox: RwLock<Option<mpsc::Sender<Message>>>,

    /// Consumer side, until someone takes it.
    output: Mutex<Option<mpsc::Receiver<Message>>>,

    total_admitted: AtomicU64,
    total_delayed: AtomicU64,
    total_rejected: AtomicU64,
    total_closed: AtomicU64,
    total_not_started: AtomicU64,
    max_delay_ns: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter. Nothing is validated or allocated until
    /// [`start`](Self::start).
    pub fn new(config: LimiterConfig) -> Self {
        let capacity = config.capacity();
        Self {
            config,
            lifecycle: AtomicU8::new(NOT_STARTED),
            senders: SenderRegistry::new(capacity),
            outbox: RwLock::new(None),
            output: Mutex::new(None),
            total_admitted: AtomicU64::new(0),
            total_delayed: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
            total_not_started: AtomicU64::new(0),
            max_delay_ns: AtomicU64::new(0),
        }
    }

    /// Validates the configuration, allocates the output stream and starts
    /// admitting. Does not block.
    ///
    /// # Errors
    ///
    /// - [`StartError::InvalidConfig`] if the rate is zero, negative or not finite
    /// - [`StartError::AlreadyStarted`] on a second call
    /// - [`StartError::AlreadyClosed`] after [`close`](Self::close)
    pub fn start(&self) -> Result<(), StartError> {
        self.config.validate()?;

        // Hold the outbox while flipping state so no sender can observe
        // Running before the channel exists
        let mut outbox = self.outbox.write();
        match self.lifecycle.compare_exchange(
            NOT_STARTED,
            RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(RUNNING) => return Err(StartError::AlreadyStarted),
            Err(_) => return Err(StartError::AlreadyClosed),
        }

        let (tx, rx) = mpsc::channel();
        *outbox = Some(tx);
        *self.output.lock() = Some(rx);

        info!(
            "Limiter started ({} msgs/min per sender, policy: {:?})",
            self.config.rate_per_minute, self.config.policy
        );
        Ok(())
    }

    /// Hands out the output stream. Returns `None` before `start` and on
    /// every call after the first, so there is only ever one consumer.
    pub fn take_output(&self) -> Option<MessageStream> {
        self.output.lock().take().map(|rx| MessageStream { rx })
    }

    /// Submits a message on behalf of its sender.
    ///
    /// Returns once the message is on the output stream, or with the reason
    /// it is not. Under the delay policy this may block the calling thread
    /// until the sender has earned a credit; other senders are not affected.
    ///
    /// # Errors
    ///
    /// - [`SendError::Rejected`] when over the limit under the reject policy
    /// - [`SendError::Closed`] when the limiter is closed, or closes while
    ///   this call is waiting
    /// - [`SendError::NotStarted`] before [`start`](Self::start)
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        match self.lifecycle.load(Ordering::Acquire) {
            RUNNING => {}
            NOT_STARTED => {
                self.total_not_started.fetch_add(1, Ordering::Relaxed);
                return Err(SendError::NotStarted);
            }
            _ => {
                self.total_closed.fetch_add(1, Ordering::Relaxed);
                return Err(SendError::Closed);
            }
        }

        let state = self.senders.get_or_insert(msg.sender());
        let mut bucket = state.lock();

        let ticket = bucket.issue_ticket();
        while !bucket.is_turn(ticket) {
            if self.is_closed() {
                // Every later ticket fails the same way, so the turn does not
                // need to be passed on
                return Err(self.refuse_closed(&mut bucket, &msg));
            }
            state.wait(&mut bucket);
        }

        let result = self.admit(&state, &mut bucket, msg);
        state.pass_turn(&mut bucket);
        result
    }

    /// Runs the admission loop for the call currently holding the sender's turn.
    fn admit(
        &self,
        state: &SenderState,
        bucket: &mut MutexGuard<'_, Bucket>,
        msg: Message,
    ) -> Result<(), SendError> {
        let rate = self.config.rate_per_minute;
        let mut waiting_since: Option<Instant> = None;

        loop {
            if self.is_closed() {
                return Err(self.refuse_closed(bucket, &msg));
            }

            let now = Instant::now();
            bucket.refill(now, rate);
            if bucket.try_take() {
                break;
            }

            if self.config.rejects_on_exceed() {
                bucket.on_rejected();
                self.total_rejected.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Rejected message {} from {} (credits: {:.3})",
                    msg.id(),
                    msg.sender(),
                    bucket.credits()
                );
                return Err(SendError::Rejected);
            }

            let wait = bucket.time_until_credit(rate);
            if waiting_since.is_none() {
                debug!(
                    "Delaying message {} from {} by {:?}",
                    msg.id(),
                    msg.sender(),
                    wait
                );
                waiting_since = Some(now);
            }
            state.wait_for(bucket, wait);
        }

        let delay = waiting_since.map(|since| since.elapsed());
        let (id, sender) = (msg.id(), state.sender());

        if !self.deliver(msg) {
            // Lost the race with close after taking the credit
            bucket.refund();
            bucket.on_closed();
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            debug!("Message {} from {} refused, limiter closed", id, sender);
            return Err(SendError::Closed);
        }

        bucket.on_admitted(delay);
        self.total_admitted.fetch_add(1, Ordering::Relaxed);
        if let Some(delay) = delay {
            self.total_delayed.fetch_add(1, Ordering::Relaxed);
            self.update_max_delay(delay);
        }
        Ok(())
    }

    /// Pushes onto the output stream. False if the stream is already closed.
    fn deliver(&self, msg: Message) -> bool {
        let outbox = self.outbox.read();
        match outbox.as_ref() {
            // The consumer may have gone away; the message is admitted either way
            Some(tx) => {
                if tx.send(msg).is_err() {
                    warn!("Output stream consumer dropped, message discarded");
                }
                true
            }
            None => false,
        }
    }

    fn refuse_closed(&self, bucket: &mut MutexGuard<'_, Bucket>, msg: &Message) -> SendError {
        bucket.on_closed();
        self.total_closed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Message {} from {} refused, limiter closed",
            msg.id(),
            msg.sender()
        );
        SendError::Closed
    }

    fn update_max_delay(&self, delay: Duration) {
        let delay_ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        self.max_delay_ns.fetch_max(delay_ns, Ordering::Relaxed);
    }

    /// Stops admitting, fails every waiting send with `Closed`, and ends the
    /// output stream once in-flight pushes have landed.
    ///
    /// # Errors
    ///
    /// Both errors are benign, see [`CloseError`]:
    /// - [`CloseError::AlreadyClosed`] on a second call
    /// - [`CloseError::NotStarted`] before `start`; the limiter stays startable
    pub fn close(&self) -> Result<(), CloseError> {
        match self.lifecycle.compare_exchange(
            RUNNING,
            CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(NOT_STARTED) => {
                warn!("Close called before start");
                return Err(CloseError::NotStarted);
            }
            Err(_) => {
                debug!("Close called on a closed limiter");
                return Err(CloseError::AlreadyClosed);
            }
        }

        let woken = self.senders.wake_all();

        // Granted once every push holding the read side has finished
        let producer = self.outbox.write().take();
        drop(producer);

        info!(
            "Limiter closed ({} senders, {} admitted)",
            woken,
            self.total_admitted.load(Ordering::Relaxed)
        );
        Ok(())
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_raw(self.lifecycle.load(Ordering::Acquire))
    }

    #[inline]
    fn is_closed(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == CLOSED
    }

    /// The configuration this limiter was created with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Limiter-wide counters.
    pub fn metrics(&self) -> LimiterMetrics {
        LimiterMetrics {
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_delayed: self.total_delayed.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
            total_not_started: self.total_not_started.load(Ordering::Relaxed),
            max_delay: Duration::from_nanos(self.max_delay_ns.load(Ordering::Relaxed)),
            senders: self.senders.len(),
            state: self.state(),
        }
    }

    /// Counters for one sender, if it has sent anything.
    pub fn sender_metrics(&self, sender: &str) -> Option<SenderMetrics> {
        self.senders.get(sender).map(|state| state.metrics())
    }

    /// Counters for every sender, sorted by sender id.
    pub fn all_sender_metrics(&self) -> Vec<SenderMetrics> {
        let mut metrics: Vec<SenderMetrics> = self
            .senders
            .states()
            .iter()
            .map(|state| state.metrics())
            .collect();
        metrics.sort_by(|a, b| a.sender.cmp(&b.sender));
        metrics
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rate_per_minute", &self.config.rate_per_minute)
            .field("policy", &self.config.policy)
            .field("state", &self.state())
            .field("senders", &self.senders.len())
            .finish()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if self.state() == LifecycleState::Running {
            debug!("Limiter dropped while running, closing output stream");
            let _ = self.close();
        }
    }
}

/// The limiter's output: admitted messages in admission order.
///
/// Iteration blocks until the next message arrives and ends once the limiter
/// is closed and everything admitted before the close has been drained.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Message>,
}

impl MessageStream {
    /// Waits up to `timeout` for the next message.
    ///
    /// # Errors
    ///
    /// - [`RecvError::Timeout`] if nothing arrived in time
    /// - [`RecvError::Ended`] once the limiter is closed and drained
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, RecvError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            mpsc::RecvTimeoutError::Timeout => RecvError::Timeout,
            mpsc::RecvTimeoutError::Disconnected => RecvError::Ended,
        })
    }

    /// Takes a message if one is ready, without blocking.
    pub fn try_next(&self) -> Option<Message> {
        self.rx.try_recv().ok()
    }
}

impl Iterator for MessageStream {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OverflowPolicy;
    use std::sync::Arc;
    use std::thread;

    fn started(config: LimiterConfig) -> (Arc<RateLimiter>, MessageStream) {
        let limiter = Arc::new(RateLimiter::new(config));
        limiter.start().unwrap();
        let output = limiter.take_output().unwrap();
        (limiter, output)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let limiter = RateLimiter::new(LimiterConfig::per_minute(10.0));
        assert_eq!(limiter.state(), LifecycleState::NotStarted);
        assert!(limiter.take_output().is_none());

        limiter.start().unwrap();
        assert_eq!(limiter.state(), LifecycleState::Running);
        assert_eq!(limiter.start(), Err(StartError::AlreadyStarted));

        limiter.close().unwrap();
        assert_eq!(limiter.state(), LifecycleState::Closed);
        assert_eq!(limiter.start(), Err(StartError::AlreadyClosed));
    }

    #[test]
    fn test_start_rejects_zero_rate() {
        let limiter = RateLimiter::new(LimiterConfig::per_minute(0.0));
        assert!(matches!(limiter.start(), Err(StartError::InvalidConfig(_))));
        assert_eq!(limiter.state(), LifecycleState::NotStarted);
    }

    #[test]
    fn test_send_before_start() {
        let limiter = RateLimiter::new(LimiterConfig::default());
        assert_eq!(
            limiter.send(Message::new(0, "alice", "early")),
            Err(SendError::NotStarted)
        );
        assert_eq!(limiter.metrics().total_not_started, 1);
    }

    #[test]
    fn test_close_before_start_is_benign() {
        let limiter = RateLimiter::new(LimiterConfig::default());
        assert_eq!(limiter.close(), Err(CloseError::NotStarted));

        // Still startable
        limiter.start().unwrap();
        limiter.close().unwrap();
    }

    #[test]
    fn test_double_close() {
        let (limiter, output) = started(LimiterConfig::per_minute(10.0));
        limiter.send(Message::new(0, "alice", "a")).unwrap();

        assert!(limiter.close().is_ok());
        assert_eq!(limiter.close(), Err(CloseError::AlreadyClosed));

        let drained: Vec<Message> = output.collect();
        assert_eq!(drained.len(), 1);
    }

    #[test]
    fn test_output_handed_out_once() {
        let (limiter, _output) = started(LimiterConfig::per_minute(10.0));
        assert!(limiter.take_output().is_none());
    }

    #[test]
    fn test_send_after_close() {
        let (limiter, _output) = started(LimiterConfig::per_minute(10.0));
        limiter.close().unwrap();
        assert_eq!(
            limiter.send(Message::new(0, "alice", "late")),
            Err(SendError::Closed)
        );
        assert_eq!(limiter.metrics().total_closed, 1);
    }

    #[test]
    fn test_reject_policy_burst() {
        let (limiter, output) =
            started(LimiterConfig::per_minute(5.0).with_policy(OverflowPolicy::Reject));

        let results: Vec<_> = (0..8)
            .map(|i| limiter.send(Message::new(i, "alice", "burst")))
            .collect();

        assert!(results[..5].iter().all(|r| r.is_ok()));
        assert!(results[5..].iter().all(|r| *r == Err(SendError::Rejected)));

        limiter.close().unwrap();
        assert_eq!(output.count(), 5);

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_admitted, 5);
        assert_eq!(metrics.total_rejected, 3);

        let alice = limiter.sender_metrics("alice").unwrap();
        assert_eq!(alice.rejected, 3);
        assert!(alice.credits < 1.0);
    }

    #[test]
    fn test_delay_policy_waits_for_credit() {
        // 600/min is one credit every 100ms
        let (limiter, output) = started(LimiterConfig::per_minute(600.0));
        for i in 0..600 {
            limiter.send(Message::new(i, "alice", "fill")).unwrap();
        }

        let start = Instant::now();
        limiter.send(Message::new(600, "alice", "late")).unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(50), "waited {:?}", waited);
        assert!(waited < Duration::from_millis(500), "waited {:?}", waited);

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_delayed, 1);
        assert!(metrics.max_delay >= Duration::from_millis(50));

        limiter.close().unwrap();
        assert_eq!(output.count(), 601);
    }

    #[test]
    fn test_close_wakes_delayed_sender() {
        // One credit per minute: the second send would wait a full minute
        let (limiter, output) = started(LimiterConfig::per_minute(1.0));
        limiter.send(Message::new(0, "alice", "first")).unwrap();

        let sender = {
            let limiter = limiter.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let result = limiter.send(Message::new(1, "alice", "second"));
                (result, start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(100));
        limiter.close().unwrap();

        let (result, waited) = sender.join().unwrap();
        assert_eq!(result, Err(SendError::Closed));
        assert!(waited < Duration::from_secs(5));

        let delivered: Vec<u64> = output.map(|m| m.id()).collect();
        assert_eq!(delivered, vec![0]);
    }

    #[test]
    fn test_close_wakes_queued_callers() {
        let (limiter, _output) = started(LimiterConfig::per_minute(1.0));
        limiter.send(Message::new(0, "alice", "first")).unwrap();

        let handles: Vec<_> = (1..4)
            .map(|i| {
                let limiter = limiter.clone();
                thread::spawn(move || limiter.send(Message::new(i, "alice", "queued")))
            })
            .collect();

        thread::sleep(Duration::from_millis(100));
        limiter.close().unwrap();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), Err(SendError::Closed));
        }
        assert_eq!(limiter.sender_metrics("alice").unwrap().closed, 3);
    }

    #[test]
    fn test_recv_timeout_and_end_of_stream() {
        let (limiter, output) = started(LimiterConfig::per_minute(10.0));
        assert_eq!(
            output.recv_timeout(Duration::from_millis(10)),
            Err(RecvError::Timeout)
        );
        assert!(output.try_next().is_none());

        limiter.send(Message::new(0, "alice", "a")).unwrap();
        let msg = output.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(msg.id(), 0);

        limiter.close().unwrap();
        assert_eq!(
            output.recv_timeout(Duration::from_millis(10)),
            Err(RecvError::Ended)
        );
    }

    #[test]
    fn test_credit_refunded_when_push_loses_race_with_close() {
        let (limiter, _output) = started(LimiterConfig::per_minute(3.0));
        limiter.send(Message::new(0, "alice", "first")).unwrap();

        // State as close leaves it between dropping the producer and a sender
        // that already passed the lifecycle check
        drop(limiter.outbox.write().take());
        assert_eq!(limiter.state(), LifecycleState::Running);

        assert_eq!(
            limiter.send(Message::new(1, "alice", "raced")),
            Err(SendError::Closed)
        );
        let alice = limiter.sender_metrics("alice").unwrap();
        assert!((alice.credits - 2.0).abs() < 0.01, "credits {}", alice.credits);
        assert_eq!(alice.admitted, 1);
        assert_eq!(alice.closed, 1);

        // The turn was passed on: the next call is not stuck behind it
        assert_eq!(
            limiter.send(Message::new(2, "alice", "after")),
            Err(SendError::Closed)
        );
        assert_eq!(limiter.metrics().total_admitted, 1);
        assert_eq!(limiter.metrics().total_closed, 2);
    }

    #[test]
    fn test_drop_while_running_ends_stream() {
        let (limiter, output) = started(LimiterConfig::per_minute(10.0));
        limiter.send(Message::new(0, "alice", "a")).unwrap();
        drop(limiter);
        assert_eq!(output.count(), 1);
    }

    #[test]
    fn test_all_sender_metrics_sorted() {
        let (limiter, _output) = started(LimiterConfig::per_minute(10.0));
        for name in ["carol", "alice", "bob"] {
            limiter.send(Message::new(0, name, "x")).unwrap();
        }
        let names: Vec<String> = limiter
            .all_sender_metrics()
            .into_iter()
            .map(|m| m.sender)
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_debug_impl() {
        let limiter = RateLimiter::new(LimiterConfig::per_minute(42.0));
        let debug_str = format!("{:?}", limiter);
        assert!(debug_str.contains("RateLimiter"));
        assert!(debug_str.contains("rate_per_minute: 42.0"));
        assert!(debug_str.contains("NotStarted"));
    }
}
