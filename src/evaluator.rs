//! # Evaluator
//!
//! Reduces collected records to per-sender statistics and checks them
//! against the traffic that was supposed to be sent.
//!
//! ```text
//!     records ──► group by sender ──► per sender:
//!                                     ├─ count
//!                                     ├─ min / max / average latency
//!                                     ├─ missing ids, loss count
//!                                     ├─ duplicate deliveries
//!                                     └─ out-of-order arrivals
//! ```
//!
//! Evaluation is a pure function of its inputs: no clocks, no I/O, no locks.

use crate::Message;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Most missing ids listed per sender; `loss_count` still counts them all.
pub const MAX_LISTED_MISSING: usize = 1000;

/// Statistics for one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderStats {
    /// Sender identifier.
    pub sender: String,
    /// Messages received from this sender.
    pub count: usize,
    /// Shortest send-to-receive latency.
    pub min: Duration,
    /// Longest send-to-receive latency.
    pub max: Duration,
    /// Mean latency over received messages.
    pub average: Duration,
    /// Sum of all latencies.
    pub total: Duration,
    /// Ids in `0..expected` that never arrived, ascending, at most
    /// [`MAX_LISTED_MISSING`] of them.
    pub missing: Vec<u64>,
    /// Expected ids that never arrived.
    pub loss_count: usize,
    /// Arrivals repeating an id already received.
    pub duplicates: usize,
    /// Arrivals whose id was lower than the id received just before them.
    pub out_of_order: usize,
}

impl SenderStats {
    fn from_group(sender: &str, group: &[&Message], expected: usize) -> Self {
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;
        let mut total = Duration::ZERO;
        let mut timed: u32 = 0;
        let mut out_of_order = 0;
        let mut previous: Option<u64> = None;
        let mut seen = BTreeSet::new();

        for msg in group {
            if let Some(latency) = msg.latency() {
                min = min.min(latency);
                max = max.max(latency);
                total = total.saturating_add(latency);
                timed = timed.saturating_add(1);
            }
            if previous.is_some_and(|prev| msg.id() < prev) {
                out_of_order += 1;
            }
            previous = Some(msg.id());
            seen.insert(msg.id());
        }

        let (min, average) = if timed == 0 {
            (Duration::ZERO, Duration::ZERO)
        } else {
            (min, total / timed)
        };

        let expected_ids = expected as u64;
        let received_expected = seen.range(..expected_ids).count();
        let missing = (0..expected_ids)
            .filter(|id| !seen.contains(id))
            .take(MAX_LISTED_MISSING)
            .collect();

        Self {
            sender: sender.to_string(),
            count: group.len(),
            min,
            max,
            average,
            total,
            missing,
            loss_count: expected.saturating_sub(received_expected),
            duplicates: group.len() - seen.len(),
            out_of_order,
        }
    }

    /// True if every expected message arrived once, in order.
    pub fn is_complete(&self) -> bool {
        self.loss_count == 0 && self.duplicates == 0 && self.out_of_order == 0
    }
}

impl fmt::Display for SenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} received, latency min {:?} / avg {:?} / max {:?}, lost {}",
            self.sender, self.count, self.min, self.average, self.max, self.loss_count
        )
    }
}

/// Outcome of evaluating a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// One entry per sender that delivered anything, sorted by sender.
    pub senders: Vec<SenderStats>,
    /// Messages that were supposed to be sent.
    pub total_sent: usize,
    /// Messages actually received.
    pub total_received: usize,
    /// Senders that were expected but delivered nothing.
    pub missing_senders: usize,
}

impl Report {
    /// Statistics for one sender, if it delivered anything.
    pub fn sender(&self, sender: &str) -> Option<&SenderStats> {
        self.senders.iter().find(|stats| stats.sender == sender)
    }

    /// Total shortfall across senders that delivered something.
    pub fn total_lost(&self) -> usize {
        self.senders.iter().map(|stats| stats.loss_count).sum()
    }

    /// True if every expected sender delivered every expected message.
    pub fn is_lossless(&self) -> bool {
        self.missing_senders == 0 && self.senders.iter().all(|stats| stats.loss_count == 0)
    }

    /// One line per shortfall, duplicate or ordering problem; empty for a
    /// clean run.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.missing_senders > 0 {
            warnings.push(format!(
                "expected {} more sender(s) than delivered messages",
                self.missing_senders
            ));
        }
        for stats in &self.senders {
            if stats.loss_count > 0 {
                let more = stats.loss_count.saturating_sub(stats.missing.len());
                let suffix = if more > 0 {
                    format!(" (and {} more)", more)
                } else {
                    String::new()
                };
                warnings.push(format!(
                    "{}: {} message(s) lost, missing ids {:?}{}",
                    stats.sender, stats.loss_count, stats.missing, suffix
                ));
            }
            if stats.duplicates > 0 {
                warnings.push(format!(
                    "{}: {} message(s) delivered more than once",
                    stats.sender, stats.duplicates
                ));
            }
            if stats.out_of_order > 0 {
                warnings.push(format!(
                    "{}: {} message(s) arrived out of order",
                    stats.sender, stats.out_of_order
                ));
            }
        }
        warnings
    }

    /// Multi-line report suitable for logs.
    ///
    /// ```text
    /// Report:
    /// ├─ Sent: 300, Received: 300
    /// ├─ alice: 100 received, latency min 12µs / avg 40µs / max 2ms, lost 0
    /// ├─ bob: 100 received, latency min 9µs / avg 35µs / max 1ms, lost 0
    /// └─ carol: 100 received, latency min 10µs / avg 38µs / max 1ms, lost 0
    /// ```
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Report:\n{} Sent: {}, Received: {}",
            if self.senders.is_empty() { "└─" } else { "├─" },
            self.total_sent,
            self.total_received
        );
        let last = self.senders.len().saturating_sub(1);
        for (i, stats) in self.senders.iter().enumerate() {
            let branch = if i == last { "└─" } else { "├─" };
            out.push_str(&format!("\n{} {}", branch, stats));
        }
        out
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Groups `records` by sender and checks them against the expected traffic:
/// `expected_senders` senders each sending ids `0..expected_per_sender`.
///
/// # Example
///
/// ```rust
/// use sluice::{evaluate, Message};
///
/// let records = vec![Message::new(0, "alice", "a"), Message::new(1, "alice", "b")];
/// let report = evaluate(&records, 3, 1);
///
/// let alice = report.sender("alice").unwrap();
/// assert_eq!(alice.count, 2);
/// assert_eq!(alice.loss_count, 1);
/// assert_eq!(alice.missing, vec![2]);
/// assert!(!report.is_lossless());
/// ```
pub fn evaluate(
    records: &[Message],
    expected_per_sender: usize,
    expected_senders: usize,
) -> Report {
    let mut groups: BTreeMap<&str, Vec<&Message>> = BTreeMap::new();
    for msg in records {
        groups.entry(msg.sender()).or_default().push(msg);
    }

    let senders: Vec<SenderStats> = groups
        .iter()
        .map(|(sender, group)| SenderStats::from_group(sender, group, expected_per_sender))
        .collect();

    Report {
        missing_senders: expected_senders.saturating_sub(senders.len()),
        senders,
        total_sent: expected_senders.saturating_mul(expected_per_sender),
        total_received: records.len(),
    }
}
