//! Load harness for the limiter.
//!
//! Spawns a number of simulated senders, each pushing messages at its own
//! pace through one shared limiter, drains the output with a collector and
//! reports per-sender latency and loss.
//!
//! # Usage
//!
//! ```bash
//! # 5 senders, 100 msgs/min limit, senders at 80..120 msgs/min
//! sluice --clients 5 --limit-rate 100 --send-rate 100 --variance 10 --messages 1000
//!
//! # Reject instead of delaying, with debug logging
//! sluice -r -d -m 200
//!
//! # RUST_LOG overrides --debug
//! RUST_LOG=sluice=trace sluice -m 50
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use sluice::{Collector, LimiterBuilder, Message, SendError, SharedRateLimiter};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "sluice",
    version,
    about = "Drive simulated senders through a per-sender rate limiter"
)]
struct Args {
    /// Number of clients
    #[arg(short = 'c', long, default_value_t = 5)]
    clients: usize,

    /// Rate limit of messages per minute per client
    #[arg(short = 'l', long, default_value_t = 100.0)]
    limit_rate: f64,

    /// Messages sent per minute per client
    #[arg(short = 's', long, default_value_t = 100)]
    send_rate: i64,

    /// Msg rate variance per client
    #[arg(short = 'v', long, default_value_t = 10)]
    variance: i64,

    /// Number of messages to send
    #[arg(short = 'm', long, default_value_t = 1000)]
    messages: u64,

    /// Reject messages rather than delay
    #[arg(short = 'r', long)]
    reject: bool,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,
}

/// Outcome counts for one simulated sender.
#[derive(Debug, Default)]
struct SenderOutcome {
    sent: u64,
    rejected: u64,
    closed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.debug);

    let limiter: SharedRateLimiter = Arc::new(
        LimiterBuilder::new()
            .rate_per_minute(args.limit_rate)
            .reject(args.reject)
            .try_build()
            .context("Invalid limiter configuration")?,
    );
    limiter.start().context("Failed to start limiter")?;

    let output = limiter
        .take_output()
        .context("Output stream already taken")?;
    let mut collector = Collector::new(output);
    let consumer = thread::Builder::new()
        .name("collector".to_string())
        .spawn(move || {
            collector.run();
            collector
        })
        .context("Failed to spawn collector")?;

    let started = Instant::now();
    let mut senders = Vec::with_capacity(args.clients);
    for seq in 0..args.clients {
        let name = format!("sender-{:02}", seq);
        let rate = calculate_rate(args.clients, seq, args.send_rate, args.variance);
        info!("Starting {} at {} msgs/min", name, rate);

        let limiter = limiter.clone();
        let messages = args.messages;
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_sender(&limiter, &name, rate, messages))
            .context("Failed to spawn sender")?;
        senders.push(handle);
    }

    let mut totals = SenderOutcome::default();
    for handle in senders {
        let outcome = handle
            .join()
            .map_err(|_| anyhow::anyhow!("sender thread panicked"))?;
        totals.sent += outcome.sent;
        totals.rejected += outcome.rejected;
        totals.closed += outcome.closed;
    }

    if let Err(e) = limiter.close() {
        warn!("Close: {}", e);
    }
    let collector = consumer
        .join()
        .map_err(|_| anyhow::anyhow!("collector thread panicked"))?;

    info!(
        "Run finished in {:.2?}: {} sent, {} rejected, {} refused after close",
        started.elapsed(),
        totals.sent,
        totals.rejected,
        totals.closed
    );

    let expected_per_sender =
        usize::try_from(args.messages).context("Message count too large")?;
    let report = collector.evaluate(expected_per_sender, args.clients);
    info!("\n{}", report);
    for warning in report.warnings() {
        warn!("{}", warning);
    }
    info!("\n{}", limiter.metrics());

    Ok(())
}

/// Sends `messages` messages, pacing them at `rate` per minute when positive.
fn run_sender(limiter: &SharedRateLimiter, name: &str, rate: i64, messages: u64) -> SenderOutcome {
    let pause = u32::try_from(rate)
        .ok()
        .filter(|r| *r > 0)
        .map(|r| Duration::from_secs(60) / r);

    let mut outcome = SenderOutcome::default();
    let mut next_tick = Instant::now();
    for id in 0..messages {
        let msg = Message::new(id, name, format!("message {} from {}", id, name));
        debug!("Sending {}", msg);
        match limiter.send(msg) {
            Ok(()) => outcome.sent += 1,
            Err(SendError::Rejected) => outcome.rejected += 1,
            Err(e) => {
                warn!("{} stopping: {}", name, e);
                outcome.closed += 1;
                break;
            }
        }

        if let Some(pause) = pause {
            next_tick += pause;
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            }
        }
    }
    debug!("{} complete", name);
    outcome
}

/// Spreads send rates around the target so some clients run over the limit
/// and some under it. With 5 clients, rate 100 and variance 10 this yields
/// 80, 90, 100, 110, 120.
fn calculate_rate(clients: usize, seq: usize, rate: i64, variance: i64) -> i64 {
    let middle = (clients / 2) as i64;
    (seq as i64 - middle) * variance + rate
}

fn setup_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}
