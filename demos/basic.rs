//! Basic usage example for the sluice crate.

use sluice::{Collector, LimiterConfig, Message, RateLimiter, RecvError, SendError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    println!("=== Basic Limiter Example ===\n");

    // Example 1: Start, send, collect, evaluate
    pipeline_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Reject policy
    reject_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Delay policy
    delay_example();

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Polling the output with a timeout
    polling_example();
}

fn pipeline_example() {
    println!("1. Full Pipeline:");

    let limiter = Arc::new(RateLimiter::new(LimiterConfig::per_minute(120.0)));
    limiter.start().unwrap();
    let mut collector = Collector::new(limiter.take_output().unwrap());
    let consumer = thread::spawn(move || {
        collector.run();
        collector
    });

    let handles: Vec<_> = ["alice", "bob", "carol"]
        .into_iter()
        .map(|name| {
            let limiter = limiter.clone();
            thread::spawn(move || {
                for i in 0..20 {
                    limiter
                        .send(Message::new(i, name, format!("hello #{}", i)))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    limiter.close().unwrap();
    let report = consumer.join().unwrap().evaluate(20, 3);

    println!("{}", report);
    println!("   Lossless: {}", report.is_lossless());
}

fn reject_example() {
    println!("2. Reject Policy (5 msgs/min):");

    let limiter = RateLimiter::new(LimiterConfig::per_minute(5.0).with_reject(true));
    limiter.start().unwrap();
    let _output = limiter.take_output().unwrap();

    for i in 0..8 {
        match limiter.send(Message::new(i, "alice", "burst")) {
            Ok(()) => println!("   Message {} - ✅ Admitted", i),
            Err(SendError::Rejected) => println!("   Message {} - ❌ Rejected", i),
            Err(e) => println!("   Message {} - {}", i, e),
        }
    }

    // Other senders are not affected
    let bob = limiter.send(Message::new(0, "bob", "hi"));
    println!("   bob's first message: {:?}", bob);

    limiter.close().unwrap();
    println!("\n{}", limiter.metrics());
}

fn delay_example() {
    println!("3. Delay Policy (60 msgs/min):");

    let limiter = RateLimiter::new(LimiterConfig::per_minute(60.0));
    limiter.start().unwrap();
    let output = limiter.take_output().unwrap();

    for i in 0..60 {
        limiter.send(Message::new(i, "alice", "burst")).unwrap();
    }
    println!("   Burst of 60 admitted immediately");

    let start = Instant::now();
    limiter.send(Message::new(60, "alice", "one more")).unwrap();
    println!("   61st message waited {:?} for credit", start.elapsed());

    limiter.close().unwrap();
    println!("   Delivered: {}", output.count());
}

fn polling_example() {
    println!("4. Polling the Output:");

    let limiter = RateLimiter::new(LimiterConfig::default());
    limiter.start().unwrap();
    let output = limiter.take_output().unwrap();

    limiter.send(Message::new(0, "alice", "ping")).unwrap();
    limiter.close().unwrap();

    loop {
        match output.recv_timeout(Duration::from_millis(50)) {
            Ok(msg) => println!("   Received {} from {}", msg, msg.sender()),
            Err(RecvError::Timeout) => println!("   Nothing yet"),
            Err(RecvError::Ended) => {
                println!("   Stream ended");
                break;
            }
        }
    }
}
