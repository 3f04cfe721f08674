//! Basic usage example for the durable-rater crate.
//!
//! Run it twice in quick succession: the second run starts with the bucket
//! the first one left behind.

use durable_rater::{
    request_key, CacheConfig, FileRateLimiter, FileRateLimiterConfig, ResponseCache,
};
use std::path::Path;
use std::thread;
use std::time::Duration;

fn main() -> durable_rater::Result<()> {
    println!("=== Basic Durable Rater Example ===\n");

    let base = std::env::temp_dir().join("durable-rater-demo");

    // Example 1: Simple rate limiter
    simple_example(&base)?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 2: Waiting for tokens
    refill_example(&base)?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 3: Caching responses
    cache_example(&base)?;

    println!("{}", "\n".to_owned() + "=".repeat(50).as_str() + "\n");

    // Example 4: Monitoring metrics
    metrics_example(&base)?;

    Ok(())
}

fn simple_example(base: &Path) -> durable_rater::Result<()> {
    println!("1. Simple Rate Limiter:");

    let limiter = FileRateLimiter::new(
        base.join("simple.ratelimit"),
        FileRateLimiterConfig::new(2.0, 10),
    )?;

    println!("   State file: {}", limiter.state_file().display());
    println!("   10 tokens, refilling 2 tokens/second");

    let mut successful = 0;
    let mut failed = 0;
    for i in 1..=15 {
        if limiter.try_acquire() {
            successful += 1;
            println!("   Request {} - ✅ Allowed", i);
        } else {
            failed += 1;
            println!("   Request {} - ❌ Rate limited", i);
        }
    }

    println!("   Results: {} successful, {} rate limited", successful, failed);
    Ok(())
}

fn refill_example(base: &Path) -> durable_rater::Result<()> {
    println!("2. Waiting for Refill:");

    let limiter = FileRateLimiter::new(
        base.join("refill.ratelimit"),
        FileRateLimiterConfig::per_second(5),
    )?;
    limiter.reset()?;

    println!("   Bucket reset, available: {:.2}", limiter.available_tokens());
    println!("   Next token in {:?}", limiter.time_until_available());

    for i in 1..=3 {
        if limiter.acquire(1, Duration::from_secs(2)) {
            println!("   Token {} acquired after waiting", i);
        }
    }

    thread::sleep(Duration::from_millis(500));
    println!("   After 500ms idle: {:.2} tokens", limiter.available_tokens());
    Ok(())
}

fn cache_example(base: &Path) -> durable_rater::Result<()> {
    println!("3. Response Cache:");

    let cache = ResponseCache::new(CacheConfig::new(base.join("cache")).with_expiration_hours(1))?;
    let key = request_key("What is the capital of France?", "demo-model", "");

    match cache.get_string(&key)? {
        Some(answer) => println!("   Cache hit: {}", answer),
        None => {
            println!("   Cache miss, storing a response");
            cache.put(&key, "Paris")?;
        }
    }

    if let Err(err) = cache.get("../../etc/passwd") {
        println!("   Rejected traversal key: {}", err);
    }

    println!("{}", cache.get_stats());
    Ok(())
}

fn metrics_example(base: &Path) -> durable_rater::Result<()> {
    println!("4. Monitoring and Metrics:");

    let limiter = FileRateLimiter::new(
        base.join("metrics.ratelimit"),
        FileRateLimiterConfig::new(1.0, 20),
    )?;
    for _ in 0..25 {
        limiter.try_acquire();
    }

    let metrics = limiter.metrics();
    println!("   - Total requests: {}", metrics.total_requests());
    println!("   - Success rate: {:.2}%", metrics.success_rate() * 100.0);
    println!("   - Rejection rate: {:.2}%", metrics.rejection_rate() * 100.0);
    println!(
        "   - Available tokens: {:.2}/{}",
        metrics.current_tokens, metrics.burst_size
    );

    let health = metrics.health_status();
    println!("   - Health status: {}", health);
    println!("   - Suggested action: {}", health.suggested_action());
    Ok(())
}
