//! Per-namespace limits with a background cleanup thread.

use durable_rater::{FileRateLimiterConfig, LimiterRegistry};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() -> durable_rater::Result<()> {
    let state_dir = std::env::temp_dir().join("durable-rater-namespaces");
    let registry = Arc::new(LimiterRegistry::with_cleanup_settings(
        &state_dir,
        FileRateLimiterConfig::per_second(10),
        Duration::from_millis(500),
        Duration::from_secs(2),
    ));

    let (handle, stop_tx) = registry
        .clone()
        .start_stoppable_cleanup_thread()
        .map_err(|e| durable_rater::Error::Io {
            path: state_dir.clone(),
            source: e,
        })?;

    for namespace in ["openai", "anthropic", "local-model"] {
        for i in 1..=22 {
            if registry.try_acquire(namespace) {
                println!("{} - Request {} allowed", namespace, i);
            } else {
                println!("{} - Request {} BLOCKED", namespace, i);
            }
        }
        println!();
    }

    match registry.get_limiter("../outside") {
        Ok(_) => println!("unexpectedly accepted a traversal namespace"),
        Err(err) => println!("Rejected namespace: {}\n", err),
    }

    println!("{}", registry.stats().summary());

    println!("\nWaiting for idle state files to age out...");
    thread::sleep(Duration::from_secs(3));
    println!("{}", registry.stats());

    let _ = stop_tx.send(());
    let _ = handle.join();
    Ok(())
}
