//! Backoff command implementation.

use isosync_engine::{backoff_schedule, RetryConfig};
use std::time::Duration;

/// Runs the backoff command: prints the retry delay for each attempt.
pub fn run(
    base_ms: u64,
    cap_ms: u64,
    attempts: u32,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if base_ms == 0 {
        return Err("base delay must be positive".into());
    }
    let config = RetryConfig::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
    let delays: Vec<u64> = backoff_schedule(&config, attempts)
        .iter()
        .map(|d| d.as_millis() as u64)
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string(&delays)?),
        _ => {
            println!("attempt  delay_ms");
            for (i, delay) in delays.iter().enumerate() {
                println!("{:>7}  {}", i + 1, delay);
            }
        }
    }
    Ok(())
}
