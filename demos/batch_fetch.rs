//! Batch Fetch Demo
//!
//! Fetches the same endpoint twenty times with a different query parameter,
//! at most 5 requests per second and 3 at a time, and prints the results in
//! request order together with the batch statistics.
//!
//! Usage:
//!   cargo run --example batch_fetch
//!   RATEHTTP_DEMO_URL=http://localhost:8080/echo cargo run --example batch_fetch

use ratehttp::progress::TracingProgress;
use ratehttp::{HttpRequest, RateHttp, SchedulerConfig};
use std::sync::Arc;

#[tokio::main]
async fn main() -> ratehttp::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== ratehttp Batch Fetch Demo ===\n");

    let url = std::env::var("RATEHTTP_DEMO_URL").unwrap_or_else(|_| "https://httpbin.org/get".to_string());
    let config = SchedulerConfig::new()
        .with_rate(5.0)
        .with_connections(3)
        .with_retries(2);

    println!("Configuration:");
    println!("  - Rate: 5 requests/second");
    println!("  - Connections: 3");
    println!("  - Retry delay: {:?}\n", config.retry_delay());

    let requests: Vec<HttpRequest> = (0..20)
        .map(|id| HttpRequest::get(url.as_str()).with_param("id", id))
        .collect();

    let scheduler = RateHttp::new(config)?.with_progress(Arc::new(TracingProgress::new().with_step_percent(25)));
    let (results, stats) = scheduler
        .execute_with_stats(requests, |session, request| async move {
            // Encode failures as values so one bad response does not abort the batch.
            let line = match session.perform(&request).await {
                Ok(resp) => format!("{} -> HTTP {} ({} bytes)", request.url, resp.status, resp.body.len()),
                Err(e) => format!("{} -> failed: {}", request.url, e),
            };
            Ok::<_, ratehttp::Error>(line)
        })
        .await?;

    for (i, line) in results.iter().enumerate() {
        println!("[{:>2}] {}", i, line);
    }

    println!("\nBatch {}:", stats.batch_id);
    println!("  - Completed: {}/{}", stats.completed, stats.requests);
    println!("  - Attempts: {} ({} retries)", stats.attempts, stats.retries);
    println!("  - Peak in flight: {}", stats.peak_inflight);
    println!("  - Elapsed: {:?} ({:.2} req/s)", stats.elapsed, stats.throughput());

    Ok(())
}
