//! # ratehttp
//!
//! 限速、限并发、带重试的批量 HTTP 执行器，结果顺序与输入一致。
//!
//! Rate-limited, concurrency-capped, retrying batch execution of HTTP requests
//! with results returned in input order.
//!
//! ## Overview
//!
//! A batch is a list of request descriptors plus a handler that turns one
//! descriptor and a shared session into a result. The scheduler decides when
//! each handler runs; the session makes each individual call resilient.
//!
//! - **Rate cap**: launches are spaced at least `1 / rate` seconds apart
//! - **Concurrency cap**: at most `connections` units of work in flight
//! - **Retries**: every call through the session is retried with a fixed
//!   (or configurable) delay, surfacing the last error
//! - **Ordering**: `results[i]` always belongs to `requests[i]`
//! - **Fail fast**: the first exhausted failure aborts the batch and cancels
//!   the units still running
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ratehttp::{HttpRequest, RateHttp, SchedulerConfig};
//!
//! #[tokio::main]
//! async fn main() -> ratehttp::Result<()> {
//!     let scheduler = RateHttp::new(SchedulerConfig::new().with_rate(5.0))?;
//!     let requests = vec![
//!         HttpRequest::get("https://example.com/a"),
//!         HttpRequest::get("https://example.com/b"),
//!     ];
//!     let statuses = scheduler
//!         .execute_async(requests, |session, request| async move {
//!             Ok::<_, ratehttp::Error>(session.perform(&request).await?.status)
//!         })
//!         .await?;
//!     println!("{:?}", statuses);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`scheduler`] | Batch scheduler and batch statistics |
//! | [`session`] | Retrying session, retry policy, request descriptors |
//! | [`config`] | Batch configuration and environment overrides |
//! | [`progress`] | Progress sinks |
//! | [`transport`] | Pooled HTTP client construction |

pub mod config;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod transport;

pub use config::SchedulerConfig;
pub use progress::{ProgressEvent, ProgressSink};
pub use scheduler::{BatchStats, RateHttp};
pub use session::{Backoff, HttpRequest, HttpResponse, RetryPolicy, RetryingSession};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
