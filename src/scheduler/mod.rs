//! 批量调度模块：限速、限并发、重试，并按输入顺序返回结果。
//!
//! Batch scheduler: rate cap, concurrency cap, retries, ordered results.
//!
//! # Batch Scheduler
//!
//! [`RateHttp`] takes a list of request descriptors and a handler and runs
//! `handler(session, request)` for each one:
//!
//! - launches happen in input order, at least `1 / rate` seconds apart;
//! - at most `connections` units of work are outstanding at any time;
//! - every unit shares one [`RetryingSession`](crate::session::RetryingSession)
//!   whose retry delay is derived from the rate and connection count;
//! - results are stored by index and returned in input order, whatever
//!   order the units complete in;
//! - the first unit that fails aborts the batch and cancels the others.
//!
//! All units run cooperatively on the calling task. Concurrency overlaps I/O
//! latency only; no handler runs in parallel with another.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ratehttp::{HttpRequest, RateHttp, SchedulerConfig};
//!
//! fn main() -> ratehttp::Result<()> {
//!     let scheduler = RateHttp::new(SchedulerConfig::new().with_rate(10.0).with_connections(4))?;
//!     let requests: Vec<HttpRequest> = (1..=20)
//!         .map(|id| HttpRequest::get(format!("https://example.com/items/{}", id)))
//!         .collect();
//!
//!     let bodies = scheduler.execute(requests, |session, request| async move {
//!         let resp = session.perform(&request).await?;
//!         Ok::<_, ratehttp::Error>(resp.text())
//!     })?;
//!     assert_eq!(bodies.len(), 20);
//!     Ok(())
//! }
//! ```

mod executor;
mod stats;
mod table;

pub use executor::RateHttp;
pub use stats::BatchStats;
pub use table::ResultTable;
