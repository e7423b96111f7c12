//! Batch scheduler.

use super::stats::BatchStats;
use super::table::ResultTable;
use crate::config::SchedulerConfig;
use crate::progress::{noop_sink, ProgressEvent, ProgressSink};
use crate::session::RetryingSession;
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use futures::future::{self, Join, Ready};
use futures::stream::{FuturesUnordered, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs batches of requests under a rate cap, a concurrency cap and per-call
/// retries, returning results in input order.
///
/// The scheduler holds configuration only. Everything mutable (session,
/// result table, outstanding units, progress count) lives for one call.
pub struct RateHttp {
    config: SchedulerConfig,
    progress: Arc<dyn ProgressSink>,
}

impl RateHttp {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            progress: noop_sink(),
        })
    }

    /// Scheduler configured from `RATEHTTP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(SchedulerConfig::from_env()?)
    }

    /// Inject a progress sink. Default is a no-op sink.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Blocking entry point: runs the batch on its own current-thread runtime.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`execute_async`](Self::execute_async) there.
    pub fn execute<R, T, E, F, Fut>(
        &self,
        requests: Vec<R>,
        handler: F,
    ) -> std::result::Result<Vec<T>, E>
    where
        F: Fn(RetryingSession, R) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(E::from(Error::runtime_with_context(
                "blocking execute called from inside an async runtime",
                ErrorContext::new()
                    .with_details("use execute_async instead")
                    .with_source("scheduler"),
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| E::from(Error::Io(e)))?;
        runtime.block_on(self.execute_async(requests, handler))
    }

    /// Run `handler(session, request)` for every request and return the results
    /// in input order.
    ///
    /// The first failing unit of work aborts the batch: every other outstanding
    /// unit is cancelled and its error is returned. No partial results.
    pub async fn execute_async<R, T, E, F, Fut>(
        &self,
        requests: Vec<R>,
        handler: F,
    ) -> std::result::Result<Vec<T>, E>
    where
        F: Fn(RetryingSession, R) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        self.execute_with_stats(requests, handler)
            .await
            .map(|(results, _)| results)
    }

    /// Same as [`execute_async`](Self::execute_async), also returning batch statistics.
    pub async fn execute_with_stats<R, T, E, F, Fut>(
        &self,
        requests: Vec<R>,
        handler: F,
    ) -> std::result::Result<(Vec<T>, BatchStats), E>
    where
        F: Fn(RetryingSession, R) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        let batch_id = Uuid::new_v4().to_string();
        let total = requests.len();
        let mut stats = BatchStats::new(batch_id.clone(), total);

        if total == 0 {
            debug!(batch_id = %batch_id, "ratehttp empty batch");
            return Ok((Vec::new(), stats));
        }

        let transport = HttpTransport::new(&self.config).map_err(E::from)?;
        let session = RetryingSession::from_transport(&transport, self.config.retry_policy());
        let start = Instant::now();

        info!(
            batch_id = %batch_id,
            requests = total,
            connections = self.config.connections,
            rate = ?self.config.rate,
            retries = self.config.retries,
            "ratehttp batch started"
        );
        self.report(ProgressEvent::Started { total }).await;

        let mut table = ResultTable::new(total);
        let outcome = self
            .drive(&batch_id, requests, &handler, &session, &mut table, &mut stats)
            .await;

        stats.completed = table.filled();
        stats.record_session(session.stats());
        stats.elapsed = start.elapsed();

        if let Err(e) = outcome {
            warn!(
                batch_id = %batch_id,
                completed = stats.completed,
                requests = total,
                error = %e,
                "ratehttp batch aborted; outstanding requests cancelled"
            );
            self.report(ProgressEvent::Aborted {
                completed: stats.completed,
                total,
            })
            .await;
            return Err(e);
        }

        let results = table.into_ordered().map_err(E::from)?;

        info!(
            batch_id = %batch_id,
            requests = total,
            attempts = stats.attempts,
            retries = stats.retries,
            peak_inflight = stats.peak_inflight,
            duration_ms = stats.elapsed.as_millis() as u64,
            "ratehttp batch finished"
        );
        self.report(ProgressEvent::Finished {
            completed: stats.completed,
            total,
        })
        .await;

        Ok((results, stats))
    }

    /// Launch loop. Outstanding units are owned by `inflight`; returning early
    /// drops it, which cancels every unit still running.
    async fn drive<R, T, E, F, Fut>(
        &self,
        batch_id: &str,
        requests: Vec<R>,
        handler: &F,
        session: &RetryingSession,
        table: &mut ResultTable<T>,
        stats: &mut BatchStats,
    ) -> std::result::Result<(), E>
    where
        F: Fn(RetryingSession, R) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let cap = self.config.connections.max(1);
        let spacing = self.config.spacing();
        let mut inflight: FuturesUnordered<Join<Ready<usize>, Fut>> = FuturesUnordered::new();

        for (index, request) in requests.into_iter().enumerate() {
            while inflight.len() >= cap {
                match inflight.next().await {
                    Some(done) => self.settle(done, table).await?,
                    None => break,
                }
            }

            debug!(batch_id, index, inflight = inflight.len(), "ratehttp launching request");
            let unit = handler(session.clone(), request);
            inflight.push(future::join(future::ready(index), unit));
            stats.peak_inflight = stats.peak_inflight.max(inflight.len());

            if spacing.is_zero() {
                continue;
            }

            // Keep outstanding units moving while we wait out the spacing.
            let pause = tokio::time::sleep(spacing);
            tokio::pin!(pause);
            loop {
                tokio::select! {
                    _ = &mut pause => break,
                    Some(done) = inflight.next(), if !inflight.is_empty() => {
                        self.settle(done, table).await?;
                    }
                }
            }
        }

        while let Some(done) = inflight.next().await {
            self.settle(done, table).await?;
        }
        Ok(())
    }

    async fn settle<T, E>(
        &self,
        (index, outcome): (usize, std::result::Result<T, E>),
        table: &mut ResultTable<T>,
    ) -> std::result::Result<(), E>
    where
        E: From<Error>,
    {
        let value = outcome?;
        table.insert(index, value).map_err(E::from)?;
        self.report(ProgressEvent::Advanced {
            completed: table.filled(),
            total: table.len(),
        })
        .await;
        Ok(())
    }

    async fn report(&self, event: ProgressEvent) {
        if let Err(e) = self.progress.report(event).await {
            warn!(error = %e, "ratehttp progress sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryProgress;
    use std::time::Duration;

    fn scheduler(config: SchedulerConfig) -> RateHttp {
        RateHttp::new(config).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(RateHttp::new(SchedulerConfig::new().with_connections(0)).is_err());
        assert!(RateHttp::new(SchedulerConfig::new().with_rate(-2.0)).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_completion_is_reordered() {
        let rh = scheduler(SchedulerConfig::new().with_connections(4));
        let out: Result<Vec<usize>> = rh
            .execute_async(vec![0usize, 1, 2, 3], |_s, i| async move {
                tokio::time::sleep(Duration::from_millis(100 * (4 - i as u64))).await;
                Ok(i)
            })
            .await;
        assert_eq!(out.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_events() {
        let sink = InMemoryProgress::new();
        let rh = scheduler(SchedulerConfig::new()).with_progress(Arc::new(sink.clone()));
        let out: Result<Vec<u8>> = rh
            .execute_async(vec![1u8, 2, 3], |_s, v| async move { Ok(v) })
            .await;
        assert_eq!(out.unwrap(), vec![1, 2, 3]);

        let events = sink.events();
        assert_eq!(events.first(), Some(&ProgressEvent::Started { total: 3 }));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finished { completed: 3, total: 3 })
        );
        let advanced = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Advanced { .. }))
            .count();
        assert_eq!(advanced, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_reports_progress() {
        let sink = InMemoryProgress::new();
        let rh = scheduler(SchedulerConfig::new().with_connections(1))
            .with_progress(Arc::new(sink.clone()));
        let out: Result<Vec<u8>> = rh
            .execute_async(vec![1u8, 2, 3], |_s, v| async move {
                if v == 2 {
                    Err(Error::runtime("bad request"))
                } else {
                    Ok(v)
                }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(
            sink.events().last(),
            Some(&ProgressEvent::Aborted { completed: 1, total: 3 })
        );
    }

    #[tokio::test]
    async fn test_empty_batch_reports_nothing() {
        let sink = InMemoryProgress::new();
        let rh = scheduler(SchedulerConfig::new()).with_progress(Arc::new(sink.clone()));
        let (out, stats) = rh
            .execute_with_stats(Vec::<u8>::new(), |_s, v| async move { Ok::<_, Error>(v) })
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.attempts, 0);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_execute_refuses_inside_runtime() {
        let rh = scheduler(SchedulerConfig::new());
        let out: Result<Vec<u8>> = rh.execute(vec![1u8], |_s, v| async move { Ok(v) });
        assert!(matches!(out, Err(Error::Runtime { .. })));
    }
}
