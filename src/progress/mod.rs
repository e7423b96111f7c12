//! Progress reporting for batch execution.
//!
//! A [`ProgressSink`] is told the total up front and advanced once per
//! completed unit of work. Sinks are purely observational: their errors are
//! logged and otherwise ignored, and the scheduler never waits on them for
//! anything but the report call itself.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ProgressEvent`] | Started / advanced / finished / aborted |
//! | [`ProgressSink`] | Trait for progress destinations |
//! | [`NoopProgress`] | Default sink, reports nothing |
//! | [`TracingProgress`] | Logs progress through `tracing` |
//! | [`InMemoryProgress`] | Records events, for tests and embedding |

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { total: usize },
    Advanced { completed: usize, total: usize },
    Finished { completed: usize, total: usize },
    /// A unit of work failed and the rest of the batch was cancelled.
    Aborted { completed: usize, total: usize },
}

impl ProgressEvent {
    pub fn completed(&self) -> usize {
        match self {
            ProgressEvent::Started { .. } => 0,
            ProgressEvent::Advanced { completed, .. }
            | ProgressEvent::Finished { completed, .. }
            | ProgressEvent::Aborted { completed, .. } => *completed,
        }
    }

    pub fn total(&self) -> usize {
        match self {
            ProgressEvent::Started { total }
            | ProgressEvent::Advanced { total, .. }
            | ProgressEvent::Finished { total, .. }
            | ProgressEvent::Aborted { total, .. } => *total,
        }
    }
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, event: ProgressEvent) -> Result<()>;
}

/// Sink that drops every event.
pub struct NoopProgress;

#[async_trait]
impl ProgressSink for NoopProgress {
    async fn report(&self, _event: ProgressEvent) -> Result<()> {
        Ok(())
    }
}

pub fn noop_sink() -> Arc<dyn ProgressSink> {
    Arc::new(NoopProgress)
}

/// Logs progress at info level, at most once per `step` percent.
pub struct TracingProgress {
    step: usize,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self { step: 10 }
    }

    pub fn with_step_percent(mut self, step: usize) -> Self {
        self.step = step.clamp(1, 100);
        self
    }

    fn crosses_step(&self, completed: usize, total: usize) -> bool {
        if total == 0 {
            return false;
        }
        let pct = completed * 100 / total;
        let prev = completed.saturating_sub(1) * 100 / total;
        completed == 1 || pct / self.step != prev / self.step
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgressSink for TracingProgress {
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        match event {
            ProgressEvent::Started { total } => info!(total, "ratehttp batch started"),
            ProgressEvent::Advanced { completed, total } => {
                if self.crosses_step(completed, total) {
                    info!(completed, total, "ratehttp batch progress");
                }
            }
            ProgressEvent::Finished { completed, total } => {
                info!(completed, total, "ratehttp batch finished")
            }
            ProgressEvent::Aborted { completed, total } => {
                info!(completed, total, "ratehttp batch aborted")
            }
        }
        Ok(())
    }
}

/// Records every event in memory.
#[derive(Clone, Default)]
pub struct InMemoryProgress {
    events: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Completed count of the most recent event, 0 if none.
    pub fn completed(&self) -> usize {
        self.events().last().map(ProgressEvent::completed).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ProgressSink for InMemoryProgress {
    async fn report(&self, event: ProgressEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        Ok(())
    }
}
