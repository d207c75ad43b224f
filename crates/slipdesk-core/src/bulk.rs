//! Bulk ingestion worker pool
//!
//! Each image runs the full pipeline on its own task. A semaphore bounds how
//! many run at once. The only shared state is the pair of completion and
//! failure counters plus the operator's pause/cancel control.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ALLOWED_CONCURRENCY;
use crate::error::{Error, Result};
use crate::pipeline::{IngestOutcome, Pipeline};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOptions {
    pub concurrency: usize,
    pub user_id: Option<String>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            user_id: None,
        }
    }
}

impl BulkOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if ALLOWED_CONCURRENCY.contains(&self.concurrency) {
            Ok(())
        } else {
            Err(Error::InvalidData(format!(
                "concurrency must be one of {:?}, got {}",
                ALLOWED_CONCURRENCY, self.concurrency
            )))
        }
    }
}

#[derive(Default)]
struct ControlState {
    paused: AtomicBool,
    cancelled: AtomicBool,
    changed: Notify,
}

/// Operator handle for a running bulk job
///
/// Pausing stops new items from being scheduled; uploads already in flight
/// finish normally. Cancelling marks every unscheduled item as skipped.
#[derive(Clone, Default)]
pub struct BulkControl {
    state: Arc<ControlState>,
}

impl BulkControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        self.state.changed.notify_waiters();
    }

    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
        self.state.changed.notify_waiters();
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.changed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Block while paused; false once cancelled
    pub async fn wait_while_paused(&self) -> bool {
        loop {
            let notified = self.state.changed.notified();
            tokio::pin!(notified);
            // Register before re-checking so a resume in between is not lost
            notified.as_mut().enable();

            if self.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }
            notified.await;
        }
    }
}

/// What happened to one image
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BulkItemState {
    Done { outcome: Box<IngestOutcome> },
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub index: usize,
    pub image_url: String,
    #[serde(flatten)]
    pub state: BulkItemState,
}

impl BulkItemResult {
    pub fn outcome(&self) -> Option<&IngestOutcome> {
        match &self.state {
            BulkItemState::Done { outcome } => Some(outcome),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// In submission order
    pub results: Vec<BulkItemResult>,
}

/// Bounded concurrent ingestion of many images
pub struct BulkIngest {
    pipeline: Pipeline,
    control: BulkControl,
    completed: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
}

impl BulkIngest {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            control: BulkControl::new(),
            completed: Arc::new(AtomicUsize::new(0)),
            failed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle for pausing or cancelling this job from elsewhere
    pub fn control(&self) -> BulkControl {
        self.control.clone()
    }

    /// (completed, failed) so far
    pub fn progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }

    pub async fn run(&self, urls: Vec<String>, options: &BulkOptions) -> Result<BulkReport> {
        options.validate()?;
        let total = urls.len();
        info!(total, concurrency = options.concurrency, "Starting bulk ingestion");

        let semaphore = Arc::new(Semaphore::new(options.concurrency));
        let mut handles = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        for (index, image_url) in urls.into_iter().enumerate() {
            if !self.control.wait_while_paused().await {
                skipped.push(BulkItemResult {
                    index,
                    image_url,
                    state: BulkItemState::Skipped,
                });
                continue;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::InvalidData(format!("worker pool closed: {}", e)))?;

            // Cancelled while waiting for a free worker
            if self.control.is_cancelled() {
                skipped.push(BulkItemResult {
                    index,
                    image_url,
                    state: BulkItemState::Skipped,
                });
                continue;
            }

            let pipeline = self.pipeline.clone();
            let completed = self.completed.clone();
            let failed = self.failed.clone();
            let user_id = options.user_id.clone();
            let url = image_url.clone();

            let handle = tokio::spawn(async move {
                let result = pipeline.process(&url, user_id.as_deref()).await;
                drop(permit);
                match result {
                    Ok(outcome) => {
                        completed.fetch_add(1, Ordering::SeqCst);
                        debug!(index, slip_id = outcome.slip_id, "Bulk item done");
                        BulkItemState::Done {
                            outcome: Box::new(outcome),
                        }
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        warn!(index, image_url = %url, error = %e, "Bulk item failed");
                        BulkItemState::Failed {
                            error: e.to_string(),
                        }
                    }
                }
            });
            handles.push((index, image_url, handle));
        }

        let mut results = skipped;
        for (index, image_url, handle) in handles {
            let state = match handle.await {
                Ok(state) => state,
                Err(e) => {
                    error!(index, error = %e, "Bulk worker task failed");
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    BulkItemState::Failed {
                        error: format!("worker task failed: {}", e),
                    }
                }
            };
            results.push(BulkItemResult {
                index,
                image_url,
                state,
            });
        }
        results.sort_by_key(|r| r.index);

        let (completed, failed) = self.progress();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.state, BulkItemState::Skipped))
            .count();
        info!(total, completed, failed, skipped, "Bulk ingestion finished");

        Ok(BulkReport {
            total,
            completed,
            failed,
            skipped,
            results,
        })
    }
}
