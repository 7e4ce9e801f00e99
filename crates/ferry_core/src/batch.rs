//! Batch commit and throttle pacing for migration runs.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::store::ContentStore;

/// What happens to the store session at a batch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Persist pending changes. A failure aborts the run.
    Save,
    /// Drop cached session state. Used by read-only runs.
    Refresh,
}

/// Counts processed items and flushes the store session every `batch_size`
/// items, pausing for the throttle duration after each full batch.
///
/// Calling [`BatchController::finish`] flushes the remainder, so `N` items
/// with batch size `B` produce exactly `ceil(N / B)` flushes.
#[derive(Debug)]
pub struct BatchController {
    batch_size: usize,
    throttle: Option<Duration>,
    mode: FlushMode,
    cancel: Option<CancellationToken>,
    pending: usize,
    processed: usize,
    flushes: usize,
}

impl BatchController {
    pub fn new(batch_size: usize, throttle: Option<Duration>, mode: FlushMode) -> Self {
        Self {
            batch_size: batch_size.max(1),
            throttle: throttle.filter(|d| !d.is_zero()),
            mode,
            cancel: None,
            pending: 0,
            processed: 0,
            flushes: 0,
        }
    }

    /// Cut throttle pauses short when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Account for one processed item, flushing and throttling at a batch
    /// boundary.
    pub async fn item_done(&mut self, store: &dyn ContentStore) -> Result<()> {
        self.processed += 1;
        self.pending += 1;
        if self.pending >= self.batch_size {
            self.flush(store).await?;
            self.pause().await;
        }
        Ok(())
    }

    /// Flush whatever is left of the last batch.
    pub async fn finish(&mut self, store: &dyn ContentStore) -> Result<()> {
        if self.pending > 0 {
            self.flush(store).await?;
        }
        Ok(())
    }

    async fn flush(&mut self, store: &dyn ContentStore) -> Result<()> {
        match self.mode {
            FlushMode::Save => store.save().await.map_err(|cause| CoreError::CommitFailed {
                processed: self.processed,
                cause,
            })?,
            FlushMode::Refresh => store
                .refresh()
                .await
                .map_err(|e| CoreError::store("refresh session", e))?,
        }
        self.pending = 0;
        self.flushes += 1;
        debug!(
            "Flushed batch {} ({} items processed)",
            self.flushes, self.processed
        );
        Ok(())
    }

    async fn pause(&self) {
        let Some(throttle) = self.throttle else {
            return;
        };
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(throttle) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(throttle).await,
        }
    }
}
