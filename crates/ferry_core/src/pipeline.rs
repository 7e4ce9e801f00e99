//! Export and import pipelines.
//!
//! Both pipelines process items strictly one after another and share the
//! per-run plumbing defined here: the cooperative stop signal, progress
//! reporting, and the execution log written into the bundle.

pub mod binder;
pub mod export;
pub mod import;
pub mod mapper;
pub mod tags;

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bundle::Bundle;

pub use export::Exporter;
pub use import::Importer;

/// Receives progress as items are processed.
pub trait ProgressListener: Send + Sync + fmt::Debug {
    /// `processed` items done out of `total` known so far.
    fn on_progress(&self, processed: usize, total: usize);
}

/// Cancellation and progress hooks of one run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
    progress: Option<Arc<dyn ProgressListener>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(listener);
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the run should end before the next item, either through the
    /// token or the bundle's stop file.
    pub async fn should_stop(&self, bundle: &Bundle) -> bool {
        self.cancel.is_cancelled() || bundle.stop_requested().await
    }

    pub fn report(&self, processed: usize, total: usize) {
        if let Some(listener) = &self.progress {
            listener.on_progress(processed, total.max(processed));
        }
    }
}

/// Human-readable log of a run, stored as `_logs/execution.log`.
///
/// Every line is also emitted through `tracing`.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    lines: Vec<String>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, level: &str, message: &str) {
        self.lines.push(format!(
            "{} {:<5} {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            level,
            message
        ));
    }

    pub fn info(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.push("INFO", message);
    }

    pub fn warn(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        warn!("{}", message);
        self.push("WARN", message);
    }

    pub fn error(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!("{}", message);
        self.push("ERROR", message);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn to_text(&self) -> String {
        let mut text = self.lines.join("\n");
        text.push('\n');
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<(usize, usize)>>);

    impl ProgressListener for Recorder {
        fn on_progress(&self, processed: usize, total: usize) {
            self.0.lock().push((processed, total));
        }
    }

    #[tokio::test]
    async fn test_stop_from_token_or_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::create(dir.path()).await.unwrap();
        let token = CancellationToken::new();
        let ctx = RunContext::new().with_cancellation(token.clone());
        assert!(!ctx.should_stop(&bundle).await);

        bundle.request_stop().await.unwrap();
        assert!(ctx.should_stop(&bundle).await);
        bundle.clear_stop().await.unwrap();
        assert!(!ctx.should_stop(&bundle).await);

        token.cancel();
        assert!(ctx.should_stop(&bundle).await);
    }

    #[test]
    fn test_progress_total_never_below_processed() {
        let recorder = Arc::new(Recorder::default());
        let ctx = RunContext::new().with_progress(recorder.clone());
        ctx.report(1, 3);
        ctx.report(4, 3);
        assert_eq!(*recorder.0.lock(), vec![(1, 3), (4, 4)]);
    }

    #[test]
    fn test_execution_log_lines() {
        let mut log = ExecutionLog::new();
        log.info("Export started");
        log.warn("Skipping malformed tag directive 'oops'");
        let text = log.to_text();
        assert_eq!(log.lines().len(), 2);
        assert!(text.contains("INFO  Export started"));
        assert!(text.contains("WARN  Skipping malformed"));
    }
}
