//! Background execution of export and import runs.
//!
//! The [`JobMonitor`] owns a registry of jobs keyed by [`JobId`]. Jobs wait
//! for a worker slot, report progress through their [`JobContext`], and are
//! cancelled cooperatively: the pipeline checks the job's token before each
//! item. Finished jobs stay queryable in a bounded history, oldest evicted
//! first, and their result artifacts are deleted once the configured
//! time-to-live elapses.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bundle::Bundle;
use crate::config::{ExecutionParams, JobsConfig};
use crate::error::{CoreError, Result};
use crate::pipeline::{Exporter, Importer, ProgressListener, RunContext};
use crate::record::{Category, CategoryStats, MigrationResult};
use crate::store::{ContentStore, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Export,
    Import,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobKind::Export => "export",
            JobKind::Import => "import",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        })
    }
}

/// Snapshot of a job as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Fraction of items processed, `0.0..=1.0`.
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    pub artifacts: Vec<PathBuf>,
    /// Per-category totals, once finished.
    pub stats: BTreeMap<Category, CategoryStats>,
}

impl ProcessStatus {
    fn running(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            status: JobStatus::Running,
            progress: 0.0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            cancel_requested: false,
            artifacts: Vec::new(),
            stats: BTreeMap::new(),
        }
    }
}

/// What a successful job hands back to the monitor.
#[derive(Debug)]
pub struct JobOutput {
    pub result: MigrationResult,
    /// Files produced by the job, the first one is its downloadable result.
    pub artifacts: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Jobs running at the same time.
    pub workers: usize,
    /// Finished jobs kept for late status queries.
    pub history_limit: usize,
    pub artifact_ttl: Duration,
    pub artifact_dir: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&JobsConfig::default())
    }
}

impl From<&JobsConfig> for MonitorConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            history_limit: config.history_limit.max(1),
            artifact_ttl: Duration::from_secs(config.artifact_ttl_secs),
            artifact_dir: config
                .artifact_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("ferry-artifacts")),
        }
    }
}

#[derive(Debug)]
struct Entry {
    status: ProcessStatus,
    cancel: CancellationToken,
    result: Option<MigrationResult>,
}

#[derive(Debug)]
struct Inner {
    jobs: DashMap<JobId, Entry>,
    history: Mutex<VecDeque<JobId>>,
    slots: Arc<Semaphore>,
    finished: Notify,
    config: MonitorConfig,
}

/// Handle a running job uses to report progress and observe cancellation.
#[derive(Debug, Clone)]
pub struct JobContext {
    id: JobId,
    cancel: CancellationToken,
    inner: Weak<Inner>,
    artifact_dir: PathBuf,
}

impl JobContext {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn artifact_dir(&self) -> &PathBuf {
        &self.artifact_dir
    }

    /// Run context wired to this job's cancellation and progress.
    pub fn run_context(&self) -> RunContext {
        RunContext::new()
            .with_cancellation(self.cancel.clone())
            .with_progress(Arc::new(self.clone()))
    }
}

impl ProgressListener for JobContext {
    fn on_progress(&self, processed: usize, total: usize) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if let Some(mut entry) = inner.jobs.get_mut(&self.id) {
            entry.status.progress = if total == 0 {
                1.0
            } else {
                (processed as f64 / total as f64).clamp(0.0, 1.0)
            };
        }
    }
}

/// Registry and worker pool for background runs.
#[derive(Debug, Clone)]
pub struct JobMonitor {
    inner: Arc<Inner>,
}

impl Default for JobMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl JobMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: DashMap::new(),
                history: Mutex::new(VecDeque::new()),
                slots: Arc::new(Semaphore::new(config.workers.max(1))),
                finished: Notify::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Start `job` once a worker slot is free. Returns immediately.
    pub fn submit<F, Fut>(&self, kind: JobKind, job: F) -> JobId
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<JobOutput>> + Send + 'static,
    {
        let id = JobId::new();
        let cancel = CancellationToken::new();
        self.inner.jobs.insert(
            id,
            Entry {
                status: ProcessStatus::running(id, kind),
                cancel: cancel.clone(),
                result: None,
            },
        );
        info!("Submitted {} job {}", kind, id);

        let ctx = JobContext {
            id,
            cancel: cancel.clone(),
            inner: Arc::downgrade(&self.inner),
            artifact_dir: self.inner.config.artifact_dir.clone(),
        };
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = inner.slots.clone().acquire_owned() => permit.ok(),
            };
            let outcome = match permit {
                Some(permit) => {
                    debug!("Job {} acquired a worker slot", id);
                    let outcome = match tokio::spawn(job(ctx)).await {
                        Ok(outcome) => outcome,
                        Err(e) => Err(CoreError::JobFailed {
                            id,
                            message: e.to_string(),
                        }),
                    };
                    drop(permit);
                    Some(outcome)
                }
                None => None,
            };
            inner.finish(id, outcome);
        });
        id
    }

    pub fn status(&self, id: JobId) -> Result<ProcessStatus> {
        self.inner
            .jobs
            .get(&id)
            .map(|entry| entry.status.clone())
            .ok_or(CoreError::JobNotFound { id })
    }

    /// Every known job, oldest first.
    pub fn list(&self) -> Vec<ProcessStatus> {
        let mut all: Vec<ProcessStatus> = self
            .inner
            .jobs
            .iter()
            .map(|entry| entry.status.clone())
            .collect();
        all.sort_by_key(|s| s.started_at);
        all
    }

    /// Request cooperative cancellation of a running job.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        let mut entry = self
            .inner
            .jobs
            .get_mut(&id)
            .ok_or(CoreError::JobNotFound { id })?;
        if entry.status.status != JobStatus::Running {
            return Err(CoreError::JobConflict {
                id,
                status: entry.status.status.to_string(),
            });
        }
        entry.status.cancel_requested = true;
        entry.cancel.cancel();
        info!("Cancellation requested for job {}", id);
        Ok(())
    }

    /// Result of a finished job.
    pub fn result(&self, id: JobId) -> Result<Option<MigrationResult>> {
        self.inner
            .jobs
            .get(&id)
            .map(|entry| entry.result.clone())
            .ok_or(CoreError::JobNotFound { id })
    }

    /// Bytes of the job's result artifact.
    pub async fn download_result(&self, id: JobId) -> Result<Vec<u8>> {
        let status = self.status(id)?;
        match status.status {
            JobStatus::Running => return Err(CoreError::JobStillRunning { id }),
            JobStatus::Failed => {
                return Err(CoreError::JobFailed {
                    id,
                    message: status.error_message.unwrap_or_default(),
                });
            }
            JobStatus::Completed | JobStatus::Cancelled => {}
        }
        let path = status
            .artifacts
            .first()
            .ok_or(CoreError::ArtifactMissing { id })?;
        tokio::fs::read(path)
            .await
            .map_err(|_| CoreError::ArtifactMissing { id })
    }

    /// Wait until the job leaves RUNNING.
    pub async fn wait(&self, id: JobId) -> Result<ProcessStatus> {
        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let status = self.status(id)?;
            if status.status.is_finished() {
                return Ok(status);
            }
            notified.await;
        }
    }

    /// Export into `bundle_dir` in the background, packing the bundle into a
    /// `.tar.gz` artifact.
    pub fn submit_export(
        &self,
        store: Arc<dyn ContentStore>,
        params: ExecutionParams,
        bundle_dir: PathBuf,
    ) -> Result<JobId> {
        let exporter = Exporter::new(store, params)?;
        Ok(self.submit(JobKind::Export, move |ctx| async move {
            let bundle = Bundle::create(&bundle_dir).await?;
            bundle.clear_stop().await?;
            let result = exporter.run(&bundle, &ctx.run_context()).await?;
            let archive = ctx
                .artifact_dir()
                .join(format!("ferry-export-{}.tar.gz", ctx.id()));
            let archive = bundle.pack(archive).await?;
            Ok::<_, CoreError>(JobOutput {
                result,
                artifacts: vec![archive],
            })
        }))
    }

    /// Import from a bundle directory or `.tar.gz` archive in the background.
    ///
    /// The artifact is a JSON report of the run.
    pub fn submit_import(
        &self,
        store: Arc<dyn ContentStore>,
        workflow: Arc<dyn Workflow>,
        params: ExecutionParams,
        source: PathBuf,
    ) -> Result<JobId> {
        let importer = Importer::new(store, workflow, params)?;
        Ok(self.submit(JobKind::Import, move |ctx| async move {
            let metadata = tokio::fs::metadata(&source)
                .await
                .map_err(|e| CoreError::bundle(source.display().to_string(), e.to_string()))?;
            let (bundle, _scratch) = if metadata.is_dir() {
                (Bundle::open(&source).await?, None)
            } else {
                let scratch = tempfile::tempdir()
                    .map_err(|e| CoreError::io("create scratch directory", e))?;
                let bundle = Bundle::unpack(&source, scratch.path()).await?;
                (bundle, Some(scratch))
            };
            let result = importer.run(&bundle, &ctx.run_context()).await?;

            let report = ctx
                .artifact_dir()
                .join(format!("ferry-import-{}.json", ctx.id()));
            let text = serde_json::to_string_pretty(&result).map_err(|e| {
                CoreError::SerializationError {
                    data_type: "import report".to_string(),
                    cause: e,
                }
            })?;
            tokio::fs::create_dir_all(ctx.artifact_dir())
                .await
                .map_err(|e| CoreError::io("create artifact directory", e))?;
            tokio::fs::write(&report, text)
                .await
                .map_err(|e| CoreError::io(format!("write {}", report.display()), e))?;
            Ok::<_, CoreError>(JobOutput {
                result,
                artifacts: vec![report],
            })
        }))
    }
}

impl Inner {
    /// Record the outcome, move the job to the history and schedule artifact
    /// expiry. `None` means the job was cancelled before it started.
    fn finish(self: &Arc<Self>, id: JobId, outcome: Option<Result<JobOutput>>) {
        let mut expiring = Vec::new();
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            let cancelled = entry.cancel.is_cancelled();
            let status = &mut entry.status;
            status.completed_at = Some(Utc::now());
            let mut result = None;
            match outcome {
                Some(Ok(output)) => {
                    if cancelled || output.result.cancelled() {
                        status.status = JobStatus::Cancelled;
                    } else {
                        status.status = JobStatus::Completed;
                        status.progress = 1.0;
                    }
                    status.stats = Category::ALL
                        .iter()
                        .map(|c| (*c, output.result.stats(*c)))
                        .collect();
                    status.artifacts = output.artifacts;
                    expiring = status.artifacts.clone();
                    result = Some(output.result);
                }
                Some(Err(e)) => {
                    status.status = JobStatus::Failed;
                    status.error_message = Some(e.item_message());
                    warn!("Job {} failed: {}", id, e.item_message());
                }
                None => status.status = JobStatus::Cancelled,
            }
            info!("Job {} finished: {}", id, status.status);
            entry.result = result;
        }

        let evicted: Vec<JobId> = {
            let mut history = self.history.lock();
            history.push_back(id);
            let excess = history.len().saturating_sub(self.config.history_limit);
            history.drain(..excess).collect()
        };
        for old in evicted {
            if let Some((_, entry)) = self.jobs.remove(&old) {
                debug!("Evicted job {} from history", old);
                remove_artifacts(entry.status.artifacts);
            }
        }

        if !expiring.is_empty() {
            let inner = Arc::downgrade(self);
            let ttl = self.config.artifact_ttl;
            tokio::spawn(async move {
                tokio::time::sleep(ttl).await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let paths = match inner.jobs.get_mut(&id) {
                    Some(mut entry) => std::mem::take(&mut entry.status.artifacts),
                    None => return,
                };
                debug!("Artifacts of job {} expired", id);
                remove_artifacts(paths);
            });
        }

        self.finished.notify_waiters();
    }
}

fn remove_artifacts(paths: Vec<PathBuf>) {
    if paths.is_empty() {
        return;
    }
    tokio::spawn(async move {
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed artifact {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove artifact {}: {}", path.display(), e),
            }
        }
    });
}
