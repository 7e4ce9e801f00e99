//! Integration tests for cancellation and the background job monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ferry_core::bundle::Bundle;
use ferry_core::CoreError;
use ferry_core::config::ExecutionParams;
use ferry_core::jobs::{JobKind, JobMonitor, JobOutput, JobStatus, MonitorConfig};
use ferry_core::model::{ContentNode, ContentProperty};
use ferry_core::pipeline::{Exporter, Importer, ProgressListener, RunContext};
use ferry_core::record::{Category, ResultBuilder};
use ferry_core::store::VariantState;
use ferry_core::store::memory::MemoryRepository;
use tokio_util::sync::CancellationToken;

/// Cancels the run once `limit` items were processed.
#[derive(Debug)]
struct CancelAfter {
    limit: usize,
    token: CancellationToken,
}

impl ProgressListener for CancelAfter {
    fn on_progress(&self, processed: usize, _total: usize) {
        if processed >= self.limit {
            self.token.cancel();
        }
    }
}

fn repository_with_pages(count: usize) -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    for i in 0..count {
        repo.insert_item(
            &format!("/content/documents/page-{i}"),
            ContentNode::new("page", "site:page")
                .with_property(ContentProperty::string("site:title", format!("Page {i}"))),
            &[VariantState::Published],
        )
        .unwrap();
    }
    repo
}

fn monitor(dir: &std::path::Path, workers: usize) -> JobMonitor {
    JobMonitor::new(MonitorConfig {
        workers,
        history_limit: 16,
        artifact_ttl: Duration::from_secs(300),
        artifact_dir: dir.join("artifacts"),
    })
}

#[tokio::test]
async fn cancelled_job_keeps_records_of_processed_items() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = monitor(dir.path(), 2);
    let exporter = Exporter::new(repository_with_pages(5), ExecutionParams::default()).unwrap();
    let bundle = Bundle::create(dir.path().join("bundle")).await.unwrap();

    let id = monitor.submit(JobKind::Export, move |ctx| async move {
        let run = RunContext::new()
            .with_cancellation(ctx.cancellation().clone())
            .with_progress(Arc::new(CancelAfter {
                limit: 2,
                token: ctx.cancellation().clone(),
            }));
        let result = exporter.run(&bundle, &run).await?;
        Ok::<_, CoreError>(JobOutput {
            result,
            artifacts: Vec::new(),
        })
    });

    let status = monitor.wait(id).await.unwrap();
    assert_eq!(status.status, JobStatus::Cancelled);
    assert_eq!(status.stats[&Category::Documents].total, 2);

    let result = monitor.result(id).unwrap().unwrap();
    assert!(result.cancelled());
    assert_eq!(result.total(), 2);
    assert!(result.entries().iter().all(|r| r.succeeded()));
}

#[tokio::test]
async fn stop_file_ends_an_import_before_the_first_item() {
    let dir = tempfile::tempdir().unwrap();
    let source = repository_with_pages(3);
    let bundle = Bundle::create(dir.path()).await.unwrap();
    Exporter::new(source, ExecutionParams::default())
        .unwrap()
        .run(&bundle, &RunContext::new())
        .await
        .unwrap();
    bundle.request_stop().await.unwrap();

    let target = Arc::new(MemoryRepository::new());
    let result = Importer::new(target.clone(), target.clone(), ExecutionParams::default())
        .unwrap()
        .run(&bundle, &RunContext::new())
        .await
        .unwrap();
    assert!(result.cancelled());
    assert_eq!(result.total(), 0);
    assert_eq!(target.save_count(), 0);
}

#[tokio::test]
async fn single_worker_runs_jobs_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = monitor(dir.path(), 1);
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    let second_started = Arc::new(AtomicBool::new(false));

    let first = monitor.submit(JobKind::Export, move |_ctx| async move {
        let _ = released.await;
        Ok(JobOutput {
            result: ResultBuilder::new().finish(),
            artifacts: Vec::new(),
        })
    });
    let flag = second_started.clone();
    let second = monitor.submit(JobKind::Import, move |_ctx| async move {
        flag.store(true, Ordering::SeqCst);
        Ok(JobOutput {
            result: ResultBuilder::new().finish(),
            artifacts: Vec::new(),
        })
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second_started.load(Ordering::SeqCst));
    assert_eq!(monitor.status(second).unwrap().status, JobStatus::Running);

    release.send(()).unwrap();
    assert_eq!(monitor.wait(first).await.unwrap().status, JobStatus::Completed);
    assert_eq!(monitor.wait(second).await.unwrap().status, JobStatus::Completed);
    assert!(second_started.load(Ordering::SeqCst));
    assert_eq!(monitor.list().len(), 2);
}

#[tokio::test]
async fn queued_job_cancelled_before_it_starts() {
    let dir = tempfile::tempdir().unwrap();
    let monitor = monitor(dir.path(), 1);
    let (release, released) = tokio::sync::oneshot::channel::<()>();
    let blocker = monitor.submit(JobKind::Export, move |_ctx| async move {
        let _ = released.await;
        Ok(JobOutput {
            result: ResultBuilder::new().finish(),
            artifacts: Vec::new(),
        })
    });
    let started = Arc::new(AtomicBool::new(false));
    let flag = started.clone();
    let queued = monitor.submit(JobKind::Export, move |_ctx| async move {
        flag.store(true, Ordering::SeqCst);
        Ok(JobOutput {
            result: ResultBuilder::new().finish(),
            artifacts: Vec::new(),
        })
    });

    monitor.cancel(queued).unwrap();
    let status = monitor.wait(queued).await.unwrap();
    assert_eq!(status.status, JobStatus::Cancelled);
    assert!(status.cancel_requested);
    assert!(!started.load(Ordering::SeqCst));

    release.send(()).unwrap();
    assert_eq!(monitor.wait(blocker).await.unwrap().status, JobStatus::Completed);
}
