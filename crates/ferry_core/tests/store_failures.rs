//! Integration tests for imports against a store that fails on purpose.
//!
//! `FailingStore` wraps a [`MemoryRepository`] and forwards every call, except
//! the ones a test switches to fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use ferry_core::bundle::Bundle;
use ferry_core::config::ExecutionParams;
use ferry_core::model::{ContentNode, ContentProperty};
use ferry_core::pipeline::{Exporter, Importer, RunContext};
use ferry_core::record::Category;
use ferry_core::resolver::DEFAULT_REFERENCE_PROPERTY;
use ferry_core::store::memory::MemoryRepository;
use ferry_core::store::{
    ContentStore, EditableRef, FolderRef, HOLDER_PROPERTY, ItemInfo, ItemRef, StoreError,
    StoreResult, VariantState, Workflow,
};

#[derive(Debug, Default)]
struct FailingStore {
    inner: MemoryRepository,
    fail_commit: bool,
    fail_resolved_references: bool,
    commits: AtomicUsize,
    disposed: AtomicUsize,
}

#[async_trait]
impl ContentStore for FailingStore {
    async fn query(&self, query: &str) -> StoreResult<Vec<String>> {
        self.inner.query(query).await
    }

    async fn list_items(&self, root: &str) -> StoreResult<Vec<String>> {
        self.inner.list_items(root).await
    }

    async fn item_info(&self, path: &str) -> StoreResult<ItemInfo> {
        self.inner.item_info(path).await
    }

    async fn read_node(&self, path: &str) -> StoreResult<ContentNode> {
        self.inner.read_node(path).await
    }

    async fn path_of(&self, id: &str) -> StoreResult<Option<String>> {
        self.inner.path_of(id).await
    }

    async fn identity_of(&self, path: &str) -> StoreResult<Option<String>> {
        self.inner.identity_of(path).await
    }

    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.inner.exists(path).await
    }

    async fn set_property(&self, path: &str, property: ContentProperty) -> StoreResult<()> {
        let resolved = property.name() == DEFAULT_REFERENCE_PROPERTY
            && property.string_values().any(|v| !v.starts_with('/'));
        if self.fail_resolved_references && resolved {
            return Err(StoreError::Backend(format!("{} is read-only", path)));
        }
        self.inner.set_property(path, property).await
    }

    async fn remove_property(&self, path: &str, name: &str) -> StoreResult<()> {
        self.inner.remove_property(path, name).await
    }

    async fn add_node(&self, parent: &str, node: ContentNode) -> StoreResult<String> {
        self.inner.add_node(parent, node).await
    }

    async fn remove_node(&self, path: &str) -> StoreResult<()> {
        self.inner.remove_node(path).await
    }

    async fn save(&self) -> StoreResult<()> {
        self.inner.save().await
    }

    async fn refresh(&self) -> StoreResult<()> {
        self.inner.refresh().await
    }
}

#[async_trait]
impl Workflow for FailingStore {
    async fn locate(&self, path: &str) -> StoreResult<Option<ItemRef>> {
        self.inner.locate(path).await
    }

    async fn create_folder(&self, path: &str, type_hints: &[String]) -> StoreResult<FolderRef> {
        self.inner.create_folder(path, type_hints).await
    }

    async fn create_item(
        &self,
        folder_path: &str,
        primary_type: &str,
        name: &str,
        locale: Option<&str>,
        display_name: Option<&str>,
    ) -> StoreResult<ItemRef> {
        self.inner
            .create_item(folder_path, primary_type, name, locale, display_name)
            .await
    }

    async fn obtain_editable(&self, item: &ItemRef) -> StoreResult<EditableRef> {
        self.inner.obtain_editable(item).await
    }

    async fn commit(&self, editable: &EditableRef) -> StoreResult<ItemRef> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit {
            return Err(StoreError::Backend("boom".to_string()));
        }
        self.inner.commit(editable).await
    }

    async fn dispose(&self, editable: &EditableRef) -> StoreResult<()> {
        self.disposed.fetch_add(1, Ordering::SeqCst);
        self.inner.dispose(editable).await
    }

    async fn publish(&self, item: &ItemRef) -> StoreResult<()> {
        self.inner.publish(item).await
    }

    async fn depublish(&self, item: &ItemRef) -> StoreResult<()> {
        self.inner.depublish(item).await
    }

    async fn copy(&self, item: &ItemRef, folder_path: &str, name: &str) -> StoreResult<ItemRef> {
        self.inner.copy(item, folder_path, name).await
    }

    async fn translate(&self, item: &ItemRef, locale: &str, name: &str) -> StoreResult<ItemRef> {
        self.inner.translate(item, locale, name).await
    }
}

fn page(name: &str) -> ContentNode {
    ContentNode::new(name, "site:page").with_property(ContentProperty::string("site:title", name))
}

/// Export `a` linking to `z/later`, which sorts after it in the bundle.
async fn forward_reference_bundle(root: &std::path::Path) -> Bundle {
    let source = Arc::new(MemoryRepository::new());
    let later = source
        .insert_item("/content/documents/z/later", page("later"), &[VariantState::Published])
        .unwrap();
    source
        .insert_item(
            "/content/documents/a",
            page("a").with_child(
                ContentNode::new("link", "ferry:mirror")
                    .with_property(ContentProperty::string(DEFAULT_REFERENCE_PROPERTY, &later.id)),
            ),
            &[VariantState::Published],
        )
        .unwrap();

    let bundle = Bundle::create(root).await.unwrap();
    let result = Exporter::new(source, ExecutionParams::default())
        .unwrap()
        .run(&bundle, &RunContext::new())
        .await
        .unwrap();
    assert_eq!(result.succeeded(), 2, "{:?}", result.entries());
    bundle
}

async fn import(target: &Arc<FailingStore>, bundle: &Bundle) -> ferry_core::MigrationResult {
    Importer::new(target.clone(), target.clone(), ExecutionParams::default())
        .unwrap()
        .run(bundle, &RunContext::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn failed_commit_disposes_the_draft() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(MemoryRepository::new());
    source
        .insert_item("/content/documents/only", page("only"), &[VariantState::Published])
        .unwrap();
    let bundle = Bundle::create(dir.path()).await.unwrap();
    Exporter::new(source, ExecutionParams::default())
        .unwrap()
        .run(&bundle, &RunContext::new())
        .await
        .unwrap();

    let target = Arc::new(FailingStore {
        fail_commit: true,
        ..Default::default()
    });
    let result = import(&target, &bundle).await;

    assert_eq!(target.commits.load(Ordering::SeqCst), 1);
    assert_eq!(target.disposed.load(Ordering::SeqCst), 1);
    assert_eq!(result.stats(Category::Documents).failed, 1);
    let record = &result.entries()[0];
    assert!(!record.succeeded());
    assert!(record.error_message().unwrap_or_default().contains("boom"));

    let info = target.item_info("/content/documents/only").await.unwrap();
    for variant in &info.variants {
        let node = target.read_node(&variant.path).await.unwrap();
        assert!(!node.has_property(HOLDER_PROPERTY), "{} still held", variant.path);
    }
}

#[tokio::test]
async fn successful_commit_does_not_dispose() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = forward_reference_bundle(dir.path()).await;

    let target = Arc::new(FailingStore::default());
    let result = import(&target, &bundle).await;

    assert_eq!(result.failed(), 0, "{:?}", result.entries());
    assert_eq!(target.commits.load(Ordering::SeqCst), 2);
    assert_eq!(target.disposed.load(Ordering::SeqCst), 0);
    assert!(result.errors().is_empty());
}

#[tokio::test]
async fn cleanup_failure_is_a_global_error() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = forward_reference_bundle(dir.path()).await;

    let target = Arc::new(FailingStore {
        fail_resolved_references: true,
        ..Default::default()
    });
    let result = import(&target, &bundle).await;

    // Both items were imported; only the late rewrite of `a` failed.
    assert_eq!(result.succeeded(), 2, "{:?}", result.entries());
    assert_eq!(result.errors().len(), 1, "{:?}", result.errors());
    assert!(result.errors()[0].contains("/content/documents/a"));
    assert!(result.errors()[0].contains("read-only"));

    let log = bundle.read_to_string("_logs/execution.log").await.unwrap();
    assert!(log.contains("Cleanup of /content/documents/a failed"));
}
