//! Bundle to store.

use std::sync::Arc;

use tracing::{debug, warn};

use super::binder::bind;
use super::mapper::SnapshotMeta;
use super::tags::TagSet;
use super::{ExecutionLog, RunContext};
use crate::batch::{BatchController, FlushMode};
use crate::binary::BinaryCodec;
use crate::bundle::Bundle;
use crate::config::{ExecutionParams, ItemSelector, PathMatcher, PublishMode};
use crate::error::{CoreError, Result};
use crate::filter::ItemFilter;
use crate::model::{ContentNode, SnapshotFormat};
use crate::record::{
    ATTR_FILE, ATTR_RESOLVED_REFERENCES, Category, MigrationRecord, MigrationResult,
    RecordContext, ResultBuilder,
};
use crate::resolver::ReferenceResolver;
use crate::store::{ContentStore, ItemRef, Workflow, join_path};

/// Creates or updates store items from the snapshot files of a bundle.
#[derive(Debug)]
pub struct Importer {
    store: Arc<dyn ContentStore>,
    workflow: Arc<dyn Workflow>,
    params: ExecutionParams,
    filter: ItemFilter,
    resolver: ReferenceResolver,
    codec: BinaryCodec,
    tags: TagSet,
}

/// What happened to one snapshot file.
enum Outcome {
    Imported(MigrationRecord, String),
    Failed(MigrationRecord),
    Skipped,
}

impl Importer {
    pub fn new(
        store: Arc<dyn ContentStore>,
        workflow: Arc<dyn Workflow>,
        params: ExecutionParams,
    ) -> Result<Self> {
        Ok(Self {
            filter: ItemFilter::for_import(params.extra_excludes())?,
            resolver: ReferenceResolver::new(params.reference_properties()),
            codec: BinaryCodec::new(params.binary_threshold()),
            tags: TagSet::parse(params.tags()),
            store,
            workflow,
            params,
        })
    }

    pub fn params(&self) -> &ExecutionParams {
        &self.params
    }

    /// Import binaries, then documents, then re-resolve forward references.
    ///
    /// Pending changes are saved every `batch_size` imported items and once
    /// more for the remainder. A failed save aborts the run; batches saved
    /// before it stay saved.
    pub async fn run(&self, bundle: &Bundle, ctx: &RunContext) -> Result<MigrationResult> {
        let binaries = bundle.discover(Category::Binaries)?;
        let documents = bundle.discover(Category::Documents)?;

        let mut run = ImportRun {
            importer: self,
            bundle,
            ctx,
            log: ExecutionLog::new(),
            results: ResultBuilder::new(),
            batches: BatchController::new(
                self.params.batch_size(),
                self.params.throttle(),
                FlushMode::Save,
            )
            .with_cancellation(ctx.cancellation().clone()),
            imported: Vec::new(),
            handled: 0,
            total: binaries.len() + documents.len(),
        };
        run.log.info(format!(
            "Import started from {} ({} binaries, {} documents found)",
            bundle.root().display(),
            binaries.len(),
            documents.len()
        ));
        for skipped in self.tags.skipped() {
            run.log.warn(format!("Skipping malformed tag directive '{}'", skipped));
        }

        run.phase(Category::Binaries, &binaries).await?;
        if !run.results.is_cancelled() {
            run.phase(Category::Documents, &documents).await?;
        }
        run.batches.finish(self.store.as_ref()).await?;

        let updated = self
            .cleanup(&run.imported, &mut run.log, &mut run.results)
            .await?;
        if updated > 0 {
            run.log.info(format!(
                "Cleanup pass resolved {} forward references",
                updated
            ));
        }

        let ImportRun { mut log, results, .. } = run;
        let cancelled = results.is_cancelled();
        let result = results.finish();
        log.info(format!(
            "Import {}: {} processed, {} succeeded, {} failed in {}s",
            if cancelled { "cancelled" } else { "finished" },
            result.total(),
            result.succeeded(),
            result.failed(),
            result.duration().num_seconds()
        ));
        bundle.write_logs(&log.to_text(), &result).await?;
        Ok(result)
    }

    fn matcher(&self, category: Category) -> Result<PathMatcher> {
        let selector = match category {
            Category::Documents => self.params.documents(),
            Category::Binaries => self.params.binaries(),
        };
        if let ItemSelector::Query { query } = selector {
            debug!("Query selector '{}' does not apply to import", query);
        }
        selector.matcher()
    }

    async fn import_file(
        &self,
        category: Category,
        file: &str,
        bundle: &Bundle,
        matcher: &PathMatcher,
    ) -> Outcome {
        let (mut tree, meta) = match read_snapshot(bundle, file).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let mut record = RecordContext::begin(category, file);
                record.set_attribute(ATTR_FILE, file);
                return Outcome::Failed(record.fail(e.item_message()));
            }
        };
        if !matcher.matches(&meta.path) {
            debug!("{} excluded by the {} selector", meta.path, category);
            return Outcome::Skipped;
        }

        let mut record = RecordContext::begin(category, meta.path.as_str());
        record.set_content_type(tree.primary_type());
        record.set_attribute(ATTR_FILE, file);
        match self.apply_snapshot(bundle, &mut tree, &meta, &mut record).await {
            Ok(item) => {
                record.set_content_id(item.id.as_str());
                debug!("Imported {}", item);
                Outcome::Imported(record.succeed(), item.path)
            }
            Err(e) => Outcome::Failed(record.fail(e.item_message())),
        }
    }

    async fn apply_snapshot(
        &self,
        bundle: &Bundle,
        tree: &mut ContentNode,
        meta: &SnapshotMeta,
        record: &mut RecordContext,
    ) -> Result<ItemRef> {
        self.codec.rehydrate(bundle, tree).await?;
        self.tags.apply(tree, record)?;
        let resolution = self
            .resolver
            .to_identities(self.store.as_ref(), tree)
            .await?;
        record.add_count(ATTR_RESOLVED_REFERENCES, resolution.resolved);

        let item = self.locate_or_create(tree, meta).await?;
        let editable = self
            .workflow
            .obtain_editable(&item)
            .await
            .map_err(|e| CoreError::store("obtain editable", e))?;

        let bound = async {
            bind(self.store.as_ref(), &editable.draft.path, tree, &self.filter).await?;
            self.workflow
                .commit(&editable)
                .await
                .map_err(|e| CoreError::store("commit", e))
        }
        .await;
        let item = match bound {
            Ok(item) => item,
            Err(e) => {
                if let Err(dispose_error) = self.workflow.dispose(&editable).await {
                    warn!(
                        "Failed to dispose draft of {}: {}",
                        editable.item.path, dispose_error
                    );
                }
                return Err(e);
            }
        };

        let publish = match self.params.publish() {
            PublishMode::None => false,
            PublishMode::All => true,
            PublishMode::Live => meta.live,
        };
        if publish {
            self.workflow
                .depublish(&item)
                .await
                .map_err(|e| CoreError::store("depublish", e))?;
            self.workflow
                .publish(&item)
                .await
                .map_err(|e| CoreError::store("publish", e))?;
        }
        Ok(item)
    }

    async fn locate_or_create(&self, tree: &ContentNode, meta: &SnapshotMeta) -> Result<ItemRef> {
        if let Some(item) = self
            .workflow
            .locate(&meta.path)
            .await
            .map_err(|e| CoreError::store("locate item", e))?
        {
            return Ok(item);
        }

        let (folder, name) = meta.location();
        let folder_exists = self
            .store
            .exists(folder)
            .await
            .map_err(|e| CoreError::store("check folder", e))?;
        if !folder_exists {
            self.workflow
                .create_folder(folder, &[])
                .await
                .map_err(|e| CoreError::store("create folder", e))?;
        }
        let display_name = (meta.name != name).then_some(meta.name.as_str());
        self.workflow
            .create_item(
                folder,
                tree.primary_type(),
                name,
                meta.locale.as_deref(),
                display_name,
            )
            .await
            .map_err(|e| CoreError::store("create item", e))
    }

    /// Re-resolve location-shaped references left in imported items, now
    /// that every item of the run exists. Saves once if anything changed and
    /// returns the number of properties rewritten.
    ///
    /// The items were already counted, so a failure here is a global error of
    /// the run rather than a failed record.
    async fn cleanup(
        &self,
        imported: &[String],
        log: &mut ExecutionLog,
        results: &mut ResultBuilder,
    ) -> Result<usize> {
        let mut updated = 0;
        for path in imported {
            match self.cleanup_item(path).await {
                Ok(count) => updated += count,
                Err(e) => {
                    let message = format!("Cleanup of {} failed: {}", path, e.item_message());
                    log.warn(&message);
                    results.global_error(message);
                }
            }
        }
        if updated > 0 {
            self.store
                .save()
                .await
                .map_err(|cause| CoreError::CommitFailed {
                    processed: imported.len(),
                    cause,
                })?;
        }
        Ok(updated)
    }

    async fn cleanup_item(&self, path: &str) -> Result<usize> {
        let store = self.store.as_ref();
        let info = store
            .item_info(path)
            .await
            .map_err(|e| CoreError::store("read item", e))?;
        let mut updated = 0;
        for variant in &info.variants {
            let mut node = store
                .read_node(&variant.path)
                .await
                .map_err(|e| CoreError::store("read variant", e))?;
            let mut resolution = self.resolver.to_identities(store, &mut node).await?;
            resolution.changed.dedup();
            for (location, name) in &resolution.changed {
                let (Some(relative), Some(property)) = (
                    node.relative_path(location),
                    node.node_at(location).and_then(|n| n.property(name)),
                ) else {
                    continue;
                };
                let target = if relative.is_empty() {
                    variant.path.clone()
                } else {
                    join_path(&variant.path, &relative)
                };
                store
                    .set_property(&target, property.clone())
                    .await
                    .map_err(|e| CoreError::store("update reference", e))?;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

/// Parse a snapshot file and its traceability metadata.
async fn read_snapshot(bundle: &Bundle, file: &str) -> Result<(ContentNode, SnapshotMeta)> {
    let format = file
        .rsplit_once('.')
        .and_then(|(_, ext)| SnapshotFormat::from_extension(ext))
        .ok_or_else(|| CoreError::invalid_format("snapshot file", format!("{} has no known extension", file)))?;
    let text = bundle.read_to_string(file).await?;
    let tree = format.deserialize(&text)?;
    let meta = SnapshotMeta::read(&tree)?;
    Ok((tree, meta))
}

/// Mutable state of one import run.
struct ImportRun<'a> {
    importer: &'a Importer,
    bundle: &'a Bundle,
    ctx: &'a RunContext,
    log: ExecutionLog,
    results: ResultBuilder,
    batches: BatchController,
    imported: Vec<String>,
    handled: usize,
    total: usize,
}

impl ImportRun<'_> {
    async fn phase(&mut self, category: Category, files: &[String]) -> Result<()> {
        self.log
            .info(format!("Importing {} {} files", files.len(), category));
        let matcher = self.importer.matcher(category)?;
        for file in files {
            if self.ctx.should_stop(self.bundle).await {
                self.log.warn(format!(
                    "Stop requested, ending import after {} items",
                    self.results.len()
                ));
                self.results.mark_cancelled();
                return Ok(());
            }

            match self
                .importer
                .import_file(category, file, self.bundle, &matcher)
                .await
            {
                Outcome::Imported(record, path) => {
                    self.results.push(record);
                    self.imported.push(path);
                    self.batches
                        .item_done(self.importer.store.as_ref())
                        .await?;
                }
                Outcome::Failed(record) => {
                    if let Some(message) = record.error_message() {
                        self.log
                            .error(format!("Failed to import {}: {}", file, message));
                    }
                    self.results.push(record);
                    self.batches
                        .item_done(self.importer.store.as_ref())
                        .await?;
                }
                Outcome::Skipped => {}
            }
            self.handled += 1;
            self.ctx.report(self.handled, self.total);
        }
        Ok(())
    }
}
