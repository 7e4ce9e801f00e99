//! Store to bundle.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::mapper::map_item;
use super::tags::TagSet;
use super::{ExecutionLog, RunContext};
use crate::batch::{BatchController, FlushMode};
use crate::binary::BinaryCodec;
use crate::bundle::{Bundle, item_file};
use crate::config::{ExecutionParams, ItemSelector};
use crate::error::{CoreError, Result};
use crate::filter::ItemFilter;
use crate::record::{
    ATTR_EXTERNALIZED_BINARIES, ATTR_FILE, Category, MigrationRecord, MigrationResult,
    RecordContext, ResultBuilder,
};
use crate::resolver::ReferenceResolver;
use crate::store::{ContentStore, ItemInfo, Variant, split_path};

/// Writes one snapshot file per selected item into a bundle.
#[derive(Debug)]
pub struct Exporter {
    store: Arc<dyn ContentStore>,
    params: ExecutionParams,
    filter: ItemFilter,
    resolver: ReferenceResolver,
    codec: BinaryCodec,
    tags: TagSet,
}

impl Exporter {
    pub fn new(store: Arc<dyn ContentStore>, params: ExecutionParams) -> Result<Self> {
        Ok(Self {
            filter: ItemFilter::for_export(params.extra_excludes())?,
            resolver: ReferenceResolver::new(params.reference_properties()),
            codec: BinaryCodec::new(params.binary_threshold()),
            tags: TagSet::parse(params.tags()),
            store,
            params,
        })
    }

    pub fn params(&self) -> &ExecutionParams {
        &self.params
    }

    /// Export documents, then binaries, into `bundle`.
    ///
    /// Binaries referenced from exported documents are added to the binaries
    /// phase even when the binaries selector does not match them. Item
    /// failures end up in the result; only selection and session failures
    /// abort the run.
    pub async fn run(&self, bundle: &Bundle, ctx: &RunContext) -> Result<MigrationResult> {
        let documents = self.select(Category::Documents).await?;
        let binaries = self.select(Category::Binaries).await?;

        let mut run = ExportRun {
            exporter: self,
            bundle,
            ctx,
            log: ExecutionLog::new(),
            results: ResultBuilder::new(),
            batches: BatchController::new(
                self.params.batch_size(),
                self.params.throttle(),
                FlushMode::Refresh,
            )
            .with_cancellation(ctx.cancellation().clone()),
            exported: HashSet::new(),
            referenced: Vec::new(),
            total: documents.len() + binaries.len(),
        };
        run.log.info(format!(
            "Export started into {} ({} documents, {} binaries selected)",
            bundle.root().display(),
            documents.len(),
            binaries.len()
        ));
        for skipped in self.tags.skipped() {
            run.log.warn(format!("Skipping malformed tag directive '{}'", skipped));
        }

        run.phase(Category::Documents, &documents).await?;
        if !run.results.is_cancelled() {
            let mut binaries = binaries;
            let extra = self.referenced_binaries(&run.referenced, &binaries).await;
            if !extra.is_empty() {
                run.log.info(format!(
                    "Adding {} binaries referenced from exported documents",
                    extra.len()
                ));
                run.total += extra.len();
                binaries.extend(extra);
            }
            run.phase(Category::Binaries, &binaries).await?;
        }
        run.batches.finish(self.store.as_ref()).await?;

        let ExportRun { mut log, results, .. } = run;
        let cancelled = results.is_cancelled();
        let result = results.finish();
        log.info(format!(
            "Export {}: {} processed, {} succeeded, {} failed in {}s",
            if cancelled { "cancelled" } else { "finished" },
            result.total(),
            result.succeeded(),
            result.failed(),
            result.duration().num_seconds()
        ));
        bundle.write_logs(&log.to_text(), &result).await?;
        Ok(result)
    }

    async fn select(&self, category: Category) -> Result<Vec<String>> {
        let (selector, root) = match category {
            Category::Documents => (self.params.documents(), self.params.documents_root()),
            Category::Binaries => (self.params.binaries(), self.params.binaries_root()),
        };
        let operation = format!("select {}", category);
        let paths = match selector {
            ItemSelector::Query { query } => self.store.query(query).await,
            ItemSelector::Paths { .. } => match self.store.exists(root).await {
                Ok(true) => self.store.list_items(root).await,
                Ok(false) => Ok(Vec::new()),
                Err(e) => Err(e),
            },
        }
        .map_err(|e| CoreError::store(operation, e))?;
        let matcher = selector.matcher()?;
        Ok(paths.into_iter().filter(|p| matcher.matches(p)).collect())
    }

    /// Items under the binaries root that exported documents point at and
    /// the binaries selection does not already contain.
    async fn referenced_binaries(&self, targets: &[String], selected: &[String]) -> Vec<String> {
        let root = self.params.binaries_root().trim_end_matches('/');
        let seen: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let mut extra = Vec::new();
        for target in targets {
            if !target.starts_with(root) || target.as_bytes().get(root.len()) != Some(&b'/') {
                continue;
            }
            let Some(item) = self.item_containing(target, root).await else {
                debug!("Reference target {} is not inside an item", target);
                continue;
            };
            if !seen.contains(item.as_str()) && !extra.contains(&item) {
                extra.push(item);
            }
        }
        extra
    }

    /// The item at `path` or the closest item above it, staying below `root`.
    async fn item_containing(&self, path: &str, root: &str) -> Option<String> {
        let mut current = path;
        while current.len() > root.len() {
            if self.store.item_info(current).await.is_ok() {
                return Some(current.to_string());
            }
            current = split_path(current)?.0;
        }
        None
    }

    /// Export one item. `None` when the item has no variant to export.
    async fn export_item(
        &self,
        category: Category,
        path: &str,
        bundle: &Bundle,
        referenced: &mut Vec<String>,
    ) -> Option<MigrationRecord> {
        let info = match self.store.item_info(path).await {
            Ok(info) => info,
            Err(e) => {
                let record = RecordContext::begin(category, path);
                return Some(record.fail(CoreError::store("read item", e).item_message()));
            }
        };
        let Some(variant) = info.best_variant().cloned() else {
            debug!("{} has no variant, skipping", path);
            return None;
        };

        let mut record = RecordContext::begin(category, path);
        record.set_content_id(info.id.as_str());
        record.set_content_type(variant.primary_type.as_str());
        match self
            .write_snapshot(category, &info, &variant, bundle, &mut record, referenced)
            .await
        {
            Ok(()) => {
                debug!("Exported {} from {} variant", path, variant.state);
                Some(record.succeed())
            }
            Err(e) => Some(record.fail(e.item_message())),
        }
    }

    async fn write_snapshot(
        &self,
        category: Category,
        info: &ItemInfo,
        variant: &Variant,
        bundle: &Bundle,
        record: &mut RecordContext,
        referenced: &mut Vec<String>,
    ) -> Result<()> {
        let store = self.store.as_ref();
        let mut tree = map_item(store, info, variant, &self.filter).await?;

        let resolution = self.resolver.to_locations(store, &mut tree).await?;
        resolution.annotate(record);
        referenced.extend(resolution.targets);

        let externalized = self.codec.externalize(bundle, &info.path, &mut tree).await?;
        record.add_count(ATTR_EXTERNALIZED_BINARIES, externalized);

        self.tags.apply(&mut tree, record)?;

        let format = self.params.format();
        let file = item_file(category, &info.path, format);
        let text = format.serialize(&tree)?;
        bundle.write_file(&file, text.as_bytes()).await?;
        record.set_attribute(ATTR_FILE, file);
        Ok(())
    }
}

/// Mutable state of one export run.
struct ExportRun<'a> {
    exporter: &'a Exporter,
    bundle: &'a Bundle,
    ctx: &'a RunContext,
    log: ExecutionLog,
    results: ResultBuilder,
    batches: BatchController,
    exported: HashSet<String>,
    referenced: Vec<String>,
    total: usize,
}

impl ExportRun<'_> {
    async fn phase(&mut self, category: Category, paths: &[String]) -> Result<()> {
        self.log
            .info(format!("Exporting {} {}", paths.len(), category));
        for path in paths {
            if self.ctx.should_stop(self.bundle).await {
                self.log.warn(format!(
                    "Stop requested, ending export after {} items",
                    self.batches.processed()
                ));
                self.results.mark_cancelled();
                return Ok(());
            }
            if !self.exported.insert(path.clone()) {
                continue;
            }

            if let Some(record) = self
                .exporter
                .export_item(category, path, self.bundle, &mut self.referenced)
                .await
            {
                if let Some(message) = record.error_message() {
                    self.log.error(format!("Failed to export {}: {}", path, message));
                }
                self.results.push(record);
            }
            self.batches
                .item_done(self.exporter.store.as_ref())
                .await?;
            self.ctx.report(self.batches.processed(), self.total);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BinaryValue, ContentNode, ContentProperty, META_LIVE, META_PATH, PropertyType,
        SnapshotFormat,
    };
    use crate::record::{ATTR_DANGLING_REFERENCES, ATTR_SKIPPED_TAGS};
    use crate::resolver::DEFAULT_REFERENCE_PROPERTY;
    use crate::store::VariantState;
    use crate::store::memory::MemoryRepository;
    use crate::test_helpers::bundle::temp_bundle;

    #[tokio::test]
    async fn test_export_writes_files_and_logs() {
        let repo = Arc::new(MemoryRepository::new());
        let logo = repo
            .insert_item(
                "/content/assets/logo",
                ContentNode::new("logo", "ferry:asset").with_property(
                    ContentProperty::single("ferry:data", PropertyType::Binary, BinaryValue::Inline(vec![1; 64]))
                        .unwrap(),
                ),
                &[],
            )
            .unwrap();
        repo.insert_item(
            "/content/documents/home",
            ContentNode::new("home", "site:page").with_child(
                ContentNode::new("image", "ferry:mirror")
                    .with_property(ContentProperty::string(DEFAULT_REFERENCE_PROPERTY, logo.id.as_str())),
            ),
            &[VariantState::Published],
        )
        .unwrap();
        repo.insert_item(
            "/content/documents/empty",
            ContentNode::new("empty", "site:page"),
            &[VariantState::Draft],
        )
        .unwrap();

        let params = ExecutionParams::builder()
            .binary_threshold(16)
            .binaries(ItemSelector::query("path:/nothing/*"))
            .tag("site:origin=legacy")
            .tag("broken")
            .build()
            .unwrap();
        let exporter = Exporter::new(repo.clone(), params).unwrap();
        let (_dir, bundle) = temp_bundle().await;
        let result = exporter.run(&bundle, &RunContext::new()).await.unwrap();

        assert_eq!(result.stats(Category::Documents).total, 2);
        assert_eq!(result.stats(Category::Binaries).total, 1);
        assert_eq!(result.failed(), 0);
        assert!(!result.cancelled());

        let home = bundle.read_to_string("documents/content/documents/home.json").await.unwrap();
        let tree = SnapshotFormat::Json.deserialize(&home).unwrap();
        assert_eq!(
            tree.children()[0]
                .property(DEFAULT_REFERENCE_PROPERTY)
                .and_then(|p| p.string_values().next()),
            Some("/content/assets/logo")
        );
        assert_eq!(
            tree.property(META_PATH).and_then(|p| p.string_values().next()),
            Some("/content/documents/home")
        );
        assert!(tree.has_property(META_LIVE));
        assert!(tree.has_property("site:origin"));

        let logo_file = bundle.read_to_string("binaries/content/assets/logo.json").await.unwrap();
        assert!(logo_file.contains("bundle:_attachments/content/assets/logo/ferry_3Adata~0.bin"));
        assert!(bundle
            .read_file("_attachments/content/assets/logo/ferry_3Adata~0.bin")
            .await
            .is_ok());

        let summary = bundle.read_to_string("_logs/documents-summary.log").await.unwrap();
        assert!(summary.contains("/content/documents/home"));
        let log = bundle.read_to_string("_logs/execution.log").await.unwrap();
        assert!(log.contains("Skipping malformed tag directive 'broken'"));

        let home_record = result
            .records(Category::Documents)
            .find(|r| r.content_path() == "/content/documents/home")
            .unwrap();
        assert_eq!(home_record.attribute(ATTR_SKIPPED_TAGS), Some("1"));
        assert_eq!(home_record.attribute(ATTR_FILE), Some("documents/content/documents/home.json"));
    }

    #[tokio::test]
    async fn test_dangling_reference_is_soft() {
        let repo = Arc::new(MemoryRepository::new());
        let dangling = uuid::Uuid::new_v4().to_string();
        repo.insert_item(
            "/content/documents/orphan",
            ContentNode::new("orphan", "site:page")
                .with_property(ContentProperty::string(DEFAULT_REFERENCE_PROPERTY, dangling.as_str())),
            &[],
        )
        .unwrap();
        let exporter = Exporter::new(repo, ExecutionParams::default()).unwrap();
        let (_dir, bundle) = temp_bundle().await;
        let result = exporter.run(&bundle, &RunContext::new()).await.unwrap();

        assert_eq!(result.succeeded(), 1);
        let record = result.entries().first().unwrap();
        assert_eq!(record.attribute(ATTR_DANGLING_REFERENCES), Some("1"));
        let text = bundle
            .read_to_string("documents/content/documents/orphan.json")
            .await
            .unwrap();
        assert!(text.contains(&dangling));
    }

    #[tokio::test]
    async fn test_stop_file_ends_run_before_first_item() {
        let repo = Arc::new(MemoryRepository::new());
        repo.insert_item("/content/documents/a", ContentNode::new("a", "site:page"), &[])
            .unwrap();
        let exporter = Exporter::new(repo, ExecutionParams::default()).unwrap();
        let (_dir, bundle) = temp_bundle().await;
        bundle.request_stop().await.unwrap();

        let result = exporter.run(&bundle, &RunContext::new()).await.unwrap();
        assert!(result.cancelled());
        assert_eq!(result.total(), 0);
    }

    #[tokio::test]
    async fn test_bad_query_aborts_run() {
        let repo = Arc::new(MemoryRepository::new());
        let params = ExecutionParams::builder()
            .documents(ItemSelector::query("nonsense"))
            .build()
            .unwrap();
        let exporter = Exporter::new(repo, params).unwrap();
        let (_dir, bundle) = temp_bundle().await;
        let err = exporter.run(&bundle, &RunContext::new()).await.unwrap_err();
        assert!(matches!(err, CoreError::Store { .. }));
    }
}
