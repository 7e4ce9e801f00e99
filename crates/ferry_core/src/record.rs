//! Per-item migration records and the run-level result.
//!
//! Processing of one item begins a [`RecordContext`], which is threaded by
//! `&mut` through the item's call chain and finalized exactly once into an
//! immutable [`MigrationRecord`]. A [`ResultBuilder`] collects records in
//! processing order and is finished into a [`MigrationResult`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Item category of a run. Each category has its own bundle directory and
/// summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Documents,
    Binaries,
}

impl Category {
    pub const ALL: [Category; 2] = [Category::Documents, Category::Binaries];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Documents => "documents",
            Category::Binaries => "binaries",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute counting reference values that could not be resolved.
pub const ATTR_DANGLING_REFERENCES: &str = "danglingReferences";
/// Attribute counting reference values rewritten by the resolver.
pub const ATTR_RESOLVED_REFERENCES: &str = "resolvedReferences";
/// Attribute counting binary values written as bundle attachments.
pub const ATTR_EXTERNALIZED_BINARIES: &str = "externalizedBinaries";
/// Attribute counting tag directives skipped as malformed.
pub const ATTR_SKIPPED_TAGS: &str = "skippedTags";
/// Attribute holding the bundle-relative file of the item.
pub const ATTR_FILE: &str = "file";

/// In-flight record of the item being processed.
#[derive(Debug)]
pub struct RecordContext {
    category: Category,
    content_id: Option<String>,
    content_path: String,
    content_type: Option<String>,
    attributes: BTreeMap<String, String>,
}

impl RecordContext {
    pub fn begin(category: Category, content_path: impl Into<String>) -> Self {
        Self {
            category,
            content_id: None,
            content_path: content_path.into(),
            content_type: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn content_path(&self) -> &str {
        &self.content_path
    }

    pub fn set_content_id(&mut self, id: impl Into<String>) {
        self.content_id = Some(id.into());
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Add `by` to a numeric attribute, starting from zero.
    pub fn add_count(&mut self, key: &str, by: usize) {
        if by == 0 {
            return;
        }
        let current = self
            .attributes
            .get(key)
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);
        self.attributes
            .insert(key.to_string(), (current + by).to_string());
    }

    pub fn succeed(self) -> MigrationRecord {
        self.finish(true, None)
    }

    pub fn fail(self, message: impl Into<String>) -> MigrationRecord {
        self.finish(false, Some(message.into()))
    }

    fn finish(self, succeeded: bool, error_message: Option<String>) -> MigrationRecord {
        MigrationRecord {
            category: self.category,
            content_id: self.content_id,
            content_path: self.content_path,
            content_type: self.content_type,
            processed: true,
            succeeded,
            attributes: self.attributes,
            error_message,
        }
    }
}

/// Final outcome of one processed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    category: Category,
    content_id: Option<String>,
    content_path: String,
    content_type: Option<String>,
    processed: bool,
    succeeded: bool,
    attributes: BTreeMap<String, String>,
    error_message: Option<String>,
}

impl MigrationRecord {
    pub fn category(&self) -> Category {
        self.category
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn content_path(&self) -> &str {
        &self.content_path
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl CategoryStats {
    fn count(&mut self, record: &MigrationRecord) {
        self.total += 1;
        if record.succeeded {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Collects records during a run.
#[derive(Debug)]
pub struct ResultBuilder {
    started_at: DateTime<Utc>,
    entries: Vec<MigrationRecord>,
    errors: Vec<String>,
    cancelled: bool,
}

impl Default for ResultBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            entries: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn push(&mut self, record: MigrationRecord) {
        self.entries.push(record);
    }

    /// Record an error not tied to a single item.
    pub fn global_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Number of records collected so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> &[MigrationRecord] {
        &self.entries
    }

    pub fn finish(self) -> MigrationResult {
        let mut stats: BTreeMap<Category, CategoryStats> = Category::ALL
            .iter()
            .map(|c| (*c, CategoryStats::default()))
            .collect();
        for record in &self.entries {
            stats.entry(record.category).or_default().count(record);
        }
        MigrationResult {
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats,
            entries: self.entries,
            errors: self.errors,
            cancelled: self.cancelled,
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: BTreeMap<Category, CategoryStats>,
    entries: Vec<MigrationRecord>,
    errors: Vec<String>,
    cancelled: bool,
}

impl MigrationResult {
    pub fn stats(&self, category: Category) -> CategoryStats {
        self.stats.get(&category).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize {
        self.entries.len()
    }

    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|r| r.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn entries(&self) -> &[MigrationRecord] {
        &self.entries
    }

    pub fn records(&self, category: Category) -> impl Iterator<Item = &MigrationRecord> {
        self.entries.iter().filter(move |r| r.category == category)
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Human-readable header followed by one CSV row per record.
    pub fn summary(&self, category: Category) -> Result<String> {
        let stats = self.stats(category);
        let mut out = String::new();
        out.push_str(&format!("Ferry {} summary\n", category));
        out.push_str(&format!("Started:   {}\n", self.started_at.to_rfc3339()));
        out.push_str(&format!("Finished:  {}\n", self.finished_at.to_rfc3339()));
        out.push_str(&format!(
            "Duration:  {:.3}s\n",
            self.duration().num_milliseconds() as f64 / 1000.0
        ));
        out.push_str(&format!("Total:     {}\n", stats.total));
        out.push_str(&format!("Succeeded: {}\n", stats.succeeded));
        out.push_str(&format!("Failed:    {}\n", stats.failed));
        if self.cancelled {
            out.push_str("Cancelled: true\n");
        }
        out.push('\n');

        let mut writer = csv::Writer::from_writer(Vec::new());
        let csv_error = |e: csv::Error| CoreError::invalid_format("summary", e.to_string());
        writer
            .write_record([
                "SEQ",
                "PROCESSED",
                "SUCCEEDED",
                "ID",
                "PATH",
                "TYPE",
                "ATTRIBUTES",
                "ERROR",
            ])
            .map_err(csv_error)?;
        for (seq, record) in self.records(category).enumerate() {
            let attributes = record
                .attributes
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(";");
            writer
                .write_record([
                    (seq + 1).to_string(),
                    record.processed.to_string(),
                    record.succeeded.to_string(),
                    record.content_id.clone().unwrap_or_default(),
                    record.content_path.clone(),
                    record.content_type.clone().unwrap_or_default(),
                    attributes,
                    record.error_message.clone().unwrap_or_default(),
                ])
                .map_err(csv_error)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| CoreError::invalid_format("summary", e.to_string()))?;
        out.push_str(&String::from_utf8_lossy(&bytes));
        Ok(out)
    }
}
