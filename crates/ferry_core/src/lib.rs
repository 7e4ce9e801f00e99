//! Ferry Core - Content Tree Migration Engine
//!
//! This crate moves content items between a hierarchical content store and
//! a directory of snapshot files. Exports capture items as self-describing
//! trees, imports recreate them in another store, re-resolving identity
//! references and replaying the publication state.

pub mod batch;
pub mod binary;
pub mod bundle;
pub mod config;
pub mod error;
pub mod filter;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod record;
pub mod resolver;
pub mod store;

#[cfg(test)]
pub mod test_helpers;

pub use bundle::Bundle;
pub use config::{ExecutionParams, FerryConfig, ItemSelector, PublishMode};
pub use error::{ConfigError, CoreError, Result};
pub use jobs::{JobId, JobKind, JobMonitor, JobStatus, MonitorConfig, ProcessStatus};
pub use model::{ContentNode, ContentProperty, ContentValue, SnapshotFormat};
pub use pipeline::{Exporter, Importer, ProgressListener, RunContext};
pub use record::{Category, MigrationRecord, MigrationResult};
pub use store::memory::MemoryRepository;
pub use store::{ContentStore, Workflow};
