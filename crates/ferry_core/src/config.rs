//! Configuration for migration runs.
//!
//! [`ExecutionParams`] is the read-only snapshot one run works from. It is
//! built through [`ExecutionParams::builder`] or converted from a
//! [`RunConfig`] section of the TOML file described by [`FerryConfig`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::binary::DEFAULT_INLINE_THRESHOLD;
use crate::error::{ConfigError, CoreError, Result};
use crate::model::SnapshotFormat;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_DOCUMENTS_ROOT: &str = "/content/documents";
pub const DEFAULT_BINARIES_ROOT: &str = "/content/assets";

/// Whether imported items are published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Leave imported items unpublished.
    #[default]
    None,
    /// Publish every imported item.
    All,
    /// Publish items whose snapshot was live when exported.
    ///
    /// Best effort: the flag reflects the source store at export time, which
    /// may no longer match it when the import runs.
    Live,
}

impl std::str::FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PublishMode::None),
            "all" => Ok(PublishMode::All),
            "live" => Ok(PublishMode::Live),
            other => Err(format!("unknown publish mode '{}'", other)),
        }
    }
}

/// Which items of one category a run processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemSelector {
    /// A store query. Only meaningful for export.
    Query { query: String },
    /// Path globs. An empty include list selects everything under the
    /// category root.
    Paths {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

impl Default for ItemSelector {
    fn default() -> Self {
        ItemSelector::Paths {
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

impl ItemSelector {
    pub fn paths<I, S>(include: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ItemSelector::Paths {
            include: include.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
        }
    }

    pub fn query(query: impl Into<String>) -> Self {
        ItemSelector::Query {
            query: query.into(),
        }
    }

    /// Path matcher for this selector. Queries match every path.
    pub fn matcher(&self) -> Result<PathMatcher> {
        match self {
            ItemSelector::Query { .. } => Ok(PathMatcher::default()),
            ItemSelector::Paths { include, exclude } => Ok(PathMatcher {
                include: if include.is_empty() {
                    None
                } else {
                    Some(compile_globs(include)?)
                },
                exclude: compile_globs(exclude)?,
            }),
        }
    }
}

/// Compiled include/exclude path globs.
#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathMatcher {
    pub fn matches(&self, path: &str) -> bool {
        self.include.as_ref().is_none_or(|set| set.is_match(path)) && !self.exclude.is_match(path)
    }
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| CoreError::invalid_pattern(pattern, e.to_string()))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CoreError::invalid_pattern(patterns.join(", "), e.to_string()))
}

// =============================================================================
// Execution parameters
// =============================================================================

/// Configuration snapshot for one run.
#[derive(Debug, Clone)]
pub struct ExecutionParams {
    batch_size: usize,
    throttle: Option<Duration>,
    publish: PublishMode,
    binary_threshold: usize,
    reference_properties: Vec<String>,
    documents: ItemSelector,
    binaries: ItemSelector,
    tags: Vec<String>,
    format: SnapshotFormat,
    documents_root: String,
    binaries_root: String,
    extra_excludes: Vec<String>,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            throttle: None,
            publish: PublishMode::None,
            binary_threshold: DEFAULT_INLINE_THRESHOLD,
            reference_properties: Vec::new(),
            documents: ItemSelector::default(),
            binaries: ItemSelector::default(),
            tags: Vec::new(),
            format: SnapshotFormat::Json,
            documents_root: DEFAULT_DOCUMENTS_ROOT.to_string(),
            binaries_root: DEFAULT_BINARIES_ROOT.to_string(),
            extra_excludes: Vec::new(),
        }
    }
}

impl ExecutionParams {
    pub fn builder() -> ExecutionParamsBuilder {
        ExecutionParamsBuilder::default()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn throttle(&self) -> Option<Duration> {
        self.throttle
    }

    pub fn publish(&self) -> PublishMode {
        self.publish
    }

    pub fn binary_threshold(&self) -> usize {
        self.binary_threshold
    }

    /// Reference property names in addition to the conventional one.
    pub fn reference_properties(&self) -> &[String] {
        &self.reference_properties
    }

    pub fn documents(&self) -> &ItemSelector {
        &self.documents
    }

    pub fn binaries(&self) -> &ItemSelector {
        &self.binaries
    }

    /// Raw `name=value` tag directives.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn format(&self) -> SnapshotFormat {
        self.format
    }

    pub fn documents_root(&self) -> &str {
        &self.documents_root
    }

    pub fn binaries_root(&self) -> &str {
        &self.binaries_root
    }

    /// Exclude patterns added to the default item filter.
    pub fn extra_excludes(&self) -> &[String] {
        &self.extra_excludes
    }
}

#[derive(Debug, Default)]
pub struct ExecutionParamsBuilder {
    params: ExecutionParams,
}

impl ExecutionParamsBuilder {
    /// Items per batch commit (at least 1).
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.params.batch_size = batch_size;
        self
    }

    /// Pause after every batch. A zero duration disables throttling.
    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.params.throttle = (!throttle.is_zero()).then_some(throttle);
        self
    }

    pub fn publish(mut self, publish: PublishMode) -> Self {
        self.params.publish = publish;
        self
    }

    pub fn binary_threshold(mut self, threshold: usize) -> Self {
        self.params.binary_threshold = threshold;
        self
    }

    pub fn reference_property(mut self, name: impl Into<String>) -> Self {
        self.params.reference_properties.push(name.into());
        self
    }

    pub fn reference_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params
            .reference_properties
            .extend(names.into_iter().map(Into::into));
        self
    }

    pub fn documents(mut self, selector: ItemSelector) -> Self {
        self.params.documents = selector;
        self
    }

    pub fn binaries(mut self, selector: ItemSelector) -> Self {
        self.params.binaries = selector;
        self
    }

    pub fn tag(mut self, directive: impl Into<String>) -> Self {
        self.params.tags.push(directive.into());
        self
    }

    pub fn tags<I, S>(mut self, directives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params.tags.extend(directives.into_iter().map(Into::into));
        self
    }

    pub fn format(mut self, format: SnapshotFormat) -> Self {
        self.params.format = format;
        self
    }

    pub fn documents_root(mut self, root: impl Into<String>) -> Self {
        self.params.documents_root = root.into();
        self
    }

    pub fn binaries_root(mut self, root: impl Into<String>) -> Self {
        self.params.binaries_root = root.into();
        self
    }

    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.params.extra_excludes.push(pattern.into());
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<ExecutionParams> {
        let params = self.params;
        if params.batch_size == 0 {
            return Err(invalid_param("batch_size", "must be at least 1"));
        }
        for (field, root) in [
            ("documents_root", &params.documents_root),
            ("binaries_root", &params.binaries_root),
        ] {
            if !root.starts_with('/') {
                return Err(invalid_param(field, "must be an absolute store path"));
            }
        }
        params.documents.matcher()?;
        params.binaries.matcher()?;
        Ok(params)
    }
}

fn invalid_param(field: &str, reason: &str) -> CoreError {
    CoreError::ConfigurationError {
        config_path: "<execution parameters>".to_string(),
        field: field.to_string(),
        expected: reason.to_string(),
        cause: ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        },
    }
}

// =============================================================================
// Configuration file
// =============================================================================

/// Top-level `ferry.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    pub repository: RepositoryConfig,
    pub bundle: BundleConfig,
    pub jobs: JobsConfig,
    pub export: RunConfig,
    pub import: RunConfig,
}

/// The repository snapshot file runs operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// JSON repository file. Created on first save when missing.
    pub path: PathBuf,
    /// User name recorded as holder of checked-out drafts.
    pub user: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repository.json"),
            user: "ferry".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Bundle directory (export target, import source).
    pub path: PathBuf,
    pub format: SnapshotFormat,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ferry-bundle"),
            format: SnapshotFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Jobs allowed to run at the same time.
    pub workers: usize,
    /// Finished jobs kept for status queries.
    pub history_limit: usize,
    /// Seconds a result artifact is kept after its job finishes.
    pub artifact_ttl_secs: u64,
    /// Where export archives are written. Defaults to the system temp dir.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            history_limit: 64,
            artifact_ttl_secs: 3600,
            artifact_dir: None,
        }
    }
}

/// One `[export]` or `[import]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub batch_size: usize,
    pub throttle_ms: u64,
    pub publish: PublishMode,
    pub binary_threshold: usize,
    pub reference_properties: Vec<String>,
    pub tags: Vec<String>,
    pub documents_root: String,
    pub binaries_root: String,
    pub excludes: Vec<String>,
    pub documents: ItemSelector,
    pub binaries: ItemSelector,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            throttle_ms: 0,
            publish: PublishMode::None,
            binary_threshold: DEFAULT_INLINE_THRESHOLD,
            reference_properties: Vec::new(),
            tags: Vec::new(),
            documents_root: DEFAULT_DOCUMENTS_ROOT.to_string(),
            binaries_root: DEFAULT_BINARIES_ROOT.to_string(),
            excludes: Vec::new(),
            documents: ItemSelector::default(),
            binaries: ItemSelector::default(),
        }
    }
}

impl RunConfig {
    pub fn to_params(&self, format: SnapshotFormat) -> Result<ExecutionParams> {
        let mut builder = ExecutionParams::builder()
            .batch_size(self.batch_size)
            .throttle(Duration::from_millis(self.throttle_ms))
            .publish(self.publish)
            .binary_threshold(self.binary_threshold)
            .reference_properties(self.reference_properties.iter().cloned())
            .documents(self.documents.clone())
            .binaries(self.binaries.clone())
            .tags(self.tags.iter().cloned())
            .format(format)
            .documents_root(self.documents_root.clone())
            .binaries_root(self.binaries_root.clone());
        for pattern in &self.excludes {
            builder = builder.exclude(pattern.clone());
        }
        builder.build()
    }
}

fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Load configuration from a TOML file.
///
/// Relative paths are resolved against the file's directory.
pub async fn load_config(path: &Path) -> Result<FerryConfig> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: path.display().to_string(),
                field: "file".to_string(),
                expected: "readable TOML file".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;

    let mut config: FerryConfig =
        toml::from_str(&content).map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "content".to_string(),
            expected: "valid TOML configuration".to_string(),
            cause: ConfigError::TomlParse(e.to_string()),
        })?;

    let base_dir = path.parent().unwrap_or(Path::new("."));
    config.repository.path = resolve_path(base_dir, &config.repository.path);
    config.bundle.path = resolve_path(base_dir, &config.bundle.path);
    if let Some(dir) = &config.jobs.artifact_dir {
        config.jobs.artifact_dir = Some(resolve_path(base_dir, dir));
    }

    Ok(config)
}

/// Write configuration as TOML, creating the parent directory.
pub async fn save_config(config: &FerryConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CoreError::ConfigurationError {
                config_path: parent.display().to_string(),
                field: "directory".to_string(),
                expected: "writable directory".to_string(),
                cause: ConfigError::Io(e.to_string()),
            })?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| CoreError::ConfigurationError {
        config_path: path.display().to_string(),
        field: "serialization".to_string(),
        expected: "serializable config structure".to_string(),
        cause: ConfigError::TomlSerialize(e.to_string()),
    })?;

    tokio::fs::write(path, content)
        .await
        .map_err(|e| CoreError::ConfigurationError {
            config_path: path.display().to_string(),
            field: "file".to_string(),
            expected: "writable file location".to_string(),
            cause: ConfigError::Io(e.to_string()),
        })
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("ferry.toml")];
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("ferry").join("config.toml"));
    }
    paths
}

/// Load the first config found in [`config_paths`], or the defaults.
pub async fn load_config_from_standard_locations() -> Result<FerryConfig> {
    for path in config_paths() {
        if path.exists() {
            return load_config(&path).await;
        }
    }
    Ok(FerryConfig::default())
}
