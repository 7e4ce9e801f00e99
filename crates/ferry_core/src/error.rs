use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jobs::JobId;
use crate::model::ModelError;
use crate::store::StoreError;

/// Configuration-specific errors
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Content model error: {0}")]
    #[diagnostic(
        code(ferry_core::model_error),
        help("The content tree violates a structural invariant")
    )]
    Model(#[from] ModelError),

    #[error("Store operation '{operation}' failed")]
    #[diagnostic(
        code(ferry_core::store_error),
        help("Check that the content store is reachable and the item is not locked")
    )]
    Store {
        operation: String,
        #[source]
        cause: StoreError,
    },

    #[error("Item not found: {path}")]
    #[diagnostic(
        code(ferry_core::item_not_found),
        help("No content item exists at {path}")
    )]
    ItemNotFound { path: String },

    #[error("Serialization error")]
    #[diagnostic(
        code(ferry_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    SerializationError {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Invalid data format: {data_type}")]
    #[diagnostic(
        code(ferry_core::invalid_format),
        help("Check the format of {data_type}: {details}")
    )]
    InvalidFormat { data_type: String, details: String },

    #[error("Invalid pattern '{pattern}': {details}")]
    #[diagnostic(
        code(ferry_core::invalid_pattern),
        help("Patterns use glob syntax, e.g. `system:*` or `**/*[@ferry:docbase]`")
    )]
    InvalidPattern { pattern: String, details: String },

    #[error("IO error: {operation} failed")]
    #[diagnostic(
        code(ferry_core::io_error),
        help("Check file permissions and disk space")
    )]
    IoError {
        operation: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("Bundle error at {path}: {cause}")]
    #[diagnostic(
        code(ferry_core::bundle_error),
        help("The snapshot bundle is missing files or is not readable")
    )]
    BundleError { path: String, cause: String },

    #[error("Configuration error for field '{field}'")]
    #[diagnostic(
        code(ferry_core::configuration_error),
        help("Check configuration file at {config_path}\nExpected: {expected}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },

    #[error("Batch commit failed after {processed} items")]
    #[diagnostic(
        code(ferry_core::commit_failed),
        help("Items committed in earlier batches remain committed")
    )]
    CommitFailed {
        processed: usize,
        #[source]
        cause: StoreError,
    },

    #[error("Job not found: {id}")]
    #[diagnostic(
        code(ferry_core::job_not_found),
        help("The job never existed or was evicted from the history")
    )]
    JobNotFound { id: JobId },

    #[error("Job {id} is not running (status: {status})")]
    #[diagnostic(code(ferry_core::job_conflict), help("Only running jobs can be cancelled"))]
    JobConflict { id: JobId, status: String },

    #[error("Job {id} is still running")]
    #[diagnostic(
        code(ferry_core::job_still_running),
        help("Poll the job status until it completes")
    )]
    JobStillRunning { id: JobId },

    #[error("Job {id} failed: {message}")]
    #[diagnostic(code(ferry_core::job_failed))]
    JobFailed { id: JobId, message: String },

    #[error("Job {id} has no result artifact")]
    #[diagnostic(
        code(ferry_core::artifact_missing),
        help("Artifacts are deleted once their time-to-live elapses")
    )]
    ArtifactMissing { id: JobId },
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    pub fn store(operation: impl Into<String>, cause: StoreError) -> Self {
        Self::Store {
            operation: operation.into(),
            cause,
        }
    }

    pub fn io(operation: impl Into<String>, cause: std::io::Error) -> Self {
        Self::IoError {
            operation: operation.into(),
            cause,
        }
    }

    pub fn bundle(path: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::BundleError {
            path: path.into(),
            cause: cause.into(),
        }
    }

    pub fn invalid_format(data_type: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidFormat {
            data_type: data_type.into(),
            details: details.into(),
        }
    }

    pub fn invalid_pattern(pattern: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            details: details.into(),
        }
    }

    /// Whether this error aborts a whole run rather than a single item.
    pub fn is_run_scoped(&self) -> bool {
        matches!(
            self,
            CoreError::CommitFailed { .. }
                | CoreError::ConfigurationError { .. }
                | CoreError::BundleError { .. }
        )
    }

    /// Message recorded against a failed item.
    ///
    /// Includes the source chain so store causes are not lost behind the
    /// operation name.
    pub fn item_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Report;

    #[test]
    fn test_item_message_includes_store_cause() {
        let error = CoreError::store(
            "obtain editable",
            StoreError::CheckedOut {
                path: "/content/documents/news".to_string(),
                holder: "someone-else".to_string(),
            },
        );
        let message = error.item_message();
        assert!(message.starts_with("Store operation 'obtain editable' failed"));
        assert!(message.contains("someone-else"));
    }

    #[test]
    fn test_commit_failure_is_run_scoped() {
        let error = CoreError::CommitFailed {
            processed: 10,
            cause: StoreError::Backend("disk full".to_string()),
        };
        assert!(error.is_run_scoped());
        assert!(!CoreError::ItemNotFound { path: "/x".into() }.is_run_scoped());
    }

    #[test]
    fn test_configuration_error_help() {
        let error = CoreError::ConfigurationError {
            config_path: "ferry.toml".to_string(),
            field: "export.batch_size".to_string(),
            expected: "positive integer".to_string(),
            cause: ConfigError::InvalidValue {
                field: "batch_size".to_string(),
                reason: "must be at least 1".to_string(),
            },
        };
        let output = format!("{:?}", Report::new(error));
        assert!(output.contains("ferry.toml"));
    }
}
