//! Error types for archive export and merge
//!
//! Validation errors (configuration, license, seal, version) are raised
//! before any store mutation. Failures after that point roll back the
//! whole import call.

use prov_graph::{ConfigError, GraphError, StoreError};
use std::path::PathBuf;

/// Main archive error type
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Invalid rule set, mode code or configuration file
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A node's license failed the allow/forbid checks
    #[error("licensing violation: node {node} has license '{license}': {reason}")]
    LicensingViolation {
        node: uuid::Uuid,
        license: String,
        reason: String,
    },

    /// Process node is not sealed and cannot leave the store
    #[error("cannot export unsealed process node {0}")]
    SealViolation(uuid::Uuid),

    /// Archive format version not supported by this reader
    #[error("archive format version '{found}' is not supported (supported: {supported})")]
    VersionIncompatible { found: String, supported: String },

    /// A link, membership or starting point refers to an absent node
    #[error("unknown reference to {reference} ({context})")]
    UnknownReference { reference: String, context: String },

    /// Underlying persistence failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// IO error reading or writing an archive folder
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed archive content
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Archive content does not match its manifest
    #[error("integrity check failed for {what}: expected {expected}, got {actual}")]
    Integrity {
        what: String,
        expected: String,
        actual: String,
    },

    /// Target path already exists and overwrite was not requested
    #[error("archive already exists at {0}")]
    ArchiveExists(PathBuf),
}

impl ArchiveError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create unknown reference error
    pub fn unknown_reference(reference: impl ToString, context: impl Into<String>) -> Self {
        Self::UnknownReference {
            reference: reference.to_string(),
            context: context.into(),
        }
    }

    /// Create integrity error
    pub fn integrity(
        what: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::Integrity {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Check if the error was raised by a fail-fast validation step
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::LicensingViolation { .. }
                | Self::SealViolation(_)
                | Self::VersionIncompatible { .. }
        )
    }
}

impl From<GraphError> for ArchiveError {
    fn from(value: GraphError) -> Self {
        match value {
            GraphError::Config(e) => Self::Configuration(e),
            GraphError::NodeNotFound(id) => Self::unknown_reference(id, "starting node"),
            GraphError::Store(e) => Self::Store(e),
        }
    }
}
