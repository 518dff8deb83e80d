//! Error types for the provenance graph core
//!
//! Provides error handling for:
//! - Traversal rule configuration (unknown, missing or non-toggleable rules)
//! - Merge mode codes supplied by callers
//! - Failures reported by the backing [`GraphStore`](crate::GraphStore)

use crate::entity::{EntityId, EntityKind};

/// Configuration errors
///
/// Raised before any traversal or merge step runs, so they never leave a
/// store in a partially modified state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Rule name does not match any `{linktype}_{direction}` pair
    #[error("unknown traversal rule: '{0}'")]
    UnknownRule(String),

    /// A rule required by the operation was not supplied
    #[error("missing traversal rule: '{0}'")]
    MissingRule(String),

    /// Rule value was present but not a strict boolean
    #[error("traversal rule '{name}' must be a boolean, got {found}")]
    NotBoolean { name: String, found: String },

    /// Caller tried to change a rule the operation fixes
    #[error("traversal rule '{rule}' cannot be toggled for the {operation} operation")]
    NotToggleable { rule: String, operation: String },

    /// Invalid merge mode code or value
    #[error("invalid {field} '{value}': {reason}")]
    InvalidMode {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Any other malformed configuration value
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create invalid mode error
    pub fn invalid_mode(
        field: &'static str,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMode {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by a graph store implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Unique or referential constraint rejected the write
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Entity addressed by an update does not exist
    #[error("{kind} {key} not found in store")]
    Missing { kind: EntityKind, key: String },

    /// Commit or rollback without an open transaction
    #[error("no open transaction")]
    NoTransaction,

    /// Backend-specific failure (I/O, connection, injected fault)
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create missing-entity error
    pub fn missing(kind: EntityKind, key: impl ToString) -> Self {
        Self::Missing {
            kind,
            key: key.to_string(),
        }
    }
}

/// Errors from graph traversal
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Invalid traversal configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Starting node does not exist
    #[error("node {0} not found")]
    NodeNotFound(EntityId),

    /// Underlying store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl GraphError {
    /// Check whether the error was raised by validation (no store access)
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Config(_) | Self::NodeNotFound(_))
    }
}
