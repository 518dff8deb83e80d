//! Consistency validation of an export closure
//!
//! Runs between traversal and serialization. Every check here is
//! fail-fast: a single violation aborts the export before anything is
//! written.

use crate::error::ArchiveError;
use prov_graph::NodeRecord;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Callable license check; an `Err` counts as a violation
pub type LicenseCheck = dyn Fn(&str) -> Result<bool, String> + Send + Sync;

/// A license constraint
///
/// Used both as an allow-list and as a forbid-list. Deserializes from an
/// optional list of license identifiers; predicates are code-only.
#[derive(Clone, Default, Deserialize)]
#[serde(from = "Option<Vec<String>>")]
pub enum LicensePolicy {
    /// No constraint
    #[default]
    Unrestricted,
    /// Exact license identifiers
    List(Vec<String>),
    /// Arbitrary predicate over the license identifier
    Predicate(Arc<LicenseCheck>),
}

impl LicensePolicy {
    /// Policy from a list of license identifiers
    #[must_use]
    pub fn list<I, S>(licenses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(licenses.into_iter().map(Into::into).collect())
    }

    /// Policy from a predicate
    #[must_use]
    pub fn predicate<F>(check: F) -> Self
    where
        F: Fn(&str) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(check))
    }

    #[inline]
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }

    /// Evaluate the policy; `None` when unrestricted
    fn matches(&self, license: &str) -> Option<Result<bool, String>> {
        match self {
            Self::Unrestricted => None,
            Self::List(list) => Some(Ok(list.iter().any(|l| l == license))),
            Self::Predicate(check) => Some(check(license)),
        }
    }
}

impl From<Option<Vec<String>>> for LicensePolicy {
    fn from(value: Option<Vec<String>>) -> Self {
        value.map_or(Self::Unrestricted, Self::List)
    }
}

impl fmt::Debug for LicensePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => f.write_str("Unrestricted"),
            Self::List(list) => f.debug_tuple("List").field(list).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Reject nodes whose license is not allowed or is forbidden
///
/// Nodes without a declared license are not checked.
///
/// # Errors
/// `ArchiveError::LicensingViolation` for the first offending node
pub fn check_licenses<'a, I>(
    nodes: I,
    allowed: &LicensePolicy,
    forbidden: &LicensePolicy,
) -> Result<(), ArchiveError>
where
    I: IntoIterator<Item = &'a NodeRecord>,
{
    if allowed.is_unrestricted() && forbidden.is_unrestricted() {
        return Ok(());
    }

    for node in nodes {
        let Some(license) = node.license() else {
            continue;
        };
        let violation = |reason: String| ArchiveError::LicensingViolation {
            node: node.uuid,
            license: license.to_string(),
            reason,
        };

        match allowed.matches(license) {
            None | Some(Ok(true)) => {}
            Some(Ok(false)) => return Err(violation("not in allowed licenses".to_string())),
            Some(Err(e)) => return Err(violation(format!("allowed-license check failed: {e}"))),
        }
        match forbidden.matches(license) {
            None | Some(Ok(false)) => {}
            Some(Ok(true)) => return Err(violation("license is forbidden".to_string())),
            Some(Err(e)) => return Err(violation(format!("forbidden-license check failed: {e}"))),
        }
    }
    Ok(())
}

/// Reject process nodes that have not been sealed
///
/// # Errors
/// `ArchiveError::SealViolation` for the first unsealed process
pub fn check_sealed<'a, I>(nodes: I) -> Result<(), ArchiveError>
where
    I: IntoIterator<Item = &'a NodeRecord>,
{
    match nodes
        .into_iter()
        .find(|node| node.node_type.is_process() && !node.is_sealed())
    {
        Some(node) => Err(ArchiveError::SealViolation(node.uuid)),
        None => Ok(()),
    }
}
