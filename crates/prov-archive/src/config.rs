//! Export and import configuration
//!
//! Both configs are plain serde structs with defaults, so they can be built
//! in code with the `with_*` builders or embedded in a host TOML file.

use crate::consistency::LicensePolicy;
use crate::merge::{CommentMode, ExtrasMode, NewExtrasMode};
use prov_graph::{ConfigError, Operation, RuleSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default number of uuids per store query or bulk write
pub const DEFAULT_BATCH_SIZE: usize = 1000;

fn parse_toml<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, ConfigError> {
    toml::from_str(s).map_err(|e| ConfigError::Invalid(e.to_string()))
}

fn check_batch_size(batch_size: usize) -> Result<(), ConfigError> {
    if batch_size == 0 {
        return Err(ConfigError::Invalid("batch_size must be positive".to_string()));
    }
    Ok(())
}

/// Archive export configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Include logs of every exported node
    pub include_logs: bool,
    /// Include comments of every exported node
    pub include_comments: bool,
    /// Licenses a node may carry
    pub allowed_licenses: LicensePolicy,
    /// Licenses a node must not carry
    pub forbidden_licenses: LicensePolicy,
    /// Toggles applied on top of the export rule defaults
    pub rule_overrides: BTreeMap<String, bool>,
    /// Uuids per store lookup
    pub batch_size: usize,
    /// Replace an existing archive at the target path
    pub overwrite: bool,
}

impl ExportConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// Malformed TOML or invalid field values
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_toml(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration without running an export
    ///
    /// # Errors
    /// Invalid rule overrides or batch size
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_batch_size(self.batch_size)?;
        self.rules().map(|_| ())
    }

    /// Export rule set with overrides applied
    ///
    /// # Errors
    /// Unknown or non-toggleable rule overrides
    pub fn rules(&self) -> Result<RuleSet, ConfigError> {
        RuleSet::with_overrides(
            Operation::Export,
            self.rule_overrides.iter().map(|(k, v)| (k.as_str(), *v)),
        )
    }

    /// With logs included or excluded
    #[inline]
    #[must_use]
    pub fn with_logs(mut self, include: bool) -> Self {
        self.include_logs = include;
        self
    }

    /// With comments included or excluded
    #[inline]
    #[must_use]
    pub fn with_comments(mut self, include: bool) -> Self {
        self.include_comments = include;
        self
    }

    /// With allowed licenses
    #[inline]
    #[must_use]
    pub fn with_allowed_licenses(mut self, policy: LicensePolicy) -> Self {
        self.allowed_licenses = policy;
        self
    }

    /// With forbidden licenses
    #[inline]
    #[must_use]
    pub fn with_forbidden_licenses(mut self, policy: LicensePolicy) -> Self {
        self.forbidden_licenses = policy;
        self
    }

    /// With one traversal rule toggled
    #[must_use]
    pub fn with_rule(mut self, rule: impl Into<String>, enabled: bool) -> Self {
        self.rule_overrides.insert(rule.into(), enabled);
        self
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With overwrite of an existing archive
    #[inline]
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            include_logs: true,
            include_comments: true,
            allowed_licenses: LicensePolicy::Unrestricted,
            forbidden_licenses: LicensePolicy::Unrestricted,
            rule_overrides: BTreeMap::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            overwrite: false,
        }
    }
}

/// Archive import configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Extras of newly created nodes
    pub extras_mode_new: NewExtrasMode,
    /// Extras merge for nodes already in the store
    pub extras_mode_existing: ExtrasMode,
    /// Comment merge for comments already in the store
    pub comment_mode: CommentMode,
    /// Drop references to nodes neither archive nor store contain
    pub ignore_unknown_nodes: bool,
    /// Separator between a colliding label and its counter
    pub duplicate_suffix: String,
    /// First counter value tried on a label collision
    pub duplicate_start: u32,
    /// Uuids per store query or bulk write
    pub batch_size: usize,
    /// Label of a new group receiving every archived node
    pub import_group: Option<String>,
}

impl ImportConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from TOML
    ///
    /// # Errors
    /// Malformed TOML, invalid mode codes or batch size
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_toml(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration without running an import
    ///
    /// # Errors
    /// Invalid batch size or empty import group label
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_batch_size(self.batch_size)?;
        if self.import_group.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid(
                "import_group label must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// With extras handling for new nodes
    #[inline]
    #[must_use]
    pub fn with_extras_mode_new(mut self, mode: NewExtrasMode) -> Self {
        self.extras_mode_new = mode;
        self
    }

    /// With extras merge for existing nodes
    #[inline]
    #[must_use]
    pub fn with_extras_mode_existing(mut self, mode: ExtrasMode) -> Self {
        self.extras_mode_existing = mode;
        self
    }

    /// With comment merge mode
    #[inline]
    #[must_use]
    pub fn with_comment_mode(mut self, mode: CommentMode) -> Self {
        self.comment_mode = mode;
        self
    }

    /// With unknown node references dropped instead of rejected
    #[inline]
    #[must_use]
    pub fn with_ignore_unknown_nodes(mut self, ignore: bool) -> Self {
        self.ignore_unknown_nodes = ignore;
        self
    }

    /// With label collision suffix pattern
    #[must_use]
    pub fn with_duplicate_suffix(mut self, suffix: impl Into<String>, start: u32) -> Self {
        self.duplicate_suffix = suffix.into();
        self.duplicate_start = start;
        self
    }

    /// With batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With import group label
    #[must_use]
    pub fn with_import_group(mut self, label: impl Into<String>) -> Self {
        self.import_group = Some(label.into());
        self
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            extras_mode_new: NewExtrasMode::Import,
            extras_mode_existing: ExtrasMode::default(),
            comment_mode: CommentMode::Newest,
            ignore_unknown_nodes: false,
            duplicate_suffix: "_".to_string(),
            duplicate_start: 1,
            batch_size: DEFAULT_BATCH_SIZE,
            import_group: None,
        }
    }
}
