//! Traversal rule sets
//!
//! A [`RuleSet`] holds one boolean per [`Rule`] for a given [`Operation`].
//! It can only be built through constructors that enforce the operation's
//! toggleability table, so a value of this type is always valid.

use crate::entity::NodeType;
use crate::error::ConfigError;
use crate::link::{Operation, Rule};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Fully specified set of traversal rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSet {
    operation: Operation,
    enabled: [bool; Rule::COUNT],
}

impl RuleSet {
    /// Defaults of an operation
    #[must_use]
    pub fn defaults(operation: Operation) -> Self {
        let table = operation.table();
        let mut enabled = [false; Rule::COUNT];
        for (slot, spec) in enabled.iter_mut().zip(table) {
            *slot = spec.default;
        }
        Self { operation, enabled }
    }

    /// Override a single rule
    ///
    /// # Errors
    /// - `ConfigError::UnknownRule` if the rule has no slot in the table
    /// - `ConfigError::NotToggleable` if the operation fixes the rule and
    ///   `value` differs from its default
    pub fn with_rule(mut self, rule: Rule, value: bool) -> Result<Self, ConfigError> {
        let (Some(index), Some(spec)) = (rule.index(), self.operation.spec(rule)) else {
            return Err(ConfigError::UnknownRule(rule.name()));
        };
        if !spec.toggleable && spec.default != value {
            return Err(ConfigError::NotToggleable {
                rule: rule.name(),
                operation: self.operation.to_string(),
            });
        }
        self.enabled[index] = value;
        Ok(self)
    }

    /// Apply a partial set of named overrides on top of the defaults
    ///
    /// # Errors
    /// Unknown rule names or non-toggleable overrides
    pub fn with_overrides<'a, I>(operation: Operation, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        overrides
            .into_iter()
            .try_fold(Self::defaults(operation), |set, (name, value)| {
                set.with_rule(name.parse()?, value)
            })
    }

    /// Build from a complete name -> value map
    ///
    /// Every rule of the operation must be present, every key must be a
    /// known rule, and every value must be a JSON boolean.
    ///
    /// # Errors
    /// `UnknownRule`, `MissingRule`, `NotBoolean` or `NotToggleable`
    pub fn from_map(operation: Operation, map: &Map<String, Value>) -> Result<Self, ConfigError> {
        let mut parsed = Vec::with_capacity(map.len());
        for (name, value) in map {
            let rule: Rule = name.parse()?;
            let Value::Bool(flag) = value else {
                return Err(ConfigError::NotBoolean {
                    name: name.clone(),
                    found: value.to_string(),
                });
            };
            parsed.push((rule, *flag));
        }

        if let Some(missing) = Rule::ALL
            .iter()
            .find(|rule| !parsed.iter().any(|(r, _)| r == *rule))
        {
            return Err(ConfigError::MissingRule(missing.name()));
        }

        parsed
            .into_iter()
            .try_fold(Self::defaults(operation), |set, (rule, value)| {
                set.with_rule(rule, value)
            })
    }

    /// Build from a JSON value, which must be an object
    ///
    /// # Errors
    /// Non-object values, plus everything [`RuleSet::from_map`] rejects
    pub fn from_value(operation: Operation, value: &Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Self::from_map(operation, map),
            other => Err(ConfigError::Invalid(format!(
                "traversal rules must be an object, got {other}"
            ))),
        }
    }

    /// Operation this set was built for
    #[inline]
    #[must_use]
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Check if a rule is enabled
    #[inline]
    #[must_use]
    pub fn is_enabled(&self, rule: Rule) -> bool {
        rule.index().is_some_and(|i| self.enabled[i])
    }

    /// Enabled rules, in canonical order
    pub fn enabled_rules(&self) -> impl Iterator<Item = Rule> + '_ {
        Rule::ALL.into_iter().filter(|rule| self.is_enabled(*rule))
    }

    /// Enabled rules that start from nodes of `node_type`
    pub fn rules_for(&self, node_type: NodeType) -> impl Iterator<Item = Rule> + '_ {
        self.enabled_rules()
            .filter(move |rule| rule.applies_to() == Some(node_type))
    }

    /// Name -> value view, for manifests and logs
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        Rule::ALL
            .iter()
            .map(|rule| (rule.name(), self.is_enabled(*rule)))
            .collect()
    }
}
