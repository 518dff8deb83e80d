//! Link model
//!
//! The fixed vocabulary of edge kinds, the node types each kind may connect,
//! and the per-operation traversal defaults for every
//! `{linktype}_{direction}` rule.

use crate::entity::{EntityId, NodeType};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Edge kinds of the provenance graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Calculation -> Data it created
    Create,
    /// Workflow -> Data it returned
    Return,
    /// Data -> Calculation consuming it
    InputCalc,
    /// Data -> Workflow consuming it
    InputWork,
    /// Workflow -> Calculation it called
    CallCalc,
    /// Workflow -> Workflow it called
    CallWork,
    /// Legacy links with no declared semantics; never traversed
    Unspecified,
}

impl LinkType {
    /// Link types that participate in traversal
    pub const TRAVERSABLE: [LinkType; 6] = [
        LinkType::Create,
        LinkType::Return,
        LinkType::InputCalc,
        LinkType::InputWork,
        LinkType::CallCalc,
        LinkType::CallWork,
    ];

    /// Stable lowercase name, as used in rule names and archives
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Create => "create",
            LinkType::Return => "return",
            LinkType::InputCalc => "input_calc",
            LinkType::InputWork => "input_work",
            LinkType::CallCalc => "call_calc",
            LinkType::CallWork => "call_work",
            LinkType::Unspecified => "unspecified",
        }
    }

    /// Allowed (source, target) node types; `None` for [`LinkType::Unspecified`]
    #[must_use]
    pub fn endpoints(&self) -> Option<(NodeType, NodeType)> {
        match self {
            LinkType::Create => Some((NodeType::Calculation, NodeType::Data)),
            LinkType::Return => Some((NodeType::Workflow, NodeType::Data)),
            LinkType::InputCalc => Some((NodeType::Data, NodeType::Calculation)),
            LinkType::InputWork => Some((NodeType::Data, NodeType::Workflow)),
            LinkType::CallCalc => Some((NodeType::Workflow, NodeType::Calculation)),
            LinkType::CallWork => Some((NodeType::Workflow, NodeType::Workflow)),
            LinkType::Unspecified => None,
        }
    }

    /// Check whether a link of this type may connect the given node types
    #[must_use]
    pub fn allows(&self, source: NodeType, target: NodeType) -> bool {
        self.endpoints()
            .map_or(true, |(s, t)| s == source && t == target)
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(LinkType::Create),
            "return" => Ok(LinkType::Return),
            "input_calc" => Ok(LinkType::InputCalc),
            "input_work" => Ok(LinkType::InputWork),
            "call_calc" => Ok(LinkType::CallCalc),
            "call_work" => Ok(LinkType::CallWork),
            "unspecified" => Ok(LinkType::Unspecified),
            other => Err(ConfigError::Invalid(format!("unknown link type '{other}'"))),
        }
    }
}

/// Direction in which a link is followed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Source to target
    Forward,
    /// Target to source
    Backward,
}

impl Direction {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
        }
    }
}

/// Directed, typed edge between two stored nodes
///
/// Identity is the whole tuple; stores collapse duplicates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkRow {
    pub input: EntityId,
    pub output: EntityId,
    pub label: String,
    pub link_type: LinkType,
}

/// Neighbor returned by a store link query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Neighbor {
    pub id: EntityId,
    pub label: String,
}

/// A traversal rule: one link type followed in one direction
///
/// Only the rules in [`Rule::ALL`] have a slot in a rule table; a rule
/// over [`LinkType::Unspecified`] can be named but never enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rule {
    link_type: LinkType,
    direction: Direction,
}

impl Rule {
    /// Number of rules (traversable link types x directions)
    pub const COUNT: usize = 12;

    /// Every rule, in canonical order
    pub const ALL: [Rule; Rule::COUNT] = [
        Rule::new(LinkType::InputCalc, Direction::Forward),
        Rule::new(LinkType::InputCalc, Direction::Backward),
        Rule::new(LinkType::Create, Direction::Forward),
        Rule::new(LinkType::Create, Direction::Backward),
        Rule::new(LinkType::Return, Direction::Forward),
        Rule::new(LinkType::Return, Direction::Backward),
        Rule::new(LinkType::InputWork, Direction::Forward),
        Rule::new(LinkType::InputWork, Direction::Backward),
        Rule::new(LinkType::CallCalc, Direction::Forward),
        Rule::new(LinkType::CallCalc, Direction::Backward),
        Rule::new(LinkType::CallWork, Direction::Forward),
        Rule::new(LinkType::CallWork, Direction::Backward),
    ];

    /// Create rule
    #[inline]
    #[must_use]
    pub const fn new(link_type: LinkType, direction: Direction) -> Self {
        Self {
            link_type,
            direction,
        }
    }

    /// Link type followed
    #[inline]
    #[must_use]
    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    /// Direction followed
    #[inline]
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Position in [`Rule::ALL`]; `None` for rules over untraversable links
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        let base = match self.link_type {
            LinkType::InputCalc => 0,
            LinkType::Create => 2,
            LinkType::Return => 4,
            LinkType::InputWork => 6,
            LinkType::CallCalc => 8,
            LinkType::CallWork => 10,
            LinkType::Unspecified => return None,
        };
        Some(match self.direction {
            Direction::Forward => base,
            Direction::Backward => base + 1,
        })
    }

    /// Rule name in `{linktype}_{direction}` form
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}_{}", self.link_type.as_str(), self.direction.as_str())
    }

    /// Node type a rule is applied from
    ///
    /// Forward rules start at the link source, backward rules at the target.
    #[must_use]
    pub fn applies_to(&self) -> Option<NodeType> {
        let (source, target) = self.link_type.endpoints()?;
        Some(match self.direction {
            Direction::Forward => source,
            Direction::Backward => target,
        })
    }

    /// Node type a rule reaches
    #[must_use]
    pub fn reaches(&self) -> Option<NodeType> {
        let (source, target) = self.link_type.endpoints()?;
        Some(match self.direction {
            Direction::Forward => target,
            Direction::Backward => source,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.link_type.as_str(), self.direction.as_str())
    }
}

impl FromStr for Rule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rule::ALL
            .iter()
            .find(|rule| rule.name() == s)
            .copied()
            .ok_or_else(|| ConfigError::UnknownRule(s.to_string()))
    }
}

/// Default value and toggleability of one rule in one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleSpec {
    /// Whether the rule is followed unless overridden
    pub default: bool,
    /// Whether callers may override the default
    pub toggleable: bool,
}

impl RuleSpec {
    const fn new(default: bool, toggleable: bool) -> Self {
        Self {
            default,
            toggleable,
        }
    }
}

/// Standard traversal operations with their own rule tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Generic traversal: everything off, everything toggleable
    Default,
    /// Closure of nodes that must travel together in an archive
    Export,
    /// Closure of nodes a cascade delete removes
    Delete,
}

impl Operation {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Default => "default",
            Operation::Export => "export",
            Operation::Delete => "delete",
        }
    }

    /// Rule table, indexed like [`Rule::ALL`]
    #[must_use]
    pub fn table(&self) -> [RuleSpec; Rule::COUNT] {
        const ON_FIXED: RuleSpec = RuleSpec::new(true, false);
        const OFF_FIXED: RuleSpec = RuleSpec::new(false, false);
        const ON: RuleSpec = RuleSpec::new(true, true);
        const OFF: RuleSpec = RuleSpec::new(false, true);

        match self {
            Operation::Default => [OFF; Rule::COUNT],
            Operation::Export => [
                OFF,       // input_calc_forward
                ON_FIXED,  // input_calc_backward
                ON_FIXED,  // create_forward
                ON,        // create_backward
                ON_FIXED,  // return_forward
                OFF,       // return_backward
                OFF,       // input_work_forward
                ON_FIXED,  // input_work_backward
                ON_FIXED,  // call_calc_forward
                OFF,       // call_calc_backward
                ON_FIXED,  // call_work_forward
                OFF,       // call_work_backward
            ],
            Operation::Delete => [
                ON_FIXED,  // input_calc_forward
                OFF_FIXED, // input_calc_backward
                ON_FIXED,  // create_forward
                OFF_FIXED, // create_backward
                OFF,       // return_forward
                OFF_FIXED, // return_backward
                OFF,       // input_work_forward
                OFF_FIXED, // input_work_backward
                ON_FIXED,  // call_calc_forward
                OFF_FIXED, // call_calc_backward
                ON_FIXED,  // call_work_forward
                OFF_FIXED, // call_work_backward
            ],
        }
    }

    /// Default and toggle flag of a single rule; `None` if it has no slot
    #[inline]
    #[must_use]
    pub fn spec(&self, rule: Rule) -> Option<RuleSpec> {
        rule.index().map(|i| self.table()[i])
    }

    /// Iterate `(rule, spec)` pairs
    pub fn rules(&self) -> impl Iterator<Item = (Rule, RuleSpec)> {
        let table = self.table();
        Rule::ALL.into_iter().zip(table)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
