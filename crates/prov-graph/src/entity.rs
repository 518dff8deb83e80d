//! Entity records of the provenance graph
//!
//! Records reference each other by uuid only. The store assigns a local
//! [`EntityId`] on creation; that id never leaves the store.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Key/value map used for node attributes, extras and log metadata
pub type Attributes = BTreeMap<String, Value>;

/// Store-assigned local identifier
///
/// Only meaningful within the store that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub i64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Entity kinds stored in the graph and carried by archives
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Graph vertex (data or process)
    Node,
    /// Remote execution target
    Computer,
    /// User-defined node collection
    Group,
    /// Author of nodes, groups and comments
    User,
    /// Immutable message attached to a node
    Log,
    /// Mutable annotation attached to a node
    Comment,
}

impl EntityKind {
    /// All kinds, in dependency order (referenced kinds first)
    pub const ALL: [EntityKind; 6] = [
        EntityKind::User,
        EntityKind::Computer,
        EntityKind::Node,
        EntityKind::Group,
        EntityKind::Log,
        EntityKind::Comment,
    ];

    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Computer => "computer",
            EntityKind::Group => "group",
            EntityKind::User => "user",
            EntityKind::Log => "log",
            EntityKind::Comment => "comment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node subtype
///
/// Calculations and workflows are both process kinds; the link model
/// distinguishes them because different link types apply to each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Data artifact
    Data,
    /// Calculation process (creates data)
    Calculation,
    /// Workflow process (calls other processes, returns data)
    Workflow,
}

/// Broad node category used by the traversal work queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    /// Data nodes
    Data,
    /// Calculation and workflow nodes
    Process,
}

impl NodeType {
    /// Stable lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Data => "data",
            NodeType::Calculation => "calculation",
            NodeType::Workflow => "workflow",
        }
    }

    /// Broad category of this node type
    #[inline]
    #[must_use]
    pub fn category(&self) -> NodeCategory {
        match self {
            NodeType::Data => NodeCategory::Data,
            NodeType::Calculation | NodeType::Workflow => NodeCategory::Process,
        }
    }

    /// Check if this is a process node type
    #[inline]
    #[must_use]
    pub fn is_process(&self) -> bool {
        self.category() == NodeCategory::Process
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(NodeType::Data),
            "calculation" => Ok(NodeType::Calculation),
            "workflow" => Ok(NodeType::Workflow),
            other => Err(ConfigError::Invalid(format!("unknown node type '{other}'"))),
        }
    }
}

/// Graph vertex record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub uuid: Uuid,
    pub node_type: NodeType,
    /// Concrete process implementation, for process nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_type: Option<String>,
    pub label: String,
    pub description: String,
    /// Immutable once the node is sealed
    pub attributes: Attributes,
    /// Mutable annotations
    pub extras: Attributes,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    /// Creating user
    pub user: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer: Option<Uuid>,
}

impl NodeRecord {
    /// Attribute key marking a process node as finalized
    pub const SEALED_KEY: &'static str = "sealed";

    /// Create a node record with fresh uuid and current timestamps
    #[must_use]
    pub fn new(node_type: NodeType, user: Uuid) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::new_v4(),
            node_type,
            process_type: None,
            label: String::new(),
            description: String::new(),
            attributes: Attributes::new(),
            extras: Attributes::new(),
            ctime: now,
            mtime: now,
            user,
            computer: None,
        }
    }

    /// Set label
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Set an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Set an extra
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }

    /// Set computer
    #[must_use]
    pub fn with_computer(mut self, computer: Uuid) -> Self {
        self.computer = Some(computer);
        self
    }

    /// Set process type
    #[must_use]
    pub fn with_process_type(mut self, process_type: impl Into<String>) -> Self {
        self.process_type = Some(process_type.into());
        self
    }

    /// Mark as sealed
    #[must_use]
    pub fn sealed(self) -> Self {
        self.with_attribute(Self::SEALED_KEY, Value::Bool(true))
    }

    /// Check if the node has been finalized
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(self.attributes.get(Self::SEALED_KEY), Some(Value::Bool(true)))
    }

    /// License declared under `source.license`, if any
    #[must_use]
    pub fn license(&self) -> Option<&str> {
        self.attributes
            .get("source")
            .and_then(|source| source.get("license"))
            .and_then(Value::as_str)
    }
}

/// Remote execution target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerRecord {
    pub uuid: Uuid,
    pub label: String,
    pub hostname: String,
    pub description: String,
    pub scheduler_type: String,
    pub transport_type: String,
}

/// Named collection of nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub uuid: Uuid,
    pub label: String,
    pub type_string: String,
    pub description: String,
    pub user: Uuid,
    pub time: DateTime<Utc>,
    /// Member node uuids
    pub nodes: BTreeSet<Uuid>,
}

/// Graph user, unique by email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uuid: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub institution: String,
}

/// Immutable log entry of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub uuid: Uuid,
    pub node: Uuid,
    pub time: DateTime<Utc>,
    pub loggername: String,
    pub levelname: String,
    pub message: String,
    pub metadata: Attributes,
}

/// User comment on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub uuid: Uuid,
    pub node: Uuid,
    pub user: Uuid,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub content: String,
}

/// Any entity record, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityRecord {
    Node(NodeRecord),
    Computer(ComputerRecord),
    Group(GroupRecord),
    User(UserRecord),
    Log(LogRecord),
    Comment(CommentRecord),
}

impl EntityRecord {
    /// Entity kind
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRecord::Node(_) => EntityKind::Node,
            EntityRecord::Computer(_) => EntityKind::Computer,
            EntityRecord::Group(_) => EntityKind::Group,
            EntityRecord::User(_) => EntityKind::User,
            EntityRecord::Log(_) => EntityKind::Log,
            EntityRecord::Comment(_) => EntityKind::Comment,
        }
    }

    /// Global identity
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        match self {
            EntityRecord::Node(r) => r.uuid,
            EntityRecord::Computer(r) => r.uuid,
            EntityRecord::Group(r) => r.uuid,
            EntityRecord::User(r) => r.uuid,
            EntityRecord::Log(r) => r.uuid,
            EntityRecord::Comment(r) => r.uuid,
        }
    }

    /// Label for kinds with a near-unique label key
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            EntityRecord::Computer(r) => Some(&r.label),
            EntityRecord::Group(r) => Some(&r.label),
            _ => None,
        }
    }
}

macro_rules! record_accessors {
    ($($variant:ident => $as_ref:ident, $into:ident, $ty:ty;)*) => {
        impl EntityRecord {
            $(
                #[doc = concat!("Borrow as `", stringify!($ty), "` if the kind matches")]
                #[must_use]
                pub fn $as_ref(&self) -> Option<&$ty> {
                    match self {
                        EntityRecord::$variant(r) => Some(r),
                        _ => None,
                    }
                }

                #[doc = concat!("Convert into `", stringify!($ty), "` if the kind matches")]
                #[must_use]
                pub fn $into(self) -> Option<$ty> {
                    match self {
                        EntityRecord::$variant(r) => Some(r),
                        _ => None,
                    }
                }
            )*
        }
    };
}

record_accessors! {
    Node => as_node, into_node, NodeRecord;
    Computer => as_computer, into_computer, ComputerRecord;
    Group => as_group, into_group, GroupRecord;
    User => as_user, into_user, UserRecord;
    Log => as_log, into_log, LogRecord;
    Comment => as_comment, into_comment, CommentRecord;
}

/// Stored entity: record plus the store's local id
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub record: EntityRecord,
}

impl Entity {
    /// Entity kind
    #[inline]
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        self.record.kind()
    }

    /// Global identity
    #[inline]
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.record.uuid()
    }
}
