//! Provenance Graph Core
//!
//! Typed provenance graph model and rule-driven closure traversal.
//!
//! # Core Concepts
//!
//! - [`LinkType`]: closed vocabulary of edge kinds with fixed endpoint types
//! - [`Rule`] / [`RuleSet`]: `{linktype}_{direction}` traversal toggles,
//!   validated against the per-[`Operation`] table
//! - [`GraphStore`]: the store interface the core consumes
//! - [`traverse_graph`]: cycle-safe closure computation
//! - [`MemoryStore`]: in-memory reference store
//!
//! # Example
//!
//! ```rust,ignore
//! use prov_graph::{export_closure, MemoryStore, NO_OVERRIDES};
//!
//! let store = MemoryStore::new();
//! // ... populate ...
//! let closure = export_closure(&store, &[output_id], NO_OVERRIDES)?;
//! println!("{} nodes pulled in", closure.pulled_in.len());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod entity;
mod error;
mod link;
mod memory;
mod rules;
mod store;
mod traversal;

// Re-exports
pub use entity::{
    Attributes, CommentRecord, ComputerRecord, Entity, EntityId, EntityKind, EntityRecord,
    GroupRecord, LogRecord, NodeCategory, NodeRecord, NodeType, UserRecord,
};
pub use error::{ConfigError, GraphError, StoreError};
pub use link::{Direction, LinkRow, LinkType, Neighbor, Operation, Rule, RuleSpec};
pub use memory::MemoryStore;
pub use rules::RuleSet;
pub use store::{transaction, GraphStore};
pub use traversal::{
    default_rules, delete_closure, export_closure, links_within, traverse_graph,
    TraversalResult, NO_OVERRIDES,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
