//! Testing utilities for the provenance graph workspace
//!
//! Shared fixtures, graph builders and tracing setup.

#![allow(missing_docs)]

use chrono::{DateTime, TimeZone, Utc};
use prov_graph::{
    CommentRecord, ComputerRecord, EntityId, EntityKind, EntityRecord, GraphStore, GroupRecord,
    LinkRow, LinkType, LogRecord, MemoryStore, NodeRecord, NodeType, UserRecord,
};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Install a test subscriber honouring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fixed timestamp `offset` seconds after a reference instant
pub fn at(offset: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn user_record(email: &str) -> UserRecord {
    UserRecord {
        uuid: Uuid::new_v4(),
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        institution: "Example Lab".to_string(),
    }
}

pub fn computer_record(label: &str) -> ComputerRecord {
    ComputerRecord {
        uuid: Uuid::new_v4(),
        label: label.to_string(),
        hostname: format!("{label}.example.org"),
        description: String::new(),
        scheduler_type: "slurm".to_string(),
        transport_type: "ssh".to_string(),
    }
}

/// Handle to a node created through [`TestGraph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef {
    pub id: EntityId,
    pub uuid: Uuid,
}

/// Memory store with a default user and node/link helpers
#[derive(Debug)]
pub struct TestGraph {
    pub store: MemoryStore,
    pub user: Uuid,
}

impl Default for TestGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TestGraph {
    pub fn new() -> Self {
        Self::with_user("test@example.org")
    }

    pub fn with_user(email: &str) -> Self {
        let mut store = MemoryStore::new();
        let user = user_record(email);
        let uuid = user.uuid;
        store.create(EntityRecord::User(user)).unwrap();
        Self { store, user: uuid }
    }

    /// Node record owned by the default user; processes come sealed
    pub fn record(&self, node_type: NodeType, label: &str) -> NodeRecord {
        let record = NodeRecord::new(node_type, self.user).with_label(label);
        if node_type.is_process() {
            record.sealed()
        } else {
            record
        }
    }

    pub fn add(&mut self, node_type: NodeType, label: &str) -> NodeRef {
        let record = self.record(node_type, label);
        self.add_record(record)
    }

    pub fn add_record(&mut self, record: NodeRecord) -> NodeRef {
        let entity = self.store.create(EntityRecord::Node(record)).unwrap();
        NodeRef {
            id: entity.id,
            uuid: entity.uuid(),
        }
    }

    pub fn link(&mut self, from: NodeRef, to: NodeRef, link_type: LinkType, label: &str) {
        self.store
            .insert_link(&LinkRow {
                input: from.id,
                output: to.id,
                label: label.to_string(),
                link_type,
            })
            .unwrap();
    }

    pub fn add_computer(&mut self, label: &str) -> Uuid {
        self.store
            .create(EntityRecord::Computer(computer_record(label)))
            .unwrap()
            .uuid()
    }

    pub fn add_group(&mut self, label: &str, members: &[NodeRef]) -> Uuid {
        let group = GroupRecord {
            uuid: Uuid::new_v4(),
            label: label.to_string(),
            type_string: "core".to_string(),
            description: String::new(),
            user: self.user,
            time: at(0),
            nodes: members.iter().map(|n| n.uuid).collect::<BTreeSet<_>>(),
        };
        self.store
            .create(EntityRecord::Group(group))
            .unwrap()
            .uuid()
    }

    pub fn add_log(&mut self, node: NodeRef, message: &str) -> Uuid {
        let log = LogRecord {
            uuid: Uuid::new_v4(),
            node: node.uuid,
            time: at(10),
            loggername: "process".to_string(),
            levelname: "REPORT".to_string(),
            message: message.to_string(),
            metadata: [("step".to_string(), json!(1))].into_iter().collect(),
        };
        self.store.create(EntityRecord::Log(log)).unwrap().uuid()
    }

    pub fn add_comment(&mut self, node: NodeRef, content: &str, mtime: DateTime<Utc>) -> Uuid {
        let comment = CommentRecord {
            uuid: Uuid::new_v4(),
            node: node.uuid,
            user: self.user,
            ctime: at(0),
            mtime,
            content: content.to_string(),
        };
        self.store
            .create(EntityRecord::Comment(comment))
            .unwrap()
            .uuid()
    }

    pub fn node_record(&self, node: NodeRef) -> NodeRecord {
        self.store
            .get_by_uuid(EntityKind::Node, &node.uuid)
            .unwrap()
            .and_then(|e| e.record.into_node())
            .unwrap()
    }
}

/// Nodes of the reference workflow scenario
///
/// ```text
/// DI -INPUT_CALC-> C0 -CREATE-> DO
/// W2 -CALL_WORK-> W1 -CALL_CALC-> C0
/// DI -INPUT_WORK-> W1, DI -INPUT_WORK-> W2
/// W1 -RETURN-> DO,     W2 -RETURN-> DO
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub di: NodeRef,
    pub output: NodeRef,
    pub c0: NodeRef,
    pub w1: NodeRef,
    pub w2: NodeRef,
}

impl Scenario {
    pub fn all(&self) -> BTreeSet<EntityId> {
        [self.di, self.output, self.c0, self.w1, self.w2]
            .iter()
            .map(|n| n.id)
            .collect()
    }
}

pub fn scenario_graph() -> (TestGraph, Scenario) {
    let mut graph = TestGraph::new();
    let di = graph.add(NodeType::Data, "DI");
    let output = graph.add(NodeType::Data, "DO");
    let c0 = graph.add(NodeType::Calculation, "C0");
    let w1 = graph.add(NodeType::Workflow, "W1");
    let w2 = graph.add(NodeType::Workflow, "W2");

    graph.link(di, c0, LinkType::InputCalc, "x");
    graph.link(c0, output, LinkType::Create, "result");
    graph.link(w1, c0, LinkType::CallCalc, "call");
    graph.link(w2, w1, LinkType::CallWork, "call");
    graph.link(di, w1, LinkType::InputWork, "x");
    graph.link(di, w2, LinkType::InputWork, "x");
    graph.link(w1, output, LinkType::Return, "result");
    graph.link(w2, output, LinkType::Return, "result");

    (graph, Scenario { di, output, c0, w1, w2 })
}

/// Directed cycle `D0 -> C0 -> D1 -> C1 -> ... -> D0` of `pairs` data/calculation pairs
///
/// Traversable with `input_calc_forward` and `create_forward`.
pub fn cycle_graph(pairs: usize) -> (TestGraph, Vec<NodeRef>) {
    let mut graph = TestGraph::new();
    let mut members = Vec::with_capacity(pairs * 2);
    for i in 0..pairs {
        members.push(graph.add(NodeType::Data, &format!("D{i}")));
        members.push(graph.add(NodeType::Calculation, &format!("C{i}")));
    }
    for i in 0..pairs {
        let data = members[2 * i];
        let calc = members[2 * i + 1];
        let next_data = members[(2 * i + 2) % members.len()];
        graph.link(data, calc, LinkType::InputCalc, "input");
        graph.link(calc, next_data, LinkType::Create, "output");
    }
    (graph, members)
}
