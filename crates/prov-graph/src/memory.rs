//! In-memory graph store
//!
//! Reference [`GraphStore`] implementation. Entities live in ordered maps,
//! links in a `petgraph` stable graph whose vertices are node ids and whose
//! parallel edges carry the link label and type. Nested transactions are
//! snapshot savepoints. A write budget can be set to inject a backend
//! failure after a fixed number of writes.

use crate::entity::{Entity, EntityId, EntityKind, EntityRecord};
use crate::error::StoreError;
use crate::link::{Direction, LinkRow, LinkType, Neighbor};
use crate::store::GraphStore;
use petgraph::stable_graph::{EdgeReference, NodeIndex, StableDiGraph};
use petgraph::visit::EdgeRef;
use petgraph::{Incoming, Outgoing};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

/// Edge weight; identity of a link is its endpoints plus this
#[derive(Debug, Clone, PartialEq, Eq)]
struct LinkEdge {
    label: String,
    link_type: LinkType,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_id: i64,
    entities: BTreeMap<EntityId, Entity>,
    by_uuid: HashMap<(EntityKind, Uuid), EntityId>,
    graph: StableDiGraph<EntityId, LinkEdge>,
    vertices: HashMap<EntityId, NodeIndex>,
    payloads: HashMap<Uuid, Vec<u8>>,
}

impl State {
    fn vertex(&mut self, id: EntityId) -> NodeIndex {
        if let Some(&vertex) = self.vertices.get(&id) {
            return vertex;
        }
        let vertex = self.graph.add_node(id);
        self.vertices.insert(id, vertex);
        vertex
    }
}

/// Endpoint of `edge` that is not `vertex`
fn far_end(edge: &EdgeReference<'_, LinkEdge>, vertex: NodeIndex) -> NodeIndex {
    if edge.source() == vertex {
        edge.target()
    } else {
        edge.source()
    }
}

/// In-memory provenance graph store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: State,
    savepoints: Vec<State>,
    writes: usize,
    write_budget: Option<usize>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write after the next `writes` successful ones
    pub fn fail_after_writes(&mut self, writes: usize) {
        self.write_budget = Some(self.writes + writes);
    }

    /// Remove any injected failure
    pub fn clear_failure(&mut self) {
        self.write_budget = None;
    }

    /// Number of open transactions
    #[inline]
    #[must_use]
    pub fn transaction_depth(&self) -> usize {
        self.savepoints.len()
    }

    /// Number of entities of a kind
    #[must_use]
    pub fn count(&self, kind: EntityKind) -> usize {
        self.state
            .entities
            .values()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// All entities of a kind, in id order
    #[must_use]
    pub fn entities(&self, kind: EntityKind) -> Vec<&Entity> {
        self.state
            .entities
            .values()
            .filter(|e| e.kind() == kind)
            .collect()
    }

    /// All links, in tuple order
    #[must_use]
    pub fn links(&self) -> Vec<LinkRow> {
        let graph = &self.state.graph;
        graph
            .edge_indices()
            .filter_map(|edge| {
                let (input, output) = graph.edge_endpoints(edge)?;
                let weight = &graph[edge];
                Some(LinkRow {
                    input: graph[input],
                    output: graph[output],
                    label: weight.label.clone(),
                    link_type: weight.link_type,
                })
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Local id of an entity
    #[must_use]
    pub fn id_of(&self, kind: EntityKind, uuid: &Uuid) -> Option<EntityId> {
        self.state.by_uuid.get(&(kind, *uuid)).copied()
    }

    fn record_write(&mut self) -> Result<(), StoreError> {
        if let Some(budget) = self.write_budget {
            if self.writes >= budget {
                return Err(StoreError::Backend("injected write failure".to_string()));
            }
        }
        self.writes += 1;
        Ok(())
    }

    fn email_taken(&self, email: &str, except: Option<EntityId>) -> bool {
        self.state.entities.values().any(|e| {
            Some(e.id) != except
                && e.record
                    .as_user()
                    .is_some_and(|user| user.email == email)
        })
    }

    fn node_type_of(&self, id: EntityId) -> Result<crate::entity::NodeType, StoreError> {
        self.state
            .entities
            .get(&id)
            .and_then(|e| e.record.as_node())
            .map(|node| node.node_type)
            .ok_or_else(|| StoreError::missing(EntityKind::Node, id))
    }
}

impl GraphStore for MemoryStore {
    fn get_by_uuid(&self, kind: EntityKind, uuid: &Uuid) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .id_of(kind, uuid)
            .and_then(|id| self.state.entities.get(&id))
            .cloned())
    }

    fn get_by_id(&self, kind: EntityKind, id: EntityId) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .state
            .entities
            .get(&id)
            .filter(|e| e.kind() == kind)
            .cloned())
    }

    fn create(&mut self, record: EntityRecord) -> Result<Entity, StoreError> {
        let kind = record.kind();
        let uuid = record.uuid();
        if self.state.by_uuid.contains_key(&(kind, uuid)) {
            return Err(StoreError::ConstraintViolation(format!(
                "duplicate {kind} uuid {uuid}"
            )));
        }
        if let Some(user) = record.as_user() {
            if self.email_taken(&user.email, None) {
                return Err(StoreError::ConstraintViolation(format!(
                    "duplicate user email {}",
                    user.email
                )));
            }
        }
        self.record_write()?;

        self.state.next_id += 1;
        let entity = Entity {
            id: EntityId(self.state.next_id),
            record,
        };
        self.state.by_uuid.insert((kind, uuid), entity.id);
        self.state.entities.insert(entity.id, entity.clone());
        Ok(entity)
    }

    fn update(&mut self, entity: &Entity) -> Result<(), StoreError> {
        let kind = entity.kind();
        let matches = self
            .state
            .entities
            .get(&entity.id)
            .is_some_and(|stored| stored.kind() == kind && stored.uuid() == entity.uuid());
        if !matches {
            return Err(StoreError::missing(kind, entity.uuid()));
        }
        if let Some(user) = entity.record.as_user() {
            if self.email_taken(&user.email, Some(entity.id)) {
                return Err(StoreError::ConstraintViolation(format!(
                    "duplicate user email {}",
                    user.email
                )));
            }
        }
        self.record_write()?;
        self.state.entities.insert(entity.id, entity.clone());
        Ok(())
    }

    fn query_neighbors(
        &self,
        node: EntityId,
        link_type: LinkType,
        direction: Direction,
    ) -> Result<Vec<Neighbor>, StoreError> {
        let Some(&vertex) = self.state.vertices.get(&node) else {
            return Ok(Vec::new());
        };
        let side = match direction {
            Direction::Forward => Outgoing,
            Direction::Backward => Incoming,
        };
        let graph = &self.state.graph;
        Ok(graph
            .edges_directed(vertex, side)
            .filter(|edge| edge.weight().link_type == link_type)
            .map(|edge| Neighbor {
                id: graph[far_end(&edge, vertex)],
                label: edge.weight().label.clone(),
            })
            .collect())
    }

    fn insert_link(&mut self, link: &LinkRow) -> Result<bool, StoreError> {
        let source = self.node_type_of(link.input)?;
        let target = self.node_type_of(link.output)?;
        if !link.link_type.allows(source, target) {
            return Err(StoreError::ConstraintViolation(format!(
                "{} link cannot connect {source} to {target}",
                link.link_type
            )));
        }
        let weight = LinkEdge {
            label: link.label.clone(),
            link_type: link.link_type,
        };
        if let (Some(&input), Some(&output)) = (
            self.state.vertices.get(&link.input),
            self.state.vertices.get(&link.output),
        ) {
            let exists = self
                .state
                .graph
                .edges_directed(input, Outgoing)
                .any(|edge| far_end(&edge, input) == output && *edge.weight() == weight);
            if exists {
                return Ok(false);
            }
        }
        self.record_write()?;
        let input = self.state.vertex(link.input);
        let output = self.state.vertex(link.output);
        self.state.graph.add_edge(input, output, weight);
        Ok(true)
    }

    fn find_by_label(&self, kind: EntityKind, label: &str) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .state
            .entities
            .values()
            .filter(|e| e.kind() == kind && e.record.label() == Some(label))
            .cloned()
            .collect())
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<Entity>, StoreError> {
        Ok(self
            .state
            .entities
            .values()
            .find(|e| e.record.as_user().is_some_and(|u| u.email == email))
            .cloned())
    }

    fn attached(&self, kind: EntityKind, node: &Uuid) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .state
            .entities
            .values()
            .filter(|e| match &e.record {
                EntityRecord::Log(log) => kind == EntityKind::Log && log.node == *node,
                EntityRecord::Comment(c) => kind == EntityKind::Comment && c.node == *node,
                _ => false,
            })
            .cloned()
            .collect())
    }

    fn groups_containing(&self, nodes: &[Uuid]) -> Result<Vec<Entity>, StoreError> {
        Ok(self
            .state
            .entities
            .values()
            .filter(|e| {
                e.record
                    .as_group()
                    .is_some_and(|g| nodes.iter().any(|n| g.nodes.contains(n)))
            })
            .cloned()
            .collect())
    }

    fn payload(&self, node: &Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.state.payloads.get(node).cloned())
    }

    fn put_payload(&mut self, node: &Uuid, data: Vec<u8>) -> Result<(), StoreError> {
        self.record_write()?;
        self.state.payloads.insert(*node, data);
        Ok(())
    }

    fn begin(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        let snapshot = self.savepoints.pop().ok_or(StoreError::NoTransaction)?;
        self.state = snapshot;
        Ok(())
    }
}
