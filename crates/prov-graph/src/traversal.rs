//! Rule-driven closure traversal
//!
//! Computes the set of nodes reachable from a starting set by repeatedly
//! applying the enabled rules of a [`RuleSet`]. Process and data nodes are
//! kept in separate work queues because different link types apply to each;
//! a single visited set guarantees termination on cyclic graphs.
//!
//! # Complexity
//! O(V + E) over the nodes and links ultimately visited, one store query per
//! (visited node, applicable rule) pair.

use crate::entity::{EntityId, EntityKind, NodeCategory, NodeType};
use crate::error::{ConfigError, GraphError};
use crate::link::{Direction, LinkRow, LinkType, Operation};
use crate::rules::RuleSet;
use crate::store::GraphStore;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Result of a closure traversal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalResult {
    /// Nodes the caller asked for
    pub requested: BTreeSet<EntityId>,
    /// Nodes pulled in by the rules
    pub pulled_in: BTreeSet<EntityId>,
    /// Links followed while building the closure
    pub links: BTreeSet<LinkRow>,
}

impl TraversalResult {
    /// Every node in the closure
    #[must_use]
    pub fn nodes(&self) -> BTreeSet<EntityId> {
        self.requested.union(&self.pulled_in).copied().collect()
    }

    /// Closure size
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.requested.len() + self.pulled_in.len()
    }

    /// Check if the closure is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check closure membership
    #[inline]
    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.requested.contains(&id) || self.pulled_in.contains(&id)
    }
}

#[derive(Debug, Default)]
struct WorkQueues {
    process: VecDeque<EntityId>,
    data: VecDeque<EntityId>,
}

impl WorkQueues {
    fn push(&mut self, id: EntityId, node_type: NodeType) {
        match node_type.category() {
            NodeCategory::Process => self.process.push_back(id),
            NodeCategory::Data => self.data.push_back(id),
        }
    }

    fn pop(&mut self) -> Option<EntityId> {
        self.process.pop_front().or_else(|| self.data.pop_front())
    }
}

/// Compute the closure of `starting` under `rules`
///
/// # Errors
/// - `GraphError::NodeNotFound` if a starting id is not a stored node
/// - `GraphError::Store` on store failure
#[tracing::instrument(skip_all, fields(operation = %rules.operation(), start = starting.len()))]
pub fn traverse_graph<S>(
    store: &S,
    starting: &[EntityId],
    rules: &RuleSet,
) -> Result<TraversalResult, GraphError>
where
    S: GraphStore + ?Sized,
{
    let mut types: HashMap<EntityId, NodeType> = HashMap::with_capacity(starting.len());
    let mut queues = WorkQueues::default();
    let mut result = TraversalResult::default();

    for &id in starting {
        let node_type = store
            .get_by_id(EntityKind::Node, id)?
            .and_then(|entity| entity.record.as_node().map(|n| n.node_type))
            .ok_or(GraphError::NodeNotFound(id))?;
        if types.insert(id, node_type).is_none() {
            result.requested.insert(id);
            queues.push(id, node_type);
        }
    }

    let mut visited: HashSet<EntityId> = HashSet::with_capacity(types.len());
    while let Some(id) = queues.pop() {
        if !visited.insert(id) {
            continue;
        }
        let node_type = types[&id];

        for rule in rules.rules_for(node_type) {
            let Some(neighbor_type) = rule.reaches() else {
                continue;
            };
            for neighbor in store.query_neighbors(id, rule.link_type(), rule.direction())? {
                let (input, output) = match rule.direction() {
                    Direction::Forward => (id, neighbor.id),
                    Direction::Backward => (neighbor.id, id),
                };
                result.links.insert(LinkRow {
                    input,
                    output,
                    label: neighbor.label,
                    link_type: rule.link_type(),
                });

                if types.contains_key(&neighbor.id) {
                    continue;
                }
                types.insert(neighbor.id, neighbor_type);
                result.pulled_in.insert(neighbor.id);
                queues.push(neighbor.id, neighbor_type);
            }
        }
    }

    tracing::debug!(
        "Traversal closed: {} requested, {} pulled in, {} links",
        result.requested.len(),
        result.pulled_in.len(),
        result.links.len()
    );
    Ok(result)
}

/// Closure of nodes that must travel together in an archive
///
/// # Errors
/// Invalid overrides, unknown starting nodes, store failure
pub fn export_closure<'a, S, I>(
    store: &S,
    starting: &[EntityId],
    overrides: I,
) -> Result<TraversalResult, GraphError>
where
    S: GraphStore + ?Sized,
    I: IntoIterator<Item = (&'a str, bool)>,
{
    let rules = RuleSet::with_overrides(Operation::Export, overrides)?;
    traverse_graph(store, starting, &rules)
}

/// Closure of nodes a cascade delete would remove
///
/// Read-only: computes the set, does not delete.
///
/// # Errors
/// Invalid overrides, unknown starting nodes, store failure
pub fn delete_closure<'a, S, I>(
    store: &S,
    starting: &[EntityId],
    overrides: I,
) -> Result<TraversalResult, GraphError>
where
    S: GraphStore + ?Sized,
    I: IntoIterator<Item = (&'a str, bool)>,
{
    let rules = RuleSet::with_overrides(Operation::Delete, overrides)?;
    traverse_graph(store, starting, &rules)
}

/// Every stored link whose endpoints both lie in `nodes`
///
/// Unlike [`TraversalResult::links`], this includes links of types the
/// traversal did not follow.
///
/// # Errors
/// `GraphError::NodeNotFound` if an id is not a stored node; store failure
pub fn links_within<S>(store: &S, nodes: &BTreeSet<EntityId>) -> Result<BTreeSet<LinkRow>, GraphError>
where
    S: GraphStore + ?Sized,
{
    let mut links = BTreeSet::new();
    for &id in nodes {
        let node_type = store
            .get_by_id(EntityKind::Node, id)?
            .and_then(|entity| entity.record.as_node().map(|n| n.node_type))
            .ok_or(GraphError::NodeNotFound(id))?;

        let outgoing = LinkType::TRAVERSABLE
            .into_iter()
            .filter(|lt| lt.endpoints().is_some_and(|(source, _)| source == node_type))
            .chain([LinkType::Unspecified]);
        for link_type in outgoing {
            for neighbor in store.query_neighbors(id, link_type, Direction::Forward)? {
                if nodes.contains(&neighbor.id) {
                    links.insert(LinkRow {
                        input: id,
                        output: neighbor.id,
                        label: neighbor.label,
                        link_type,
                    });
                }
            }
        }
    }
    Ok(links)
}

/// Empty override list, for callers that keep an operation's defaults
pub const NO_OVERRIDES: [(&str, bool); 0] = [];

/// Build a rule set for the generic traversal from named toggles
///
/// # Errors
/// Unknown rule names
pub fn default_rules<'a, I>(enabled: I) -> Result<RuleSet, ConfigError>
where
    I: IntoIterator<Item = &'a str>,
{
    RuleSet::with_overrides(Operation::Default, enabled.into_iter().map(|name| (name, true)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityRecord, NodeRecord};
    use crate::memory::MemoryStore;
    use uuid::Uuid;

    fn add(store: &mut MemoryStore, node_type: NodeType) -> EntityId {
        store
            .create(EntityRecord::Node(NodeRecord::new(node_type, Uuid::nil())))
            .unwrap()
            .id
    }

    fn link(store: &mut MemoryStore, input: EntityId, output: EntityId, link_type: LinkType) {
        store
            .insert_link(&LinkRow {
                input,
                output,
                label: "link".to_string(),
                link_type,
            })
            .unwrap();
    }

    #[test]
    fn no_rules_returns_only_start() {
        let mut store = MemoryStore::new();
        let data = add(&mut store, NodeType::Data);
        let calc = add(&mut store, NodeType::Calculation);
        link(&mut store, data, calc, LinkType::InputCalc);

        let result =
            traverse_graph(&store, &[data], &RuleSet::defaults(Operation::Default)).unwrap();
        assert_eq!(result.nodes(), BTreeSet::from([data]));
        assert!(result.pulled_in.is_empty());
        assert!(result.links.is_empty());
    }

    #[test]
    fn missing_start_is_not_found() {
        let store = MemoryStore::new();
        let err = traverse_graph(&store, &[EntityId(99)], &RuleSet::defaults(Operation::Export))
            .unwrap_err();
        assert!(matches!(err, GraphError::NodeNotFound(EntityId(99))));
    }

    #[test]
    fn export_pulls_in_creator_and_its_inputs() {
        let mut store = MemoryStore::new();
        let input = add(&mut store, NodeType::Data);
        let calc = add(&mut store, NodeType::Calculation);
        let output = add(&mut store, NodeType::Data);
        let unrelated = add(&mut store, NodeType::Data);
        link(&mut store, input, calc, LinkType::InputCalc);
        link(&mut store, calc, output, LinkType::Create);

        let result = export_closure(&store, &[output], NO_OVERRIDES).unwrap();
        assert_eq!(result.requested, BTreeSet::from([output]));
        assert_eq!(result.pulled_in, BTreeSet::from([input, calc]));
        assert!(!result.contains(unrelated));
        assert_eq!(result.links.len(), 2);
    }

    #[test]
    fn delete_follows_consumers_forward() {
        let mut store = MemoryStore::new();
        let input = add(&mut store, NodeType::Data);
        let calc = add(&mut store, NodeType::Calculation);
        let output = add(&mut store, NodeType::Data);
        link(&mut store, input, calc, LinkType::InputCalc);
        link(&mut store, calc, output, LinkType::Create);

        let result = delete_closure(&store, &[input], NO_OVERRIDES).unwrap();
        assert_eq!(result.nodes(), BTreeSet::from([input, calc, output]));

        let result = delete_closure(&store, &[output], NO_OVERRIDES).unwrap();
        assert_eq!(result.nodes(), BTreeSet::from([output]));
    }

    #[test]
    fn duplicate_start_ids_collapse() {
        let mut store = MemoryStore::new();
        let data = add(&mut store, NodeType::Data);
        let result = export_closure(&store, &[data, data], NO_OVERRIDES).unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn links_within_includes_unfollowed_types() {
        let mut store = MemoryStore::new();
        let wf = add(&mut store, NodeType::Workflow);
        let calc = add(&mut store, NodeType::Calculation);
        let data = add(&mut store, NodeType::Data);
        let outside = add(&mut store, NodeType::Data);
        link(&mut store, wf, calc, LinkType::CallCalc);
        link(&mut store, calc, data, LinkType::Create);
        link(&mut store, wf, data, LinkType::Return);
        link(&mut store, wf, outside, LinkType::Return);

        let nodes = BTreeSet::from([wf, calc, data]);
        let links = links_within(&store, &nodes).unwrap();
        assert_eq!(links.len(), 3);
        assert!(links.iter().all(|l| l.output != outside));
    }
}
