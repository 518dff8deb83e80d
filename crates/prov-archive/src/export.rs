//! Archive exporter
//!
//! Computes the export closure of a set of nodes and groups, validates it,
//! gathers every auxiliary entity the closure needs and assembles an
//! [`Archive`]. Export never writes to the source store.

use crate::config::ExportConfig;
use crate::consistency::{check_licenses, check_sealed};
use crate::error::ArchiveError;
use crate::format::{Archive, ExportParameters, LinkRecord, Manifest};
use crate::lookup::lookup;
use indexmap::IndexMap;
use prov_graph::{
    links_within, traverse_graph, Entity, EntityId, EntityKind, EntityRecord, GraphStore,
    NodeRecord,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use uuid::Uuid;

/// What to export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    /// Node uuids
    pub nodes: Vec<Uuid>,
    /// Group uuids; each expands to its member nodes
    pub groups: Vec<Uuid>,
}

impl ExportRequest {
    /// Request for a set of nodes
    #[must_use]
    pub fn nodes(nodes: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            groups: Vec::new(),
        }
    }

    /// Add a group
    #[must_use]
    pub fn with_group(mut self, group: Uuid) -> Self {
        self.groups.push(group);
        self
    }
}

/// Summary of one export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Distinct starting nodes
    pub requested: usize,
    /// Nodes added by the closure
    pub pulled_in: usize,
    /// Archived entities per kind
    pub entity_counts: BTreeMap<EntityKind, usize>,
    pub links: usize,
    pub payloads: usize,
}

/// Build an archive for `request`
///
/// # Errors
/// Invalid configuration, unknown starting nodes or groups, licensing and
/// seal violations, store failures
#[tracing::instrument(skip_all, fields(nodes = request.nodes.len(), groups = request.groups.len()))]
pub fn export<S>(
    store: &S,
    request: &ExportRequest,
    config: &ExportConfig,
) -> Result<(Archive, ExportReport), ArchiveError>
where
    S: GraphStore + ?Sized,
{
    config.validate()?;
    let rules = config.rules()?;
    let batch = config.batch_size;

    // Start set: explicit nodes plus members of requested groups
    let mut start: BTreeSet<Uuid> = request.nodes.iter().copied().collect();
    for uuid in &request.groups {
        let group = store
            .get_by_uuid(EntityKind::Group, uuid)?
            .and_then(|e| e.record.into_group())
            .ok_or_else(|| ArchiveError::unknown_reference(uuid, "requested group"))?;
        start.extend(group.nodes);
    }
    let start: Vec<Uuid> = start.into_iter().collect();
    let starting: Vec<EntityId> = fetch_all(store, EntityKind::Node, &start, batch, "requested node")?
        .iter()
        .map(|e| e.id)
        .collect();

    let closure = traverse_graph(store, &starting, &rules)?;
    let ids = closure.nodes();

    let mut nodes: Vec<(EntityId, NodeRecord)> = Vec::with_capacity(ids.len());
    for &id in &ids {
        let node = store
            .get_by_id(EntityKind::Node, id)?
            .and_then(|e| e.record.into_node())
            .ok_or_else(|| ArchiveError::unknown_reference(id, "closure node"))?;
        nodes.push((id, node));
    }

    check_sealed(nodes.iter().map(|(_, n)| n))?;
    check_licenses(
        nodes.iter().map(|(_, n)| n),
        &config.allowed_licenses,
        &config.forbidden_licenses,
    )?;

    let uuid_of: HashMap<EntityId, Uuid> = nodes.iter().map(|(id, n)| (*id, n.uuid)).collect();
    let node_uuids: BTreeSet<Uuid> = uuid_of.values().copied().collect();

    let mut links = Vec::new();
    for row in links_within(store, &ids)? {
        if let (Some(input), Some(output)) = (uuid_of.get(&row.input), uuid_of.get(&row.output)) {
            links.push(LinkRecord {
                input: *input,
                output: *output,
                label: row.label,
                link_type: row.link_type,
            });
        }
    }

    let mut users: BTreeSet<Uuid> = nodes.iter().map(|(_, n)| n.user).collect();
    let computers: BTreeSet<Uuid> = nodes.iter().filter_map(|(_, n)| n.computer).collect();

    let mut logs = BTreeMap::new();
    let mut comments = BTreeMap::new();
    for uuid in &node_uuids {
        if config.include_logs {
            for log in store.attached(EntityKind::Log, uuid)? {
                logs.insert(log.uuid(), log.record);
            }
        }
        if config.include_comments {
            for comment in store.attached(EntityKind::Comment, uuid)? {
                if let Some(c) = comment.record.as_comment() {
                    users.insert(c.user);
                }
                comments.insert(comment.uuid(), comment.record);
            }
        }
    }

    // Groups whose whole membership lies inside the closure
    let mut groups = BTreeMap::new();
    let member_uuids: Vec<Uuid> = node_uuids.iter().copied().collect();
    for chunk in member_uuids.chunks(batch) {
        for entity in store.groups_containing(chunk)? {
            let Some(group) = entity.record.as_group() else {
                continue;
            };
            if group.nodes.is_subset(&node_uuids) {
                users.insert(group.user);
                groups.insert(group.uuid, entity.record);
            }
        }
    }

    let computers: Vec<Uuid> = computers.into_iter().collect();
    let users: Vec<Uuid> = users.into_iter().collect();
    let computers = fetch_all(store, EntityKind::Computer, &computers, batch, "node computer")?;
    let users = fetch_all(store, EntityKind::User, &users, batch, "referenced user")?;

    let mut repository = BTreeMap::new();
    for uuid in &node_uuids {
        if let Some(blob) = store.payload(uuid)? {
            repository.insert(*uuid, blob);
        }
    }

    let mut entities: IndexMap<Uuid, EntityRecord> = IndexMap::new();
    entities.extend(users.into_iter().map(|e| (e.uuid(), e.record)));
    entities.extend(computers.into_iter().map(|e| (e.uuid(), e.record)));
    entities.extend(nodes.into_iter().map(|(_, n)| (n.uuid, EntityRecord::Node(n))));
    entities.extend(groups);
    entities.extend(logs);
    entities.extend(comments);

    let manifest = Manifest::new(ExportParameters {
        include_logs: config.include_logs,
        include_comments: config.include_comments,
        rules: rules.to_map(),
    });
    let archive = Archive::new(manifest, entities, links, repository);

    let report = ExportReport {
        requested: closure.requested.len(),
        pulled_in: closure.pulled_in.len(),
        entity_counts: archive.manifest.entity_counts.clone(),
        links: archive.links.len(),
        payloads: archive.repository.len(),
    };
    tracing::info!(
        "Exported {} nodes ({} requested, {} pulled in), {} links",
        ids.len(),
        report.requested,
        report.pulled_in,
        report.links
    );
    Ok((archive, report))
}

/// Export `request` and write the archive folder at `path`
///
/// # Errors
/// As [`export`], plus `ArchiveExists` and IO failures
pub fn export_to_folder<S>(
    store: &S,
    request: &ExportRequest,
    config: &ExportConfig,
    path: &Path,
) -> Result<ExportReport, ArchiveError>
where
    S: GraphStore + ?Sized,
{
    if path.exists() && !config.overwrite {
        return Err(ArchiveError::ArchiveExists(path.to_path_buf()));
    }
    let (archive, report) = export(store, request, config)?;
    archive.write_folder(path, config.overwrite)?;
    Ok(report)
}

/// Batched lookup that fails on the first uuid the store does not know
fn fetch_all<S>(
    store: &S,
    kind: EntityKind,
    uuids: &[Uuid],
    batch: usize,
    context: &str,
) -> Result<Vec<Entity>, ArchiveError>
where
    S: GraphStore + ?Sized,
{
    let found = lookup(store, kind, uuids, batch)?;
    if found.len() != uuids.len() {
        let known: BTreeSet<Uuid> = found.iter().map(Entity::uuid).collect();
        if let Some(missing) = uuids.iter().find(|u| !known.contains(*u)) {
            return Err(ArchiveError::unknown_reference(missing, context));
        }
    }
    Ok(found)
}
