//! Archive merge (import)
//!
//! Merges an [`Archive`] into a target store. Entities are matched by uuid
//! (users also by email) and never recreated; only the mutable side data of
//! existing nodes is merged. Importing the same archive again converges to
//! the same state.
//!
//! # Phases
//!
//! 1. Version and integrity check of the archive
//! 2. Read-only resolution of every node reference the archive makes
//! 3. One store transaction writing users, computers, nodes, links,
//!    groups, logs, comments and payloads, in that order

mod comments;
mod extras;
mod labels;

pub use comments::CommentMode;
pub use extras::{ConflictPolicy, CreatePolicy, ExtrasMode, KeepPolicy, NewExtrasMode};

use crate::config::ImportConfig;
use crate::error::ArchiveError;
use crate::format::{check_version, Archive, LinkRecord};
use crate::lookup::lookup;
use chrono::Utc;
use labels::unique_label;
use prov_graph::{
    transaction, Entity, EntityId, EntityKind, EntityRecord, GraphStore, GroupRecord, LinkRow,
    NodeRecord,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

/// A computer or group stored under a suffixed label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub kind: EntityKind,
    pub uuid: Uuid,
    pub from: String,
    pub to: String,
}

/// Summary of one import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entities created per kind
    pub created: BTreeMap<EntityKind, usize>,
    /// Archived entities that were already stored, per kind
    pub existing: BTreeMap<EntityKind, usize>,
    /// Existing entities whose mutable data changed, per kind
    pub updated: BTreeMap<EntityKind, usize>,
    pub renamed: Vec<Renamed>,
    /// Links that were not stored before
    pub links_inserted: usize,
    /// Links dropped because an endpoint is unknown
    pub dropped_links: Vec<LinkRecord>,
    /// Group members, logs and comments dropped because their node is unknown
    pub dropped_references: usize,
    /// Local id of every archived node
    pub node_ids: BTreeMap<Uuid, EntityId>,
    /// Group holding all archived nodes, when requested
    pub import_group: Option<Uuid>,
}

impl ImportReport {
    #[inline]
    #[must_use]
    pub fn created(&self, kind: EntityKind) -> usize {
        self.created.get(&kind).copied().unwrap_or(0)
    }

    #[inline]
    #[must_use]
    pub fn existing(&self, kind: EntityKind) -> usize {
        self.existing.get(&kind).copied().unwrap_or(0)
    }

    #[inline]
    #[must_use]
    pub fn updated(&self, kind: EntityKind) -> usize {
        self.updated.get(&kind).copied().unwrap_or(0)
    }

    fn add(map: &mut BTreeMap<EntityKind, usize>, kind: EntityKind, n: usize) {
        if n > 0 {
            *map.entry(kind).or_default() += n;
        }
    }
}

/// Merge `archive` into `store`
///
/// All writes happen in one transaction; any failure rolls back every
/// change this call made.
///
/// # Errors
/// `VersionIncompatible`, `Integrity`, `Configuration` and
/// `UnknownReference` before any write; store failures during the merge
#[tracing::instrument(skip_all, fields(entities = archive.entities.len(), links = archive.links.len()))]
pub fn import_archive<S>(
    store: &mut S,
    archive: &Archive,
    config: &ImportConfig,
) -> Result<ImportReport, ArchiveError>
where
    S: GraphStore + ?Sized,
{
    check_version(&archive.manifest.format_version)?;
    archive.verify()?;
    config.validate()?;

    let resolution = Resolution::resolve(&*store, archive, config)?;
    let merger = Merger {
        archive,
        config,
        resolution,
        report: ImportReport::default(),
        user_map: HashMap::new(),
    };
    let report = transaction(store, |s| merger.run(s))?;

    tracing::info!(
        "Imported archive: {} nodes created, {} already present, {} links inserted, {} dropped",
        report.created(EntityKind::Node),
        report.existing(EntityKind::Node),
        report.links_inserted,
        report.dropped_links.len()
    );
    Ok(report)
}

/// Read the archive folder at `path` and merge it into `store`
///
/// # Errors
/// As [`Archive::read_folder`] and [`import_archive`]
pub fn import_from_folder<S>(
    store: &mut S,
    path: &Path,
    config: &ImportConfig,
) -> Result<ImportReport, ArchiveError>
where
    S: GraphStore + ?Sized,
{
    let archive = Archive::read_folder(path)?;
    import_archive(store, &archive, config)
}

/// Node references resolved before the transaction opens
#[derive(Debug, Default)]
struct Resolution {
    /// Archived nodes already in the store
    existing_nodes: HashMap<Uuid, Entity>,
    /// Local ids of every resolvable node uuid
    node_ids: HashMap<Uuid, EntityId>,
}

impl Resolution {
    fn resolve<S>(store: &S, archive: &Archive, config: &ImportConfig) -> Result<Self, ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let batch = config.batch_size;
        let archived: Vec<Uuid> = archive.nodes().map(|n| n.uuid).collect();
        let archived_set: HashSet<Uuid> = archived.iter().copied().collect();

        let mut references: BTreeMap<Uuid, &'static str> = BTreeMap::new();
        let mut note = |uuid: Uuid, context: &'static str| {
            if !archived_set.contains(&uuid) {
                references.entry(uuid).or_insert(context);
            }
        };
        for link in &archive.links {
            note(link.input, "link input");
            note(link.output, "link output");
        }
        for record in archive.entities.values() {
            match record {
                EntityRecord::Group(group) => {
                    for member in &group.nodes {
                        note(*member, "group member");
                    }
                }
                EntityRecord::Log(log) => note(log.node, "log node"),
                EntityRecord::Comment(comment) => note(comment.node, "comment node"),
                _ => {}
            }
        }

        let existing = lookup(store, EntityKind::Node, &archived, batch)?;
        let external: Vec<Uuid> = references.keys().copied().collect();
        let external = lookup(store, EntityKind::Node, &external, batch)?;

        let node_ids: HashMap<Uuid, EntityId> = existing
            .iter()
            .chain(&external)
            .map(|e| (e.uuid(), e.id))
            .collect();
        let unknown: BTreeSet<Uuid> = references
            .keys()
            .filter(|uuid| !node_ids.contains_key(*uuid))
            .copied()
            .collect();

        if let Some(first) = unknown.first() {
            if !config.ignore_unknown_nodes {
                let context = references.get(first).copied().unwrap_or("reference");
                return Err(ArchiveError::unknown_reference(first, context));
            }
            tracing::warn!("Dropping references to {} unknown nodes", unknown.len());
        }

        check_referents(store, archive, batch)?;

        Ok(Self {
            existing_nodes: existing.into_iter().map(|e| (e.uuid(), e)).collect(),
            node_ids,
        })
    }
}

/// Users and computers the archive refers to must be archived or stored
fn check_referents<S>(store: &S, archive: &Archive, batch: usize) -> Result<(), ArchiveError>
where
    S: GraphStore + ?Sized,
{
    let mut users = BTreeSet::new();
    let mut computers = BTreeSet::new();
    for record in archive.entities.values() {
        match record {
            EntityRecord::Node(node) => {
                users.insert(node.user);
                computers.extend(node.computer);
            }
            EntityRecord::Group(group) => {
                users.insert(group.user);
            }
            EntityRecord::Comment(comment) => {
                users.insert(comment.user);
            }
            _ => {}
        }
    }

    for (kind, referenced) in [(EntityKind::User, users), (EntityKind::Computer, computers)] {
        let outside: Vec<Uuid> = referenced
            .into_iter()
            .filter(|uuid| {
                archive
                    .entities
                    .get(uuid)
                    .map_or(true, |record| record.kind() != kind)
            })
            .collect();
        let found: HashSet<Uuid> = lookup(store, kind, &outside, batch)?
            .iter()
            .map(Entity::uuid)
            .collect();
        if let Some(missing) = outside.iter().find(|uuid| !found.contains(*uuid)) {
            return Err(ArchiveError::unknown_reference(
                missing,
                format!("{kind} referenced by archive"),
            ));
        }
    }
    Ok(())
}

/// Write phase of one import; runs inside the transaction
struct Merger<'a> {
    archive: &'a Archive,
    config: &'a ImportConfig,
    resolution: Resolution,
    report: ImportReport,
    /// Archived user uuid -> stored user uuid, for users matched by email
    user_map: HashMap<Uuid, Uuid>,
}

impl Merger<'_> {
    fn run<S>(mut self, store: &mut S) -> Result<ImportReport, ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        self.import_users(store)?;
        self.import_computers(store)?;
        self.import_nodes(store)?;
        self.import_links(store)?;
        self.import_groups(store)?;
        self.import_logs(store)?;
        self.import_comments(store)?;
        self.create_import_group(store)?;

        let archived: HashSet<Uuid> = self.archive.nodes().map(|n| n.uuid).collect();
        self.report.node_ids = self
            .resolution
            .node_ids
            .iter()
            .filter(|(uuid, _)| archived.contains(*uuid))
            .map(|(uuid, id)| (*uuid, *id))
            .collect();
        Ok(self.report)
    }

    fn map_user(&self, uuid: Uuid) -> Uuid {
        self.user_map.get(&uuid).copied().unwrap_or(uuid)
    }

    fn is_known(&self, node: &Uuid) -> bool {
        self.resolution.node_ids.contains_key(node)
    }

    fn label_for<S>(&mut self, store: &S, kind: EntityKind, uuid: Uuid, label: &str) -> Result<String, ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let stored = unique_label(
            store,
            kind,
            &uuid,
            label,
            &self.config.duplicate_suffix,
            self.config.duplicate_start,
        )?;
        if stored != label {
            tracing::info!("Label collision: {} '{}' stored as '{}'", kind, label, stored);
            self.report.renamed.push(Renamed {
                kind,
                uuid,
                from: label.to_string(),
                to: stored.clone(),
            });
        }
        Ok(stored)
    }

    fn import_users<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let (mut created, mut existing) = (0, 0);
        for user in self.archive.records(EntityKind::User).filter_map(EntityRecord::as_user) {
            if store.get_by_uuid(EntityKind::User, &user.uuid)?.is_some() {
                existing += 1;
            } else if let Some(found) = store.find_user_by_email(&user.email)? {
                tracing::debug!("User {} matched by email", user.email);
                self.user_map.insert(user.uuid, found.uuid());
                existing += 1;
            } else {
                store.create(EntityRecord::User(user.clone()))?;
                created += 1;
            }
        }
        ImportReport::add(&mut self.report.created, EntityKind::User, created);
        ImportReport::add(&mut self.report.existing, EntityKind::User, existing);
        Ok(())
    }

    fn import_computers<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let (mut created, mut existing) = (0, 0);
        let archive = self.archive;
        for computer in archive
            .records(EntityKind::Computer)
            .filter_map(EntityRecord::as_computer)
        {
            if store.get_by_uuid(EntityKind::Computer, &computer.uuid)?.is_some() {
                existing += 1;
                continue;
            }
            let mut record = computer.clone();
            record.label = self.label_for(&*store, EntityKind::Computer, computer.uuid, &computer.label)?;
            store.create(EntityRecord::Computer(record))?;
            created += 1;
        }
        ImportReport::add(&mut self.report.created, EntityKind::Computer, created);
        ImportReport::add(&mut self.report.existing, EntityKind::Computer, existing);
        Ok(())
    }

    fn import_nodes<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let batch = self.config.batch_size;
        let mut fresh = Vec::new();
        let mut updates = Vec::new();

        let archive = self.archive;
        for node in archive.nodes() {
            let Some(stored) = self.resolution.existing_nodes.get(&node.uuid) else {
                fresh.push(EntityRecord::Node(NodeRecord {
                    user: self.map_user(node.user),
                    extras: self.config.extras_mode_new.apply(&node.extras),
                    ..node.clone()
                }));
                continue;
            };
            let Some(current) = stored.record.as_node() else {
                continue;
            };
            let extras = self.config.extras_mode_existing.merge(&current.extras, &node.extras);
            if extras != current.extras {
                updates.push(Entity {
                    id: stored.id,
                    record: EntityRecord::Node(NodeRecord {
                        extras,
                        ..current.clone()
                    }),
                });
            }
        }

        let mut created = Vec::with_capacity(fresh.len());
        for chunk in fresh.chunks(batch) {
            created.extend(store.bulk_insert(chunk.to_vec())?);
        }
        for chunk in updates.chunks(batch) {
            store.bulk_update(chunk)?;
        }

        // Payloads travel with the node; stored nodes keep theirs
        for entity in &created {
            let uuid = entity.uuid();
            self.resolution.node_ids.insert(uuid, entity.id);
            if let Some(blob) = archive.repository.get(&uuid) {
                store.put_payload(&uuid, blob.clone())?;
            }
        }

        ImportReport::add(&mut self.report.created, EntityKind::Node, created.len());
        ImportReport::add(
            &mut self.report.existing,
            EntityKind::Node,
            self.resolution.existing_nodes.len(),
        );
        ImportReport::add(&mut self.report.updated, EntityKind::Node, updates.len());
        Ok(())
    }

    fn import_links<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let archive = self.archive;
        let mut rows = Vec::with_capacity(archive.links.len());
        for link in &archive.links {
            let ids = &self.resolution.node_ids;
            match (ids.get(&link.input), ids.get(&link.output)) {
                (Some(&input), Some(&output)) => rows.push(LinkRow {
                    input,
                    output,
                    label: link.label.clone(),
                    link_type: link.link_type,
                }),
                _ => {
                    tracing::debug!("Dropping link {} -> {}", link.input, link.output);
                    self.report.dropped_links.push(link.clone());
                }
            }
        }

        for chunk in rows.chunks(self.config.batch_size) {
            self.report.links_inserted += store.bulk_insert_links(chunk)?;
        }
        Ok(())
    }

    fn import_groups<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let (mut created, mut existing, mut updated) = (0, 0, 0);
        let archive = self.archive;
        for group in archive.records(EntityKind::Group).filter_map(EntityRecord::as_group) {
            let members: BTreeSet<Uuid> = group
                .nodes
                .iter()
                .filter(|n| self.is_known(n))
                .copied()
                .collect();
            self.report.dropped_references += group.nodes.len() - members.len();

            if let Some(stored) = store.get_by_uuid(EntityKind::Group, &group.uuid)? {
                existing += 1;
                let Some(current) = stored.record.as_group() else {
                    continue;
                };
                // Membership only grows
                if !members.is_subset(&current.nodes) {
                    let mut merged = current.clone();
                    merged.nodes.extend(members);
                    store.update(&Entity {
                        id: stored.id,
                        record: EntityRecord::Group(merged),
                    })?;
                    updated += 1;
                }
                continue;
            }

            let label = self.label_for(&*store, EntityKind::Group, group.uuid, &group.label)?;
            store.create(EntityRecord::Group(GroupRecord {
                label,
                user: self.map_user(group.user),
                nodes: members,
                ..group.clone()
            }))?;
            created += 1;
        }
        ImportReport::add(&mut self.report.created, EntityKind::Group, created);
        ImportReport::add(&mut self.report.existing, EntityKind::Group, existing);
        ImportReport::add(&mut self.report.updated, EntityKind::Group, updated);
        Ok(())
    }

    fn import_logs<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let archive = self.archive;
        let logs: Vec<_> = archive
            .records(EntityKind::Log)
            .filter_map(EntityRecord::as_log)
            .collect();
        let uuids: Vec<Uuid> = logs.iter().map(|l| l.uuid).collect();
        let stored: HashSet<Uuid> = lookup(&*store, EntityKind::Log, &uuids, self.config.batch_size)?
            .iter()
            .map(Entity::uuid)
            .collect();

        let mut fresh = Vec::new();
        for log in logs {
            if stored.contains(&log.uuid) {
                continue;
            }
            if !self.is_known(&log.node) {
                self.report.dropped_references += 1;
                continue;
            }
            fresh.push(EntityRecord::Log(log.clone()));
        }

        for chunk in fresh.chunks(self.config.batch_size) {
            store.bulk_insert(chunk.to_vec())?;
        }
        ImportReport::add(&mut self.report.created, EntityKind::Log, fresh.len());
        ImportReport::add(&mut self.report.existing, EntityKind::Log, stored.len());
        Ok(())
    }

    fn import_comments<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let archive = self.archive;
        let comments: Vec<_> = archive
            .records(EntityKind::Comment)
            .filter_map(EntityRecord::as_comment)
            .collect();
        let uuids: Vec<Uuid> = comments.iter().map(|c| c.uuid).collect();
        let stored: HashMap<Uuid, Entity> =
            lookup(&*store, EntityKind::Comment, &uuids, self.config.batch_size)?
                .into_iter()
                .map(|e| (e.uuid(), e))
                .collect();

        let mut fresh = Vec::new();
        let mut updates = Vec::new();
        for comment in comments {
            if let Some(entity) = stored.get(&comment.uuid) {
                let resolved = entity
                    .record
                    .as_comment()
                    .and_then(|current| self.config.comment_mode.resolve(current, comment));
                if let Some(record) = resolved {
                    updates.push(Entity {
                        id: entity.id,
                        record: EntityRecord::Comment(record),
                    });
                }
                continue;
            }
            if !self.is_known(&comment.node) {
                self.report.dropped_references += 1;
                continue;
            }
            let mut record = comment.clone();
            record.user = self.map_user(comment.user);
            fresh.push(EntityRecord::Comment(record));
        }

        for chunk in fresh.chunks(self.config.batch_size) {
            store.bulk_insert(chunk.to_vec())?;
        }
        for chunk in updates.chunks(self.config.batch_size) {
            store.bulk_update(chunk)?;
        }
        ImportReport::add(&mut self.report.created, EntityKind::Comment, fresh.len());
        ImportReport::add(&mut self.report.existing, EntityKind::Comment, stored.len());
        ImportReport::add(&mut self.report.updated, EntityKind::Comment, updates.len());
        Ok(())
    }

    fn create_import_group<S>(&mut self, store: &mut S) -> Result<(), ArchiveError>
    where
        S: GraphStore + ?Sized,
    {
        let (archive, config) = (self.archive, self.config);
        let Some(label) = config.import_group.as_deref() else {
            return Ok(());
        };
        let Some(owner) = archive.nodes().next().map(|n| self.map_user(n.user)) else {
            tracing::debug!("Archive has no nodes, skipping import group");
            return Ok(());
        };

        let uuid = Uuid::new_v4();
        let label = self.label_for(&*store, EntityKind::Group, uuid, label)?;
        let nodes: BTreeSet<Uuid> = archive.nodes().map(|n| n.uuid).collect();
        store.create(EntityRecord::Group(GroupRecord {
            uuid,
            label,
            type_string: "import".to_string(),
            description: format!("Nodes imported from archive created {}", archive.manifest.created),
            user: owner,
            time: Utc::now(),
            nodes,
        }))?;

        ImportReport::add(&mut self.report.created, EntityKind::Group, 1);
        self.report.import_group = Some(uuid);
        Ok(())
    }
}
