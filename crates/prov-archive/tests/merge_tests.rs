//! Merge policy tests
//!
//! Label collisions, unknown references, extras and comment merge modes,
//! log immutability and transactional rollback.

use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use prov_archive::{
    export, import_archive, Archive, ArchiveError, CommentMode, ExportConfig, ExportRequest,
    ImportConfig, LinkRecord,
};
use prov_graph::{
    Attributes, CommentRecord, Entity, EntityKind, EntityRecord, GraphStore, GroupRecord,
    LinkType, LogRecord, MemoryStore, NodeType,
};
use prov_test_utils::{at, scenario_graph, NodeRef, TestGraph};
use serde_json::{json, Value};
use uuid::Uuid;

fn archive_of(graph: &TestGraph, nodes: &[NodeRef]) -> Archive {
    let request = ExportRequest::nodes(nodes.iter().map(|n| n.uuid));
    export(&graph.store, &request, &ExportConfig::default())
        .unwrap()
        .0
}

fn stored(store: &MemoryStore, kind: EntityKind, uuid: Uuid) -> Entity {
    store.get_by_uuid(kind, &uuid).unwrap().unwrap()
}

fn extras(value: Value) -> Attributes {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_computer_label_collision_suffixes() {
    let mut target = TestGraph::new();
    let original = target.add_computer("cluster");

    for expected in ["cluster_1", "cluster_2"] {
        let mut source = TestGraph::new();
        let computer = source.add_computer("cluster");
        let record = source.record(NodeType::Data, "structure").with_computer(computer);
        let node = source.add_record(record);

        let archive = archive_of(&source, &[node]);
        let report = import_archive(&mut target.store, &archive, &ImportConfig::default()).unwrap();

        assert_eq!(report.renamed.len(), 1);
        assert_eq!(report.renamed[0].to, expected);
        let imported = stored(&target.store, EntityKind::Computer, computer);
        assert_eq!(imported.record.label(), Some(expected));
    }

    let untouched = stored(&target.store, EntityKind::Computer, original);
    assert_eq!(untouched.record.label(), Some("cluster"));
    assert_eq!(target.store.count(EntityKind::Computer), 3);
}

#[test]
fn test_group_label_collision_with_custom_suffix() {
    let mut target = TestGraph::new();
    let existing = target.add(NodeType::Data, "local");
    target.add_group("results", &[existing]);

    let mut source = TestGraph::new();
    let node = source.add(NodeType::Data, "remote");
    let group = source.add_group("results", &[node]);

    let archive = archive_of(&source, &[node]);
    let config = ImportConfig::new().with_duplicate_suffix("-copy", 0);
    import_archive(&mut target.store, &archive, &config).unwrap();

    let imported = stored(&target.store, EntityKind::Group, group);
    assert_eq!(imported.record.label(), Some("results-copy0"));
}

#[test]
fn test_user_matched_by_email_across_archives() {
    // Both graphs create test@example.org with different uuids
    let mut target = TestGraph::new();
    let mut source = TestGraph::new();
    let node = source.add(NodeType::Data, "x");

    let archive = archive_of(&source, &[node]);
    let report = import_archive(&mut target.store, &archive, &ImportConfig::default()).unwrap();

    assert_eq!(report.existing(EntityKind::User), 1);
    assert_eq!(target.store.count(EntityKind::User), 1);
    assert_eq!(target.node_record(node).user, target.user);
}

#[test]
fn test_unknown_link_endpoint_fails_by_default() {
    let (graph, scenario) = scenario_graph();
    let mut archive = archive_of(&graph, &[scenario.w2]);
    archive.links.push(LinkRecord {
        input: Uuid::new_v4(),
        output: scenario.c0.uuid,
        label: "ghost".to_string(),
        link_type: LinkType::InputCalc,
    });

    let mut target = MemoryStore::new();
    let err = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap_err();
    assert!(matches!(err, ArchiveError::UnknownReference { .. }));
    for kind in EntityKind::ALL {
        assert_eq!(target.count(kind), 0, "{kind}");
    }

    let config = ImportConfig::new().with_ignore_unknown_nodes(true);
    let report = import_archive(&mut target, &archive, &config).unwrap();
    assert_eq!(report.dropped_links.len(), 1);
    assert_eq!(report.dropped_links[0].label, "ghost");
    assert_eq!(target.count(EntityKind::Node), 5);
    assert_eq!(target.links().len(), 8);
}

/// Archive whose log, comment and one group member point at a node nobody has
fn archive_with_dangling_references() -> (Archive, NodeRef, Uuid, Uuid, Uuid) {
    let mut source = TestGraph::new();
    let node = source.add(NodeType::Data, "kept");
    let base = archive_of(&source, &[node]);
    let ghost = Uuid::new_v4();

    let log = LogRecord {
        uuid: Uuid::new_v4(),
        node: ghost,
        time: at(10),
        loggername: "process".to_string(),
        levelname: "REPORT".to_string(),
        message: "orphan".to_string(),
        metadata: Default::default(),
    };
    let comment = CommentRecord {
        uuid: Uuid::new_v4(),
        node: ghost,
        user: source.user,
        ctime: at(0),
        mtime: at(0),
        content: "orphan".to_string(),
    };
    let group = GroupRecord {
        uuid: Uuid::new_v4(),
        label: "mixed".to_string(),
        type_string: "core".to_string(),
        description: String::new(),
        user: source.user,
        time: at(0),
        nodes: [node.uuid, ghost].into_iter().collect(),
    };
    let (log_uuid, comment_uuid, group_uuid) = (log.uuid, comment.uuid, group.uuid);

    let mut entities = base.entities.clone();
    for record in [
        EntityRecord::Group(group),
        EntityRecord::Log(log),
        EntityRecord::Comment(comment),
    ] {
        entities.insert(record.uuid(), record);
    }
    let archive = Archive::new(
        base.manifest.clone(),
        entities,
        base.links.clone(),
        base.repository.clone(),
    );
    (archive, node, log_uuid, comment_uuid, group_uuid)
}

#[test]
fn test_dangling_side_references_fail_by_default() {
    let (archive, _, _, _, _) = archive_with_dangling_references();
    let mut target = MemoryStore::new();

    let err = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap_err();
    assert!(matches!(err, ArchiveError::UnknownReference { .. }));
    for kind in EntityKind::ALL {
        assert_eq!(target.count(kind), 0, "{kind}");
    }
}

#[test]
fn test_dangling_side_references_dropped_when_ignored() {
    let (archive, node, log, comment, group) = archive_with_dangling_references();
    let mut target = MemoryStore::new();

    let config = ImportConfig::new().with_ignore_unknown_nodes(true);
    let report = import_archive(&mut target, &archive, &config).unwrap();

    assert_eq!(report.dropped_references, 3);
    assert!(report.dropped_links.is_empty());
    assert_eq!(report.created(EntityKind::Node), 1);
    assert!(target.get_by_uuid(EntityKind::Log, &log).unwrap().is_none());
    assert!(target.get_by_uuid(EntityKind::Comment, &comment).unwrap().is_none());
    assert_eq!(target.count(EntityKind::Log), 0);
    assert_eq!(target.count(EntityKind::Comment), 0);

    let members = stored(&target, EntityKind::Group, group)
        .record
        .into_group()
        .unwrap()
        .nodes;
    assert_eq!(members, [node.uuid].into_iter().collect());
}

#[test]
fn test_link_to_node_already_in_target_resolves() {
    let (graph, scenario) = scenario_graph();
    let mut target = MemoryStore::new();
    import_archive(&mut target, &archive_of(&graph, &[scenario.w2]), &ImportConfig::default())
        .unwrap();

    // Second archive refers to a node it does not carry but the target has
    let mut source = TestGraph::new();
    let extra = source.add(NodeType::Data, "extra");
    let mut archive = archive_of(&source, &[extra]);
    archive.links.push(LinkRecord {
        input: extra.uuid,
        output: scenario.c0.uuid,
        label: "extra".to_string(),
        link_type: LinkType::InputCalc,
    });

    let report = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap();
    assert_eq!(report.links_inserted, 1);
    assert!(report.dropped_links.is_empty());
}

#[test]
fn test_extras_merge_matrix_on_existing_node() {
    let mut source = TestGraph::new();
    let record = source
        .record(NodeType::Data, "structure")
        .with_extra("b", json!(2))
        .with_extra("c", json!(3));
    let node = source.add_record(record);
    let archive = archive_of(&source, &[node]);

    let cases = [
        ("kcl", json!({"a": 1, "b": 1000, "c": 3})),
        ("kcu", json!({"a": 1, "b": 2, "c": 3})),
        ("ncu", json!({"b": 2, "c": 3})),
        ("knl", json!({"a": 1, "b": 1000})),
        ("kcd", json!({"a": 1, "c": 3})),
    ];
    for (code, expected) in cases {
        let mut target = MemoryStore::new();
        import_archive(&mut target, &archive, &ImportConfig::default()).unwrap();

        // Local edits after the first import
        let mut entity = stored(&target, EntityKind::Node, node.uuid);
        if let EntityRecord::Node(n) = &mut entity.record {
            n.extras = extras(json!({"a": 1, "b": 1000}));
        }
        target.update(&entity).unwrap();

        let config = ImportConfig::new().with_extras_mode_existing(code.parse().unwrap());
        import_archive(&mut target, &archive, &config).unwrap();

        let merged = stored(&target, EntityKind::Node, node.uuid)
            .record
            .into_node()
            .unwrap()
            .extras;
        assert_eq!(merged, extras(expected), "mode {code}");
    }
}

#[test]
fn test_invalid_extras_mode_rejected_before_import() {
    let err = ImportConfig::from_toml_str(r#"extras_mode_existing = "kclx""#).unwrap_err();
    assert!(err.to_string().contains("extras_mode_existing"));
}

fn comment_after_reimport(local_mtime: DateTime<Utc>, mode: CommentMode) -> String {
    let mut source = TestGraph::new();
    let node = source.add(NodeType::Data, "structure");
    let comment = source.add_comment(node, "remote", at(100));
    let archive = archive_of(&source, &[node]);

    let mut target = MemoryStore::new();
    import_archive(&mut target, &archive, &ImportConfig::default()).unwrap();

    let mut entity = stored(&target, EntityKind::Comment, comment);
    if let EntityRecord::Comment(c) = &mut entity.record {
        c.content = "local".to_string();
        c.mtime = local_mtime;
    }
    target.update(&entity).unwrap();

    let config = ImportConfig::new().with_comment_mode(mode);
    import_archive(&mut target, &archive, &config).unwrap();
    assert_eq!(target.count(EntityKind::Comment), 1);

    stored(&target, EntityKind::Comment, comment)
        .record
        .into_comment()
        .unwrap()
        .content
}

#[test]
fn test_comment_modes() {
    assert_eq!(comment_after_reimport(at(200), CommentMode::Newest), "local");
    assert_eq!(comment_after_reimport(at(50), CommentMode::Newest), "remote");
    assert_eq!(comment_after_reimport(at(100), CommentMode::Newest), "local");
    assert_eq!(comment_after_reimport(at(200), CommentMode::Overwrite), "remote");
}

#[test]
fn test_logs_are_added_once_and_never_changed() {
    let mut source = TestGraph::new();
    let node = source.add(NodeType::Calculation, "relax");
    let log = source.add_log(node, "submitted");
    let archive = archive_of(&source, &[node]);

    let mut target = MemoryStore::new();
    let first = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap();
    assert_eq!(first.created(EntityKind::Log), 1);

    // Tamper with the archived copy; the stored log must stay as is
    let mut altered = archive.clone();
    if let Some(EntityRecord::Log(l)) = altered.entities.get_mut(&log) {
        l.message = "rewritten".to_string();
    }
    let second = import_archive(&mut target, &altered, &ImportConfig::default()).unwrap();

    assert_eq!(second.created(EntityKind::Log), 0);
    assert_eq!(second.existing(EntityKind::Log), 1);
    assert_eq!(target.count(EntityKind::Log), 1);
    let message = stored(&target, EntityKind::Log, log)
        .record
        .into_log()
        .unwrap()
        .message;
    assert_eq!(message, "submitted");
}

#[test]
fn test_group_membership_only_grows() {
    let mut source = TestGraph::new();
    let first = source.add(NodeType::Data, "first");
    let second = source.add(NodeType::Data, "second");
    let group = source.add_group("batch", &[first]);
    let small = archive_of(&source, &[first]);

    let mut entity = stored(&source.store, EntityKind::Group, group);
    if let EntityRecord::Group(g) = &mut entity.record {
        g.nodes.insert(second.uuid);
    }
    source.store.update(&entity).unwrap();
    let large = archive_of(&source, &[first, second]);

    let mut target = MemoryStore::new();
    import_archive(&mut target, &small, &ImportConfig::default()).unwrap();
    let report = import_archive(&mut target, &large, &ImportConfig::default()).unwrap();
    assert_eq!(report.updated(EntityKind::Group), 1);
    import_archive(&mut target, &small, &ImportConfig::default()).unwrap();

    let members = stored(&target, EntityKind::Group, group)
        .record
        .into_group()
        .unwrap()
        .nodes;
    assert_eq!(members.len(), 2);
    assert!(members.contains(&first.uuid) && members.contains(&second.uuid));
}

#[test]
fn test_import_group_collects_archived_nodes() {
    let (graph, scenario) = scenario_graph();
    let archive = archive_of(&graph, &[scenario.w2]);

    let mut target = MemoryStore::new();
    let config = ImportConfig::new().with_import_group("imported");
    let report = import_archive(&mut target, &archive, &config).unwrap();

    let uuid = report.import_group.unwrap();
    let group = stored(&target, EntityKind::Group, uuid)
        .record
        .into_group()
        .unwrap();
    assert_eq!(group.label, "imported");
    assert_eq!(group.nodes, scenario_uuids(&archive));
}

fn scenario_uuids(archive: &Archive) -> std::collections::BTreeSet<Uuid> {
    archive.nodes().map(|n| n.uuid).collect()
}

#[test]
fn test_store_failure_rolls_back_everything() {
    let (graph, scenario) = scenario_graph();
    let archive = archive_of(&graph, &[scenario.w2]);

    let mut target = MemoryStore::new();
    target.fail_after_writes(4);
    let err = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap_err();

    assert!(matches!(err, ArchiveError::Store(_)));
    assert_eq!(target.transaction_depth(), 0);
    for kind in EntityKind::ALL {
        assert_eq!(target.count(kind), 0, "{kind}");
    }
    assert!(target.links().is_empty());

    target.clear_failure();
    import_archive(&mut target, &archive, &ImportConfig::default()).unwrap();
    assert_eq!(target.count(EntityKind::Node), 5);
}

#[test]
fn test_unsupported_version_touches_nothing() {
    let (graph, scenario) = scenario_graph();
    let mut archive = archive_of(&graph, &[scenario.w2]);
    archive.manifest.format_version = "0.9".to_string();

    let mut target = MemoryStore::new();
    let err = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap_err();
    assert!(matches!(err, ArchiveError::VersionIncompatible { .. }));
    assert!(err.is_validation());
    assert_eq!(target.count(EntityKind::User), 0);
}

#[test]
fn test_tampered_payload_rejected() {
    let mut graph = TestGraph::new();
    let node = graph.add(NodeType::Data, "blob");
    graph.store.put_payload(&node.uuid, b"original".to_vec()).unwrap();
    let mut archive = archive_of(&graph, &[node]);
    archive.repository.insert(node.uuid, b"tampered".to_vec());

    let mut target = MemoryStore::new();
    let err = import_archive(&mut target, &archive, &ImportConfig::default()).unwrap_err();
    assert!(matches!(err, ArchiveError::Integrity { .. }));
    assert_eq!(target.count(EntityKind::Node), 0);
}
